//! Concurrency Gate.
//!
//! Every process or function invocation holds exactly one [`JobToken`] while
//! it runs. Tokens come either from a local semaphore or, when an enclosing
//! `make` advertises a jobserver FIFO in `MAKEFLAGS`, from that shared pipe.
//! Tokens release themselves on drop so no exit path can leak one.

mod jobserver;

pub use jobserver::JobserverClient;

use crate::error::{BuildError, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

static FIFO_AUTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fifo:([^\s]+)").expect("valid jobserver regex"));

/// Extract the jobserver FIFO path from a `MAKEFLAGS` value, e.g.
/// `-j8 --jobserver-auth=fifo:/tmp/GMfifo1234`.
pub fn jobserver_fifo(makeflags: &str) -> Option<PathBuf> {
    FIFO_AUTH
        .captures(makeflags)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
}

pub enum JobGate {
    Local { permits: Arc<Semaphore>, capacity: usize },
    Jobserver(Arc<JobserverClient>),
}

impl JobGate {
    /// A local pool of `capacity` tokens. Zero is treated as one.
    pub fn local(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        JobGate::Local {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn jobserver(fifo: impl Into<PathBuf>) -> Result<Self> {
        Ok(JobGate::Jobserver(JobserverClient::open(fifo)?))
    }

    /// Pick the jobserver when `makeflags` names a FIFO, otherwise a local
    /// pool of `jobs` tokens (default 1).
    pub fn select(makeflags: Option<&str>, jobs: Option<usize>) -> Result<Self> {
        if let Some(fifo) = makeflags.and_then(jobserver_fifo) {
            debug!("Using jobserver at {}", fifo.display());
            return Self::jobserver(fifo);
        }
        Ok(Self::local(jobs.unwrap_or(1)))
    }

    pub async fn acquire(&self) -> Result<JobToken> {
        match self {
            JobGate::Local { permits, .. } => {
                // Only a closed semaphore errors, and this one is never closed.
                let permit = Arc::clone(permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| BuildError::Cancelled)?;
                Ok(JobToken {
                    source: TokenSource::Local { _permit: permit },
                })
            }
            JobGate::Jobserver(client) => {
                let byte = client.acquire().await?;
                Ok(JobToken {
                    source: TokenSource::Pipe {
                        byte,
                        client: Arc::clone(client),
                    },
                })
            }
        }
    }

    /// Fixed capacity of a local gate; `None` for a jobserver.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            JobGate::Local { capacity, .. } => Some(*capacity),
            JobGate::Jobserver(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            JobGate::Local { capacity, .. } => format!("{} local job slot(s)", capacity),
            JobGate::Jobserver(client) => format!("jobserver {}", client.path().display()),
        }
    }
}

/// Permission to run one unit of work.
pub struct JobToken {
    source: TokenSource,
}

enum TokenSource {
    Local { _permit: OwnedSemaphorePermit },
    Pipe { byte: u8, client: Arc<JobserverClient> },
}

impl Drop for JobToken {
    fn drop(&mut self) {
        if let TokenSource::Pipe { byte, client } = &self.source {
            client.release(*byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_fifo_from_makeflags() {
        assert_eq!(
            jobserver_fifo(" -j8 --jobserver-auth=fifo:/tmp/GMfifo42 --no-print-directory"),
            Some(PathBuf::from("/tmp/GMfifo42"))
        );
        assert_eq!(jobserver_fifo("-j8 --jobserver-auth=3,4"), None);
        assert_eq!(jobserver_fifo(""), None);
    }

    #[test]
    fn test_default_is_single_local_slot() {
        let gate = JobGate::select(Some("-k"), None).unwrap();
        assert_eq!(gate.capacity(), Some(1));
        assert_eq!(JobGate::local(0).capacity(), Some(1));
        assert_eq!(JobGate::select(None, Some(6)).unwrap().capacity(), Some(6));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_local_gate_bounds_holders() {
        let gate = Arc::new(JobGate::local(3));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let gate = Arc::clone(&gate);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _token = gate.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(current.load(Ordering::SeqCst), 0);
    }
}
