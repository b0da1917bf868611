//! Process-scoped orchestrator state.
//!
//! A [`Session`] owns the Build-Time Store, the Dedup Registry, the
//! Concurrency Gate and the Trace Recorder for one build. It is opened once,
//! shared (usually behind an `Arc`) by every task that submits invocations,
//! and closed at the end to persist the store and the trace.

use crate::dedup::DedupRegistry;
use crate::error::{BuildError, Result};
use crate::gate::JobGate;
use crate::store::BuildTimeStore;
use crate::trace::TraceRecorder;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

pub const STORE_FILE: &str = "build_times.json";
pub const TRACE_FILE: &str = "trace.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Directory holding `build_times.json` and `trace.json`.
    pub state_dir: PathBuf,
    /// Local gate capacity when no jobserver is advertised.
    pub jobs: Option<usize>,
    /// `MAKEFLAGS` of an enclosing make, if any.
    pub makeflags: Option<String>,
}

impl SessionConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            jobs: None,
            makeflags: None,
        }
    }

    /// Like [`new`](Self::new), picking up `MAKEFLAGS` from the environment.
    pub fn from_env(state_dir: impl Into<PathBuf>, jobs: Option<usize>) -> Self {
        Self {
            state_dir: state_dir.into(),
            jobs,
            makeflags: std::env::var("MAKEFLAGS").ok(),
        }
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn makeflags(mut self, makeflags: impl Into<String>) -> Self {
        self.makeflags = Some(makeflags.into());
        self
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE)
    }

    pub fn trace_path(&self) -> PathBuf {
        self.state_dir.join(TRACE_FILE)
    }
}

pub struct Session {
    pub(crate) store: BuildTimeStore,
    pub(crate) dedup: DedupRegistry,
    pub(crate) gate: JobGate,
    pub(crate) trace: TraceRecorder,
    trace_path: PathBuf,
    closed: AtomicBool,
}

impl Session {
    pub fn open(config: SessionConfig) -> Result<Self> {
        fs::create_dir_all(&config.state_dir)
            .map_err(|e| BuildError::io(&config.state_dir, "create directory", e))?;

        let store = BuildTimeStore::load(config.store_path())?;
        let gate = JobGate::select(config.makeflags.as_deref(), config.jobs)?;
        debug!("Session opened with {}", gate.describe());

        Ok(Self {
            store,
            dedup: DedupRegistry::new(),
            gate,
            trace: TraceRecorder::new(),
            trace_path: config.trace_path(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &BuildTimeStore {
        &self.store
    }

    pub fn gate(&self) -> &JobGate {
        &self.gate
    }

    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    pub fn dedup(&self) -> &DedupRegistry {
        &self.dedup
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }

    /// Write the trace, then the build times. The build times are written
    /// even if the trace cannot be, and the first error is returned. Once
    /// both writes have been attempted, later calls do nothing.
    pub fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let trace = self.trace.flush(&self.trace_path);
        let store = self.store.flush();
        self.closed.store(true, Ordering::SeqCst);
        trace.and(store)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to save build state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::InvocationKey;

    #[test]
    fn test_close_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::new(dir.path().join("state"));
        let session = Session::open(config.clone()).unwrap();
        session
            .store()
            .record(&InvocationKey::derive("true", Path::new("/")), 5);
        session.close().unwrap();

        assert!(config.trace_path().exists());
        assert!(config.store_path().exists());
        assert!(session.is_closed());
        // A second close is a no-op.
        session.close().unwrap();
    }

    #[test]
    fn test_trace_failure_still_saves_build_times() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::new(dir.path());
        let key = InvocationKey::derive("gen qstr", Path::new("/src"));
        let session = Session::open(config.clone()).unwrap();
        session.store().record(&key, 7);

        // A directory where the trace file should go cannot be replaced.
        fs::create_dir_all(config.trace_path()).unwrap();
        assert!(session.close().is_err());
        assert!(session.is_closed());
        drop(session);

        let reopened = Session::open(config).unwrap();
        assert_eq!(reopened.store().get(&key), Some(7));
    }

    #[test]
    fn test_drop_flushes_unclosed_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::new(dir.path());
        let key = InvocationKey::derive("cc -c a.c", Path::new("/src"));
        {
            let session = Session::open(config.clone()).unwrap();
            session.store().record(&key, 9);
        }
        let reopened = Session::open(config).unwrap();
        assert_eq!(reopened.store().get(&key), Some(9));
    }

    #[test]
    fn test_jobs_select_local_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open(SessionConfig::new(dir.path()).jobs(4)).unwrap();
        assert_eq!(session.gate().capacity(), Some(4));

        let default = Session::open(SessionConfig::new(dir.path().join("b"))).unwrap();
        assert_eq!(default.gate().capacity(), Some(1));
    }
}
