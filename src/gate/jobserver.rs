//! Client side of the GNU make jobserver FIFO protocol.
//!
//! Reading one byte from the FIFO takes a token; writing a byte back returns
//! it. A dedicated thread performs the blocking reads, but only while some
//! acquire request is waiting. A byte that arrives after every waiter has
//! gone away is written straight back so the coordinator never loses a slot.

use crate::error::{BuildError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub struct JobserverClient {
    path: PathBuf,
    writer: Mutex<File>,
    state: Mutex<State>,
    demand: Condvar,
}

#[derive(Default)]
struct State {
    /// Oldest request first.
    pending: VecDeque<oneshot::Sender<u8>>,
    held: usize,
    failure: Option<String>,
}

impl JobserverClient {
    pub fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let path = path.into();
        let pipe_error = |source: io::Error| BuildError::Jobserver {
            path: path.clone(),
            source,
        };

        // Read+write so opening never blocks waiting for the other end.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(pipe_error)?;
        let reader = file.try_clone().map_err(pipe_error)?;

        let client = Arc::new(Self {
            path: path.clone(),
            writer: Mutex::new(file),
            state: Mutex::new(State::default()),
            demand: Condvar::new(),
        });

        let worker = Arc::clone(&client);
        thread::Builder::new()
            .name("cinder-jobserver".into())
            .spawn(move || worker.read_tokens(reader))
            .map_err(pipe_error)?;

        debug!("Connected to jobserver {}", client.path.display());
        Ok(client)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tokens currently handed out to callers.
    pub fn held(&self) -> usize {
        self.state.lock().held
    }

    pub(crate) async fn acquire(&self) -> Result<u8> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if let Some(reason) = &state.failure {
                return Err(self.failure(reason));
            }
            state.pending.push_back(tx);
        }
        self.demand.notify_one();

        let mut pending = PendingAcquire {
            rx: Some(rx),
            client: self,
        };
        pending.wait().await
    }

    pub(crate) fn release(&self, byte: u8) {
        {
            let mut state = self.state.lock();
            state.held = state.held.saturating_sub(1);
        }
        self.new_token(byte);
    }

    /// Hand `byte` to the oldest live waiter, or give it back to the pipe.
    fn new_token(&self, byte: u8) {
        let mut byte = byte;
        {
            let mut state = self.state.lock();
            while let Some(waiter) = state.pending.pop_front() {
                match waiter.send(byte) {
                    Ok(()) => {
                        state.held += 1;
                        return;
                    }
                    Err(returned) => byte = returned,
                }
            }
        }
        self.write_back(byte);
    }

    fn write_back(&self, byte: u8) {
        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_all(&[byte]).and_then(|_| writer.flush()) {
            warn!(
                "Failed to return job token to {}: {}",
                self.path.display(),
                e
            );
        }
    }

    fn read_tokens(&self, mut reader: File) {
        loop {
            {
                let mut state = self.state.lock();
                loop {
                    state.pending.retain(|waiter| !waiter.is_closed());
                    if !state.pending.is_empty() {
                        break;
                    }
                    self.demand.wait(&mut state);
                }
            }

            let mut byte = [0u8; 1];
            match reader.read(&mut byte) {
                Ok(1) => self.new_token(byte[0]),
                Ok(_) => return self.fail("pipe closed".to_string()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return self.fail(e.to_string()),
            }
        }
    }

    fn fail(&self, reason: String) {
        warn!("Jobserver {} unusable: {}", self.path.display(), reason);
        let mut state = self.state.lock();
        state.failure = Some(reason);
        // Dropping the senders wakes every waiter with an error.
        state.pending.clear();
    }

    fn failure(&self, reason: &str) -> BuildError {
        BuildError::Jobserver {
            path: self.path.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, reason.to_string()),
        }
    }
}

/// An in-flight acquire. If the caller stops waiting after the byte was
/// already handed over, the byte is released instead of being lost.
struct PendingAcquire<'a> {
    rx: Option<oneshot::Receiver<u8>>,
    client: &'a JobserverClient,
}

impl PendingAcquire<'_> {
    async fn wait(&mut self) -> Result<u8> {
        let received = match &mut self.rx {
            Some(rx) => rx.await.ok(),
            None => None,
        };
        self.rx = None;
        match received {
            Some(byte) => Ok(byte),
            None => {
                let reason = self
                    .client
                    .state
                    .lock()
                    .failure
                    .clone()
                    .unwrap_or_else(|| "token request dropped".to_string());
                Err(self.client.failure(&reason))
            }
        }
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(byte) = rx.try_recv() {
                self.client.release(byte);
            }
        }
    }
}
