//! Invocation Executor.
//!
//! `run_command` walks an invocation through dedup, the staleness check, the
//! gate and the process itself, then does the bookkeeping: build record,
//! trace event, hash-stability restores and logging. `run_function` runs
//! in-process work on the rayon pool under the same gate and trace.

use crate::dedup::{Claim, Completion};
use crate::error::{BuildError, Result};
use crate::gate::JobToken;
use crate::group::CancelToken;
use crate::invocation::InvocationSpec;
use crate::session::Session;
use crate::snapshot::OutputSnapshot;
use crate::staleness::{self, Staleness, newest_mtime};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// How a submitted command invocation was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing was newer than the last successful run.
    UpToDate,
    /// The command ran and succeeded.
    Executed,
    /// An identical invocation submitted earlier did the work.
    Converged,
}

impl Session {
    /// Run `spec` unless it is up to date or already submitted.
    pub async fn run_command(&self, spec: &InvocationSpec) -> Result<Outcome> {
        let cancel = CancelToken::current();
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        let guard = match self.dedup.claim(spec.key()) {
            Claim::Owner(guard) => guard,
            Claim::Peer(peer) => {
                debug!("Already running {} {}", spec.key(), spec.command());
                let completion = tokio::select! {
                    completion = peer.wait() => completion,
                    _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                };
                return match completion {
                    Completion::Succeeded => Ok(Outcome::Converged),
                    Completion::Cancelled => Err(BuildError::Cancelled),
                    Completion::Failed => Err(BuildError::PeerFailed {
                        command: spec.command().to_string(),
                    }),
                };
            }
        };

        let result = self.execute(spec, &cancel).await;
        guard.finish(match &result {
            Ok(_) => Completion::Succeeded,
            Err(BuildError::Cancelled) => Completion::Cancelled,
            Err(_) => Completion::Failed,
        });
        result
    }

    async fn execute(&self, spec: &InvocationSpec, cancel: &CancelToken) -> Result<Outcome> {
        let (reason, newest_before) = match staleness::evaluate(spec, self.store.get(spec.key())) {
            Staleness::UpToDate => {
                debug!("Nothing newer {}", spec.label());
                return Ok(Outcome::UpToDate);
            }
            Staleness::Stale { reason, newest } => (reason, newest),
        };

        let snapshots = OutputSnapshot::capture_all(spec.check_hash())?;

        let output = {
            let _token = self.acquire(cancel).await?;
            let lane = self.trace.lane();
            let start = self.trace.now_us();
            let output = spawn_shell(spec).await;
            self.trace.record(spec.label(), &lane, start, self.trace.now_us());
            match output {
                Ok(output) => output,
                Err(e) => {
                    self.store.invalidate(spec.key());
                    return Err(e);
                }
            }
        };
        let cancelled = cancel.is_cancelled();

        if !output.status.success() {
            self.store.invalidate(spec.key());
            report_failure(spec, &output);
            if cancelled {
                return Err(BuildError::Cancelled);
            }
            return Err(BuildError::Execution {
                command: spec.command().to_string(),
                status: output.status.to_string(),
            });
        }

        let newest_after = newest_mtime(spec.inputs());
        let modified = newest_before != newest_after;
        if modified {
            self.store.record(spec.key(), newest_after);
        } else {
            self.store.invalidate(spec.key());
        }

        for snapshot in &snapshots {
            snapshot.restore_if_unchanged()?;
        }

        // Keep the log about the sibling that failed, not about this success.
        if cancelled {
            return Err(BuildError::Cancelled);
        }
        info!("{} ({})", spec.label(), reason);
        if spec.description().is_some() {
            debug!("{}", spec.command());
        }

        if !modified {
            error!("No files were modified by the command.");
            return Err(BuildError::NothingModified {
                command: spec.command().to_string(),
            });
        }
        Ok(Outcome::Executed)
    }

    /// Run `function` on the rayon pool while holding one job token.
    ///
    /// Function invocations are neither deduplicated nor cached; they always
    /// run and always produce a trace event.
    pub async fn run_function<F, R>(&self, description: &str, function: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let cancel = CancelToken::current();
        let result = {
            let _token = self.acquire(&cancel).await?;
            let lane = self.trace.lane();
            let start = self.trace.now_us();

            let (tx, rx) = oneshot::channel();
            rayon::spawn(move || {
                let _ = tx.send(panic::catch_unwind(AssertUnwindSafe(function)));
            });
            let result = rx.await;

            self.trace.record(description, &lane, start, self.trace.now_us());
            result
        };

        let value = match result {
            Ok(Ok(value)) => value,
            Ok(Err(payload)) => return Err(BuildError::Panicked(panic_message(&*payload))),
            Err(_) => return Err(BuildError::Panicked(format!("{} never finished", description))),
        };

        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        info!("{}", description);
        Ok(value)
    }

    /// Wait for a job token unless the group is cancelled first.
    async fn acquire(&self, cancel: &CancelToken) -> Result<JobToken> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
            token = self.gate.acquire() => token,
        }
    }
}

/// Run the rendered command through the platform shell, capturing both
/// streams. The child is always waited for, even if the group is cancelled.
async fn spawn_shell(spec: &InvocationSpec) -> Result<Output> {
    let mut command = shell(spec.command());
    command
        .current_dir(spec.working_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = command
        .spawn()
        .map_err(|e| BuildError::io(spec.working_dir(), "spawn command in", e))?;
    child
        .wait_with_output()
        .await
        .map_err(|e| BuildError::io(spec.working_dir(), "wait for command in", e))
}

#[cfg(unix)]
fn shell(command_line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(command_line);
    command
}

#[cfg(windows)]
fn shell(command_line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(command_line);
    command
}

fn report_failure(spec: &InvocationSpec, output: &Output) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        info!("{}", stdout.trim());
    }
    if !stderr.trim().is_empty() {
        warn!("{}", stderr.trim());
    }
    if output.stdout.is_empty() && output.stderr.is_empty() {
        warn!("No output");
    }
    error!("{}", spec.command());
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
