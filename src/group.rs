//! Structured concurrency for invocations.
//!
//! A [`TaskGroup`] runs futures concurrently and fails fast: the first real
//! failure cancels the group's [`CancelToken`]. Cancellation is cooperative.
//! Invocations that have not started stop at their next suspension point,
//! while running processes are left to exit on their own before the
//! cancellation is reported. Tokens nest, so a group spawned inside another
//! group's task is cancelled along with its parent.

use crate::error::{BuildError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinSet;

tokio::task_local! {
    static CURRENT: CancelToken;
}

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    tx: watch::Sender<bool>,
    children: Mutex<Vec<Weak<TokenInner>>>,
}

impl TokenInner {
    fn cancel(&self) {
        if self.tx.send_replace(true) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner {
                tx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The token of the group the calling task belongs to, or a token that
    /// is never cancelled outside of any group.
    pub fn current() -> Self {
        CURRENT.try_with(Clone::clone).unwrap_or_default()
    }

    /// A token cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut children = self.inner.children.lock();
        // Checked under the lock so a concurrent cancel cannot slip between.
        if self.is_cancelled() {
            child.cancel();
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

pub struct TaskGroup {
    tasks: JoinSet<Result<()>>,
    token: CancelToken,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    /// A group nested under the calling task's group, if any.
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            token: CancelToken::current().child(),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F, T>(&mut self, future: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let scoped = CURRENT.scope(self.token.clone(), async move { future.await.map(|_| ()) });
        self.tasks.spawn(scoped);
    }

    /// Wait for every task. Any failure cancels the rest of the group.
    pub async fn join(mut self) -> Result<()> {
        let mut failures = Vec::new();
        let mut cancelled = false;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => cancelled = true,
                Ok(Err(e)) => {
                    self.token.cancel();
                    failures.push(e);
                }
                Err(join_error) => {
                    self.token.cancel();
                    failures.push(BuildError::Panicked(join_error.to_string()));
                }
            }
        }

        if !failures.is_empty() {
            Err(BuildError::Group(failures))
        } else if cancelled {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}
