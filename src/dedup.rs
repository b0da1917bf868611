//! Dedup Registry: the first submission of a key runs, later ones wait.
//!
//! Entries are never evicted. A session lives for one build, so the map is
//! bounded by the number of distinct invocations in that build.

use crate::key::InvocationKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tokio::sync::watch;

/// How the owner of a key finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    Failed,
    /// The owner stopped because its group was cancelled.
    Cancelled,
}

#[derive(Default)]
pub struct DedupRegistry {
    entries: Mutex<HashMap<InvocationKey, watch::Receiver<Option<Completion>>>>,
}

pub enum Claim {
    /// This caller runs the invocation and must report back.
    Owner(CompletionGuard),
    /// Someone else already claimed the key.
    Peer(PeerWait),
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: &InvocationKey) -> Claim {
        match self.entries.lock().entry(key.clone()) {
            Entry::Occupied(entry) => Claim::Peer(PeerWait {
                rx: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Claim::Owner(CompletionGuard { tx, done: false })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Held by the owner. Dropping it without [`finish`](Self::finish) reports
/// a cancellation, so peers never wait on an owner whose future went away.
pub struct CompletionGuard {
    tx: watch::Sender<Option<Completion>>,
    done: bool,
}

impl CompletionGuard {
    pub fn finish(mut self, completion: Completion) {
        self.tx.send_replace(Some(completion));
        self.done = true;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.done {
            self.tx.send_replace(Some(Completion::Cancelled));
        }
    }
}

pub struct PeerWait {
    rx: watch::Receiver<Option<Completion>>,
}

impl PeerWait {
    pub async fn wait(mut self) -> Completion {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(Completion::Cancelled),
            Err(_) => Completion::Cancelled,
        }
    }
}
