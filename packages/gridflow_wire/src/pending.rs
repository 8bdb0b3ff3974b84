//! Outstanding-call bookkeeping shared by both sides of the wire.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use crate::error::CallError;

/// What a settled call resolves to.
pub type Settlement = Result<Value, CallError>;

/// Calls awaiting a correlated reply, keyed by call identifier.
///
/// Settlement discipline: `settle` and `discard` both remove the entry before
/// anything is delivered, so every caller observes exactly one outcome. A
/// duplicate or late reply finds no entry and matches nothing, and a timed-out
/// identifier is immediately free for reuse.
#[derive(Debug, Default)]
pub struct PendingCallTable {
    calls: Mutex<HashMap<String, oneshot::Sender<Settlement>>>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outstanding call and get the handle its settlement arrives
    /// on. Registering an identifier that is already pending displaces the old
    /// entry; its caller resolves as connection-lost.
    pub async fn register(&self, id: impl Into<String>) -> oneshot::Receiver<Settlement> {
        let (tx, rx) = oneshot::channel();
        self.calls.lock().await.insert(id.into(), tx);
        rx
    }

    /// Deliver the reply for `id`. Returns false when nothing was pending
    /// under that identifier (late, duplicate, or unsolicited reply).
    pub async fn settle(&self, id: &str, outcome: Settlement) -> bool {
        let Some(tx) = self.calls.lock().await.remove(id) else {
            return false;
        };
        // The caller may have timed out between deadline expiry and discard;
        // delivery to a dropped receiver is a no-op either way.
        let _ = tx.send(outcome);
        true
    }

    /// Drop the entry for `id` without delivering anything.
    pub async fn discard(&self, id: &str) -> bool {
        self.calls.lock().await.remove(id).is_some()
    }

    /// Reject every outstanding call. Called when the underlying channel dies;
    /// nothing may be left hanging past channel death.
    pub async fn reject_all(&self, error: CallError) -> usize {
        let drained: Vec<_> = {
            let mut calls = self.calls.lock().await;
            calls.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.calls.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.lock().await.is_empty()
    }

    /// Await the settlement for a registered call, enforcing its deadline.
    ///
    /// On expiry the entry is purged first and the timeout error returned
    /// after, so the identifier is reusable the moment the caller sees it.
    pub async fn await_settlement(
        &self,
        id: &str,
        rx: oneshot::Receiver<Settlement>,
        deadline: Duration,
        method: &str,
    ) -> Settlement {
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(settlement)) => settlement,
            // Sender dropped without settling: table torn down or entry
            // displaced.
            Ok(Err(_)) => Err(CallError::ConnectionLost),
            Err(_) => {
                self.discard(id).await;
                Err(CallError::Timeout {
                    method: method.to_string(),
                    elapsed: deadline,
                })
            }
        }
    }
}
