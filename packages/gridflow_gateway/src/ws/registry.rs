//! Process-wide registry of live sessions.
//!
//! Sessions insert themselves on creation and remove themselves on close.
//! Everything that needs cross-session fan-out (forced logout, broadcast,
//! shutdown) goes through here; there is no other shared session state.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gridflow_wire::ServerEnvelope;

/// One live session as the registry sees it.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    /// Current resolved user. Updated on identity refresh.
    pub user_id: String,
    /// Cancelling tears the session down.
    pub cancel: CancellationToken,
    /// The session's outbound queue.
    pub outbound: mpsc::Sender<ServerEnvelope>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(handle.session_id.clone(), handle);
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.remove(session_id)
    }

    /// Record a changed identity for a live session.
    pub async fn update_user(&self, session_id: &str, user_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get_mut(session_id) {
            debug!(session_id = %session_id, user = %user_id, "session identity updated");
            handle.user_id = user_id.to_string();
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Cancel every live session resolved to `user_id`, the triggering
    /// session included. Returns how many sessions were cancelled.
    pub async fn logout_user(&self, user_id: &str) -> usize {
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .filter(|handle| handle.user_id == user_id)
                .cloned()
                .collect()
        };
        for handle in &targets {
            handle.cancel.cancel();
        }
        if !targets.is_empty() {
            info!(user = %user_id, sessions = targets.len(), "logging out user");
        }
        targets.len()
    }

    /// Queue an event frame onto every live session. Best effort: sessions
    /// mid-teardown just miss it. Returns how many sessions took the event.
    pub async fn broadcast_event(&self, event: Value) -> usize {
        let targets: Vec<SessionHandle> = {
            let sessions = self.sessions.lock().await;
            sessions.values().cloned().collect()
        };
        let mut delivered = 0;
        for handle in targets {
            if handle
                .outbound
                .send(ServerEnvelope::Event {
                    event: event.clone(),
                })
                .await
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Cancel every live session. Returns how many were cancelled.
    pub async fn shutdown_all(&self) -> usize {
        let sessions = self.sessions.lock().await;
        for handle in sessions.values() {
            handle.cancel.cancel();
        }
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle(session_id: &str, user_id: &str) -> (SessionHandle, mpsc::Receiver<ServerEnvelope>) {
        let (tx, rx) = mpsc::channel(8);
        (
            SessionHandle {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                cancel: CancellationToken::new(),
                outbound: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn insert_remove_and_count() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty().await);

        let (a, _rx_a) = handle("s-1", "u-1");
        let (b, _rx_b) = handle("s-2", "u-2");
        registry.insert(a).await;
        registry.insert(b).await;
        assert_eq!(registry.len().await, 2);

        let removed = registry.remove("s-1").await;
        assert_eq!(removed.unwrap().user_id, "u-1");
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove("s-1").await.is_none());
    }

    #[tokio::test]
    async fn logout_cancels_only_that_users_sessions() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle("s-1", "u-1");
        let (b, _rx_b) = handle("s-2", "u-1");
        let (c, _rx_c) = handle("s-3", "u-2");
        let cancel_a = a.cancel.clone();
        let cancel_b = b.cancel.clone();
        let cancel_c = c.cancel.clone();
        registry.insert(a).await;
        registry.insert(b).await;
        registry.insert(c).await;

        assert_eq!(registry.logout_user("u-1").await, 2);
        assert!(cancel_a.is_cancelled());
        assert!(cancel_b.is_cancelled());
        assert!(!cancel_c.is_cancelled());
    }

    #[tokio::test]
    async fn identity_refresh_redirects_logout() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle("s-1", "anon");
        let cancel_a = a.cancel.clone();
        registry.insert(a).await;

        registry.update_user("s-1", "u-9").await;
        assert_eq!(registry.logout_user("anon").await, 0);
        assert!(!cancel_a.is_cancelled());
        assert_eq!(registry.logout_user("u-9").await, 1);
        assert!(cancel_a.is_cancelled());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_live_session() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = handle("s-1", "u-1");
        let (b, mut rx_b) = handle("s-2", "u-2");
        registry.insert(a).await;
        registry.insert(b).await;

        let delivered = registry
            .broadcast_event(json!({ "type": "gateway_shutdown" }))
            .await;
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let Some(ServerEnvelope::Event { event }) = rx.recv().await else {
                panic!("expected an event frame");
            };
            assert_eq!(event["type"], "gateway_shutdown");
        }
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle("s-1", "u-1");
        let (b, _rx_b) = handle("s-2", "u-2");
        let cancel_a = a.cancel.clone();
        let cancel_b = b.cancel.clone();
        registry.insert(a).await;
        registry.insert(b).await;

        assert_eq!(registry.shutdown_all().await, 2);
        assert!(cancel_a.is_cancelled() && cancel_b.is_cancelled());
    }
}
