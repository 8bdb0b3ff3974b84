//! Event-listener registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

/// Handle returned by [`EventListeners::register`]; pass it back to
/// [`EventListeners::unregister`] to detach that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listeners keyed by event-type name.
///
/// Registering the same callback for the same type twice yields two distinct
/// handles and two invocations per event. Dispatch runs listeners in
/// registration order, outside the registry lock, so a listener may register
/// or remove listeners itself without deadlocking.
#[derive(Default)]
pub struct EventListeners {
    next_id: AtomicU64,
    by_type: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        event_type: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.by_type
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns true when the listener was present and has been removed.
    pub async fn unregister(&self, event_type: &str, id: ListenerId) -> bool {
        let mut map = self.by_type.write().await;
        let Some(list) = map.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        let removed = list.len() < before;
        if list.is_empty() {
            map.remove(event_type);
        }
        removed
    }

    /// Invokes every listener registered for `event_type` and returns how
    /// many ran. Unknown types dispatch to nobody.
    pub async fn dispatch(&self, event_type: &str, payload: &Value) -> usize {
        let callbacks: Vec<Listener> = {
            let map = self.by_type.read().await;
            match map.get(event_type) {
                Some(list) => list.iter().map(|(_, listener)| listener.clone()).collect(),
                None => Vec::new(),
            }
        };
        for callback in &callbacks {
            callback(payload);
        }
        callbacks.len()
    }

    pub async fn listener_count(&self, event_type: &str) -> usize {
        self.by_type
            .read()
            .await
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn dispatches_in_registration_order() {
        let listeners = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        listeners
            .register("sheet_changed", move |_| first.lock().unwrap().push(1))
            .await;
        let second = seen.clone();
        listeners
            .register("sheet_changed", move |_| second.lock().unwrap().push(2))
            .await;

        let ran = listeners.dispatch("sheet_changed", &json!({})).await;
        assert_eq!(ran, 2);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn unknown_event_type_dispatches_to_nobody() {
        let listeners = EventListeners::new();
        assert_eq!(listeners.dispatch("never_registered", &json!({})).await, 0);
    }

    #[tokio::test]
    async fn unregister_detaches_only_the_named_listener() {
        let listeners = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        let keep = listeners
            .register("machine_step", move |_| first.lock().unwrap().push("keep"))
            .await;
        let second = seen.clone();
        let drop_me = listeners
            .register("machine_step", move |_| second.lock().unwrap().push("drop"))
            .await;

        assert!(listeners.unregister("machine_step", drop_me).await);
        assert!(!listeners.unregister("machine_step", drop_me).await);
        assert_eq!(listeners.listener_count("machine_step").await, 1);

        listeners.dispatch("machine_step", &json!({})).await;
        assert_eq!(*seen.lock().unwrap(), vec!["keep"]);
        assert!(listeners.unregister("machine_step", keep).await);
        assert_eq!(listeners.listener_count("machine_step").await, 0);
    }

    #[tokio::test]
    async fn listeners_receive_the_event_payload() {
        let listeners = EventListeners::new();
        let captured = Arc::new(Mutex::new(None));

        let slot = captured.clone();
        listeners
            .register("graph_updated", move |payload| {
                *slot.lock().unwrap() = Some(payload.clone());
            })
            .await;

        let payload = json!({ "type": "graph_updated", "graphId": "g1" });
        listeners.dispatch("graph_updated", &payload).await;
        assert_eq!(captured.lock().unwrap().take(), Some(payload));
    }
}
