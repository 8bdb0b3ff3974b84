//! The gateway client proper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use gridflow_wire::{
    CallError, CallIdGen, ClientEnvelope, PendingCallTable, ServerEnvelope, SessionFrame,
    SessionSnapshot,
};

use crate::error::ClientError;
use crate::listeners::{EventListeners, ListenerId};

/// Tunables for [`GatewayClient::connect`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline applied by [`GatewayClient::call`].
    pub call_timeout: Duration,
    /// Interval between keepalive pings; `None` disables them.
    pub ping_interval: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(20),
            ping_interval: Some(Duration::from_secs(20)),
        }
    }
}

struct ClientShared {
    pending: PendingCallTable,
    listeners: EventListeners,
    session: Mutex<Option<SessionSnapshot>>,
    connected: AtomicBool,
    /// Set once, by whichever of close() and the driver gets there first.
    shutdown_reason: Mutex<Option<CallError>>,
}

impl ClientShared {
    async fn terminal_error(&self) -> CallError {
        self.shutdown_reason
            .lock()
            .await
            .clone()
            .unwrap_or(CallError::ConnectionLost)
    }

    async fn handle_frame(&self, text: &str) {
        let frame: SessionFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping undecodable gateway frame");
                return;
            }
        };
        *self.session.lock().await = Some(frame.session);

        match frame.body {
            ServerEnvelope::Response(body) => {
                let request_id = body.request_id.clone();
                let value = serde_json::to_value(&body).unwrap_or(Value::Null);
                if !self.pending.settle(&request_id, Ok(value)).await {
                    debug!(request_id, "response matched no outstanding call");
                }
            }
            ServerEnvelope::Error {
                request_id: Some(request_id),
                error,
            } => {
                if !self
                    .pending
                    .settle(&request_id, Err(CallError::Backend(error)))
                    .await
                {
                    debug!(request_id, "error matched no outstanding call");
                }
            }
            ServerEnvelope::Error {
                request_id: None,
                error,
            } => {
                warn!(%error, "gateway reported an uncorrelated error");
            }
            ServerEnvelope::Event { event } => {
                let Some(event_type) = event.get("type").and_then(Value::as_str) else {
                    debug!("dropping event with no type tag");
                    return;
                };
                let event_type = event_type.to_string();
                self.listeners.dispatch(&event_type, &event).await;
            }
        }
    }
}

/// Connected handle to a gateway.
///
/// Cloning is cheap; every clone shares one socket, one pending-call table
/// and one listener registry. When the last clone drops, the connection is
/// torn down.
#[derive(Clone)]
pub struct GatewayClient {
    shared: Arc<ClientShared>,
    out_tx: mpsc::Sender<ClientEnvelope>,
    ids: Arc<CallIdGen>,
    options: ClientOptions,
    cancel: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl GatewayClient {
    /// Connect to a gateway WebSocket endpoint and spawn the background
    /// driver. Authentication rides on the URL (`...?token=...`).
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let shared = Arc::new(ClientShared {
            pending: PendingCallTable::new(),
            listeners: EventListeners::new(),
            session: Mutex::new(None),
            connected: AtomicBool::new(true),
            shutdown_reason: Mutex::new(None),
        });
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEnvelope>(64);
        let cancel = CancellationToken::new();

        let driver_shared = shared.clone();
        let driver_cancel = cancel.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = driver_cancel.cancelled() => {
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        break CallError::Closed;
                    }
                    outbound = out_rx.recv() => {
                        let Some(envelope) = outbound else {
                            break CallError::Closed;
                        };
                        let json = match serde_json::to_string(&envelope) {
                            Ok(json) => json,
                            Err(error) => {
                                warn!(%error, "skipping unserializable outbound frame");
                                continue;
                            }
                        };
                        if ws_write.send(tungstenite::Message::Text(json.into())).await.is_err() {
                            break CallError::ConnectionLost;
                        }
                    }
                    inbound = ws_read.next() => {
                        match inbound {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                driver_shared.handle_frame(text.as_str()).await;
                            }
                            Some(Ok(tungstenite::Message::Close(_))) | None => {
                                break CallError::ConnectionLost;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(error)) => {
                                debug!(%error, "gateway socket read failed");
                                break CallError::ConnectionLost;
                            }
                        }
                    }
                }
            };

            {
                let mut slot = driver_shared.shutdown_reason.lock().await;
                if slot.is_none() {
                    *slot = Some(reason.clone());
                }
            }
            driver_shared.connected.store(false, Ordering::SeqCst);
            let rejected = driver_shared.pending.reject_all(reason).await;
            if rejected > 0 {
                debug!(rejected, "rejected outstanding calls on disconnect");
            }
        });

        if let Some(interval) = options.ping_interval {
            let ping_tx = out_tx.clone();
            let ping_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick completes immediately; skip it so pings
                // start one interval in.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ping_cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if ping_tx.send(ClientEnvelope::Ping).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        Ok(Self {
            shared,
            out_tx,
            ids: Arc::new(CallIdGen::new()),
            options,
            _guard: Arc::new(cancel.clone().drop_guard()),
            cancel,
        })
    }

    /// Issue a correlated request and wait for the joined response with the
    /// default deadline.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value, CallError> {
        self.call_with_timeout(method, args, self.options.call_timeout)
            .await
    }

    /// Issue a correlated request, waiting at most `deadline` for the reply.
    /// On expiry the pending entry is purged and a late reply is dropped.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        args: Value,
        deadline: Duration,
    ) -> Result<Value, CallError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(self.shared.terminal_error().await);
        }

        let request_id = self.ids.next_id();
        let rx = self.shared.pending.register(request_id.as_str()).await;
        let envelope = ClientEnvelope::Request {
            request_id: request_id.clone(),
            method: method.to_string(),
            args,
            topic: None,
        };
        if self.out_tx.send(envelope).await.is_err() {
            self.shared.pending.discard(&request_id).await;
            return Err(self.shared.terminal_error().await);
        }
        self.shared
            .pending
            .await_settlement(&request_id, rx, deadline, method)
            .await
    }

    /// Send a request that expects no reply. Nothing is registered, so any
    /// response the gateway happens to produce matches nothing and is
    /// dropped.
    pub async fn send_uncorrelated(&self, method: &str, args: Value) -> Result<(), CallError> {
        self.send_request(method, args, None).await
    }

    /// Publish a request onto a bus topic instead of dispatching it to the
    /// backends. Fire-and-forget; subscribers see it as an event.
    pub async fn publish(&self, topic: &str, method: &str, args: Value) -> Result<(), CallError> {
        self.send_request(method, args, Some(topic.to_string()))
            .await
    }

    async fn send_request(
        &self,
        method: &str,
        args: Value,
        topic: Option<String>,
    ) -> Result<(), CallError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(self.shared.terminal_error().await);
        }
        let envelope = ClientEnvelope::Request {
            request_id: self.ids.next_id(),
            method: method.to_string(),
            args,
            topic,
        };
        if self.out_tx.send(envelope).await.is_err() {
            return Err(self.shared.terminal_error().await);
        }
        Ok(())
    }

    /// Register a listener for events of `event_type`. Listeners for the same
    /// type run in registration order.
    pub async fn on(
        &self,
        event_type: &str,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.register(event_type, listener).await
    }

    /// Remove a listener previously registered with [`GatewayClient::on`].
    pub async fn off(&self, event_type: &str, id: ListenerId) -> bool {
        self.shared.listeners.unregister(event_type, id).await
    }

    /// Ask the gateway to tear down every session of the current user.
    pub async fn logout(&self) -> Result<(), CallError> {
        if self.out_tx.send(ClientEnvelope::Logout).await.is_err() {
            return Err(self.shared.terminal_error().await);
        }
        Ok(())
    }

    /// Session snapshot from the most recent gateway frame, if any frame has
    /// arrived yet.
    pub async fn session(&self) -> Option<SessionSnapshot> {
        self.shared.session.lock().await.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Close the connection. Outstanding calls reject with
    /// [`CallError::Closed`], as does any call issued afterwards.
    pub async fn close(&self) {
        {
            let mut slot = self.shared.shutdown_reason.lock().await;
            if slot.is_none() {
                *slot = Some(CallError::Closed);
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}
