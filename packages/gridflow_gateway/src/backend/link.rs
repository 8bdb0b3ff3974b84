//! Outbound WebSocket links to the backend compute services.
//!
//! Each session owns one link per service. A link dials its service, keeps
//! the connection alive with exponential-backoff reconnects, correlates
//! request/reply pairs through a [`PendingCallTable`], and surfaces
//! everything else as [`LinkEvent`]s for the session to forward.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gridflow_wire::{
    BackendReply, BackendRequest, CallError, CallIdGen, PendingCallTable, ServiceKind,
};

/// Where a link currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a link tells its owning session.
///
/// Correlated replies never show up here; they settle the pending table and
/// resolve the originating call instead.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Connected { service: ServiceKind },
    Disconnected { service: ServiceKind },
    /// Business event addressed to clients.
    Event { service: ServiceKind, payload: Value },
    /// Execution tick, forwarded on the lossy path.
    Step { service: ServiceKind, payload: Value },
    /// Raw passthrough payload.
    Message { service: ServiceKind, payload: Value },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link is down; the call was never sent.
    #[error("{service} link is not connected")]
    NotConnected { service: ServiceKind },

    /// The writer went away between the connected check and the handoff.
    #[error("{service} link dropped the request")]
    Send { service: ServiceKind },

    #[error(transparent)]
    Call(#[from] CallError),
}

impl LinkError {
    /// Render into the `{error}` object for a response slot.
    pub fn to_slot_value(&self) -> Value {
        match self {
            Self::Call(error) => error.to_slot_value(),
            other => serde_json::json!({ "error": other.to_string() }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Per-call deadline.
    pub request_timeout: Duration,
    /// Reconnect backoff cap.
    pub max_backoff: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// One persistent link to one backend service.
pub struct BackendLink {
    service: ServiceKind,
    url: String,
    options: LinkOptions,
    ids: CallIdGen,
    pending: Arc<PendingCallTable>,
    state: Arc<RwLock<LinkState>>,
    /// Writer handle for the live connection. `None` while disconnected, so
    /// calls fail fast instead of queueing against a dead socket.
    conn_tx: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    event_tx: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl BackendLink {
    pub fn new(
        service: ServiceKind,
        url: impl Into<String>,
        options: LinkOptions,
        event_tx: mpsc::Sender<LinkEvent>,
    ) -> Self {
        Self {
            service,
            url: url.into(),
            options,
            ids: CallIdGen::new(),
            pending: Arc::new(PendingCallTable::new()),
            state: Arc::new(RwLock::new(LinkState::Disconnected)),
            conn_tx: Arc::new(RwLock::new(None)),
            event_tx,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Start dialing the service. Runs until [`disconnect`](Self::disconnect):
    /// the first attempt happens immediately, retries back off 1s doubling up
    /// to the configured cap, and the backoff resets after every successful
    /// connection. Calling this twice is a no-op.
    pub fn connect(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let service = self.service;
        let url = self.url.clone();
        let options = self.options.clone();
        let pending = self.pending.clone();
        let state = self.state.clone();
        let conn_tx = self.conn_tx.clone();
        let event_tx = self.event_tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                if cancel.is_cancelled() {
                    break;
                }

                *state.write().await = LinkState::Connecting;
                match tokio_tungstenite::connect_async(&url).await {
                    Ok((stream, _)) => {
                        attempt = 0;
                        *state.write().await = LinkState::Connected;
                        debug!(service = %service, url = %url, "backend link up");
                        let _ = event_tx.send(LinkEvent::Connected { service }).await;

                        run_connection(service, stream, &pending, &conn_tx, &event_tx, &cancel)
                            .await;

                        // Take the writer away first so no new call can
                        // register behind the rejection sweep.
                        conn_tx.write().await.take();
                        *state.write().await = LinkState::Disconnected;
                        let rejected = pending.reject_all(CallError::ConnectionLost).await;
                        if rejected > 0 {
                            debug!(service = %service, rejected, "rejected in-flight calls");
                        }
                        let _ = event_tx.send(LinkEvent::Disconnected { service }).await;
                    }
                    Err(error) => {
                        *state.write().await = LinkState::Disconnected;
                        debug!(service = %service, url = %url, %error, "backend connect failed");
                    }
                }

                if cancel.is_cancelled() {
                    break;
                }
                let delay = Duration::from_secs(1 << attempt.min(6)).min(options.max_backoff);
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            conn_tx.write().await.take();
            *state.write().await = LinkState::Disconnected;
            pending.reject_all(CallError::ConnectionLost).await;
        });
    }

    /// Stop the link for good. In-flight calls resolve as connection-lost.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub async fn state(&self) -> LinkState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == LinkState::Connected
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    /// Issue a correlated call and await its settlement.
    pub async fn send(&self, method: &str, args: Value) -> Result<Value, LinkError> {
        let Some(tx) = self.conn_tx.read().await.clone() else {
            return Err(LinkError::NotConnected {
                service: self.service,
            });
        };

        let request_id = self.ids.next_id();
        let frame = BackendRequest::Request {
            request_id: request_id.clone(),
            method: method.to_string(),
            args,
        };
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(error) => {
                warn!(service = %self.service, %error, "unserializable backend request");
                return Err(LinkError::Send {
                    service: self.service,
                });
            }
        };

        let rx = self.pending.register(request_id.as_str()).await;
        if tx.send(json).await.is_err() {
            self.pending.discard(&request_id).await;
            return Err(LinkError::Send {
                service: self.service,
            });
        }

        Ok(self
            .pending
            .await_settlement(&request_id, rx, self.options.request_timeout, method)
            .await?)
    }

    /// Acknowledge a consumed step tick. Uncorrelated: nothing is registered
    /// and no reply is awaited.
    pub async fn confirm_step(&self, resource_id: &str) -> Result<(), LinkError> {
        let Some(tx) = self.conn_tx.read().await.clone() else {
            return Err(LinkError::NotConnected {
                service: self.service,
            });
        };

        let frame = BackendRequest::ConfirmStep {
            resource_id: resource_id.to_string(),
        };
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(error) => {
                warn!(service = %self.service, %error, "unserializable confirm frame");
                return Err(LinkError::Send {
                    service: self.service,
                });
            }
        };
        tx.send(json).await.map_err(|_| LinkError::Send {
            service: self.service,
        })
    }
}

impl Drop for BackendLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Drive one live connection until the socket dies or the link is stopped.
async fn run_connection(
    service: ServiceKind,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: &PendingCallTable,
    conn_tx: &RwLock<Option<mpsc::Sender<String>>>,
    event_tx: &mpsc::Sender<LinkEvent>,
    cancel: &CancellationToken,
) {
    let (mut ws_write, mut ws_read) = stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(100);
    *conn_tx.write().await = Some(tx);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(Message::Close(None)).await;
                break;
            }
            queued = rx.recv() => {
                match queued {
                    Some(json) => {
                        if let Err(error) = ws_write.send(Message::Text(json.into())).await {
                            debug!(service = %service, %error, "backend write failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BackendReply>(text.as_str()) {
                            Ok(reply) => handle_reply(service, reply, pending, event_tx).await,
                            Err(error) => {
                                warn!(service = %service, %error, "dropping undecodable backend frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(service = %service, "backend closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(service = %service, %error, "backend socket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatch one backend frame: correlated replies settle the pending table,
/// everything else becomes a [`LinkEvent`].
async fn handle_reply(
    service: ServiceKind,
    reply: BackendReply,
    pending: &PendingCallTable,
    event_tx: &mpsc::Sender<LinkEvent>,
) {
    match reply {
        BackendReply::Response { request_id, result } => {
            if !pending.settle(&request_id, Ok(result)).await {
                trace!(service = %service, request_id = %request_id, "response matched no pending call");
            }
        }
        BackendReply::Error { request_id, error } => {
            if !pending
                .settle(&request_id, Err(CallError::Backend(error)))
                .await
            {
                trace!(service = %service, request_id = %request_id, "error matched no pending call");
            }
        }
        BackendReply::Event { event } => {
            let _ = event_tx
                .send(LinkEvent::Event {
                    service,
                    payload: event,
                })
                .await;
        }
        BackendReply::Step { step } => {
            let _ = event_tx
                .send(LinkEvent::Step {
                    service,
                    payload: step,
                })
                .await;
        }
        BackendReply::Message { data } => {
            let _ = event_tx
                .send(LinkEvent::Message {
                    service,
                    payload: data,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::future::Future;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_options() -> LinkOptions {
        LinkOptions {
            request_timeout: Duration::from_secs(2),
            max_backoff: Duration::from_secs(1),
        }
    }

    /// Loop-accepting mock service; `handler` runs per accepted connection.
    async fn mock_backend<F, Fut>(handler: F) -> String
    where
        F: Fn(WebSocketStream<TcpStream>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        handler(ws).await;
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    /// Answers every request with `{"echo": method}`, errors for methods
    /// containing "fail", and ignores confirm frames.
    async fn echo_service(mut ws: WebSocketStream<TcpStream>) {
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(request) = serde_json::from_str::<BackendRequest>(text.as_str()) else {
                continue;
            };
            if let BackendRequest::Request {
                request_id, method, ..
            } = request
            {
                let reply = if method.contains("fail") {
                    BackendReply::Error {
                        request_id,
                        error: json!({ "code": "FAIL", "method": method }),
                    }
                } else {
                    BackendReply::Response {
                        request_id,
                        result: json!({ "echo": method }),
                    }
                };
                let text = serde_json::to_string(&reply).unwrap();
                if ws.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    async fn wait_for_connected(events: &mut mpsc::Receiver<LinkEvent>) {
        timeout(TEST_TIMEOUT, async {
            while let Some(event) = events.recv().await {
                if matches!(event, LinkEvent::Connected { .. }) {
                    return;
                }
            }
            panic!("event channel closed before the link connected");
        })
        .await
        .expect("link never connected");
    }

    #[tokio::test]
    async fn call_round_trips_through_the_link() {
        let url = mock_backend(echo_service).await;
        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Graph, url, test_options(), event_tx);
        link.connect();
        wait_for_connected(&mut events).await;

        let result = link.send("graph.load", json!({ "graphId": "g1" })).await;
        assert_eq!(result.unwrap(), json!({ "echo": "graph.load" }));
    }

    #[tokio::test]
    async fn error_reply_becomes_a_backend_call_error() {
        let url = mock_backend(echo_service).await;
        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Machine, url, test_options(), event_tx);
        link.connect();
        wait_for_connected(&mut events).await;

        let error = link.send("machine.fail", json!({})).await.unwrap_err();
        let LinkError::Call(CallError::Backend(payload)) = error else {
            panic!("expected a backend error, got {error:?}");
        };
        assert_eq!(payload["code"], "FAIL");
    }

    #[tokio::test]
    async fn send_fails_fast_while_disconnected() {
        // Nothing listens on port 1; the link stays down.
        let (event_tx, _events) = mpsc::channel(16);
        let link = BackendLink::new(
            ServiceKind::Graph,
            "ws://127.0.0.1:1",
            test_options(),
            event_tx,
        );
        link.connect();

        let error = link.send("graph.load", json!({})).await.unwrap_err();
        assert!(matches!(error, LinkError::NotConnected { .. }), "got {error:?}");
    }

    #[tokio::test]
    async fn socket_drop_rejects_the_in_flight_call() {
        // Reads one request, then drops the connection without answering.
        let url = mock_backend(|mut ws: WebSocketStream<TcpStream>| async move {
            let _ = ws.next().await;
        })
        .await;
        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Graph, url, test_options(), event_tx);
        link.connect();
        wait_for_connected(&mut events).await;

        let error = timeout(TEST_TIMEOUT, link.send("graph.load", json!({})))
            .await
            .expect("send hung")
            .unwrap_err();
        assert!(
            matches!(error, LinkError::Call(CallError::ConnectionLost)),
            "got {error:?}"
        );
    }

    #[tokio::test]
    async fn link_reconnects_after_a_drop() {
        let first = Arc::new(AtomicBool::new(true));
        let url = mock_backend(move |ws: WebSocketStream<TcpStream>| {
            let first = first.clone();
            async move {
                if first.swap(false, Ordering::SeqCst) {
                    drop(ws);
                    return;
                }
                echo_service(ws).await;
            }
        })
        .await;

        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Machine, url, test_options(), event_tx);
        link.connect();

        // First connection drops, the link backs off and dials again.
        wait_for_connected(&mut events).await;
        timeout(TEST_TIMEOUT, async {
            while let Some(event) = events.recv().await {
                if matches!(event, LinkEvent::Disconnected { .. }) {
                    return;
                }
            }
            panic!("event channel closed early");
        })
        .await
        .expect("no disconnect observed");
        wait_for_connected(&mut events).await;

        let result = link.send("machine.start", json!({ "machineId": "m1" })).await;
        assert_eq!(result.unwrap(), json!({ "echo": "machine.start" }));
    }

    #[tokio::test]
    async fn confirm_step_is_uncorrelated() {
        let (seen_tx, mut seen) = mpsc::unbounded_channel::<String>();
        let url = mock_backend(move |mut ws: WebSocketStream<TcpStream>| {
            let seen_tx = seen_tx.clone();
            async move {
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    match serde_json::from_str::<BackendRequest>(text.as_str()) {
                        Ok(BackendRequest::ConfirmStep { resource_id }) => {
                            let _ = seen_tx.send(resource_id);
                        }
                        Ok(BackendRequest::Request {
                            request_id, method, ..
                        }) => {
                            let reply = BackendReply::Response {
                                request_id,
                                result: json!({ "echo": method }),
                            };
                            let text = serde_json::to_string(&reply).unwrap();
                            let _ = ws.send(Message::Text(text.into())).await;
                        }
                        Err(_) => {}
                    }
                }
            }
        })
        .await;

        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Machine, url, test_options(), event_tx);
        link.connect();
        wait_for_connected(&mut events).await;

        link.confirm_step("m7").await.unwrap();
        let confirmed = timeout(TEST_TIMEOUT, seen.recv())
            .await
            .expect("confirm frame never arrived")
            .unwrap();
        assert_eq!(confirmed, "m7");

        // The correlation machinery is untouched; a normal call still works.
        let result = link.send("machine.status", json!({})).await;
        assert_eq!(result.unwrap(), json!({ "echo": "machine.status" }));
    }

    #[tokio::test]
    async fn undecodable_backend_frame_is_dropped() {
        let url = mock_backend(|mut ws: WebSocketStream<TcpStream>| async move {
            let _ = ws.send(Message::Text("not json".into())).await;
            echo_service(ws).await;
        })
        .await;

        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Graph, url, test_options(), event_tx);
        link.connect();
        wait_for_connected(&mut events).await;

        // The garbage frame did not kill the connection.
        let result = link.send("graph.subscribe", json!({ "graphId": "g1" })).await;
        assert_eq!(result.unwrap(), json!({ "echo": "graph.subscribe" }));
    }

    #[tokio::test]
    async fn disconnect_is_terminal() {
        let url = mock_backend(echo_service).await;
        let (event_tx, mut events) = mpsc::channel(16);
        let link = BackendLink::new(ServiceKind::Graph, url, test_options(), event_tx);
        link.connect();
        wait_for_connected(&mut events).await;

        link.disconnect();
        timeout(TEST_TIMEOUT, async {
            while link.state().await != LinkState::Disconnected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("link never went down");

        // Past one full backoff, still down: no reconnect after a deliberate stop.
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(link.state().await, LinkState::Disconnected);

        let error = link.send("graph.load", json!({})).await.unwrap_err();
        assert!(matches!(error, LinkError::NotConnected { .. }), "got {error:?}");
    }
}
