//! One multiplexed client session.
//!
//! A session owns its two backend links, one bus subscription, and the
//! client socket. Inbound frames are processed strictly in arrival order;
//! each correlated request fans out to both backends concurrently and the
//! joined response is sent before the next frame is read. Events flow to
//! the client through the shared outbound queue, except step ticks which
//! take a lossy non-blocking path.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gridflow_wire::{
    CallError, ClientEnvelope, ResponseBody, ServerEnvelope, ServiceKind, SessionFrame,
    SessionSnapshot, SessionUser,
};

use crate::backend::{BackendLink, LinkError, LinkEvent, LinkOptions};
use crate::bus::SubscriptionSet;
use crate::server::AppState;
use crate::ws::interceptor::MessageContext;
use crate::ws::registry::SessionHandle;

/// Drive one client connection from upgrade to teardown.
pub async fn handle_session(socket: WebSocket, app: AppState, token: Option<String>) {
    let session_id = Uuid::new_v4().to_string();

    // Establish identity before anything is wired up. Presented-but-invalid
    // credentials reject the connection outright.
    let user = match app.authenticator.resolve(token.as_deref()).await {
        Ok(Some(identity)) => SessionUser {
            id: identity.id,
            display_name: identity.display_name,
            roles: identity.roles,
        },
        Ok(None) => SessionUser::anonymous(&app.anonymous_display_name),
        Err(error) => {
            app.metrics.auth_failure();
            warn!(session_id = %session_id, %error, "rejecting connection with bad credentials");
            return;
        }
    };
    info!(session_id = %session_id, user = %user.display_name, "session established");
    app.metrics.session_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEnvelope>(app.server.outbound_buffer);
    let session_user = Arc::new(RwLock::new(user.clone()));

    // Backend links, one per service, sharing one event stream.
    let (link_event_tx, mut link_events) = mpsc::channel::<LinkEvent>(64);
    let link_options = LinkOptions {
        request_timeout: app.backends.request_timeout,
        max_backoff: app.backends.reconnect_max_backoff,
    };
    let graph_link = Arc::new(BackendLink::new(
        ServiceKind::Graph,
        app.backends.url_for(ServiceKind::Graph),
        link_options.clone(),
        link_event_tx.clone(),
    ));
    let machine_link = Arc::new(BackendLink::new(
        ServiceKind::Machine,
        app.backends.url_for(ServiceKind::Machine),
        link_options,
        link_event_tx,
    ));
    graph_link.connect();
    machine_link.connect();

    // Default bus subscriptions. Adding a prefix twice is a no-op.
    let mut bus_rx = app.bus.subscribe();
    let mut subscriptions = SubscriptionSet::new();
    for prefix in app.topics.session_defaults() {
        subscriptions.add(prefix);
    }

    let cancel = CancellationToken::new();
    app.registry
        .insert(SessionHandle {
            session_id: session_id.clone(),
            user_id: user.id.clone(),
            cancel: cancel.clone(),
            outbound: tx.clone(),
        })
        .await;

    // Session bootstrap: init event plus one status event per link, so the
    // client starts from a known picture. The stamped frame carries the
    // session snapshot.
    let _ = tx
        .send(ServerEnvelope::Event {
            event: json!({ "type": "session_init" }),
        })
        .await;
    for link in [&graph_link, &machine_link] {
        let connected = link.is_connected().await;
        let _ = tx
            .send(ServerEnvelope::Event {
                event: json!({ "type": link.service().status_event(connected) }),
            })
            .await;
    }
    debug!(session_id = %session_id, "session active");

    // Sender task: stamp the current session snapshot onto every frame and
    // write it out.
    let sender_session_id = session_id.clone();
    let sender_user = session_user.clone();
    let sender_metrics = app.metrics.clone();
    let sender_task = async move {
        while let Some(envelope) = rx.recv().await {
            let is_event = matches!(envelope, ServerEnvelope::Event { .. });
            let session = SessionSnapshot {
                id: sender_session_id.clone(),
                user: sender_user.read().await.clone(),
            };
            let frame = SessionFrame::new(envelope, session);
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(error) => {
                    error!(session_id = %sender_session_id, %error, "unserializable outbound frame");
                    continue;
                }
            };
            if let Err(error) = ws_sender.send(Message::Text(text.into())).await {
                // The client is already gone.
                debug!(session_id = %sender_session_id, %error, "client send failed");
                sender_metrics.websocket_error();
                break;
            }
            if is_event {
                sender_metrics.event_sent();
            } else {
                sender_metrics.response_sent();
            }
        }
    };

    // Link event task: turn link events into client event frames. Step ticks
    // use try_send so a slow client sheds them instead of queueing them.
    let link_tx = tx.clone();
    let link_metrics = app.metrics.clone();
    let link_session_id = session_id.clone();
    let link_event_task = async move {
        let mut seen_connected = HashSet::new();
        while let Some(event) = link_events.recv().await {
            let payload = match event {
                LinkEvent::Connected { service } => {
                    if !seen_connected.insert(service) {
                        link_metrics.backend_reconnect();
                    }
                    json!({ "type": service.status_event(true) })
                }
                LinkEvent::Disconnected { service } => {
                    json!({ "type": service.status_event(false) })
                }
                LinkEvent::Step { service, payload } => {
                    let event = json!({
                        "type": "step",
                        "service": service.slot_name(),
                        "step": payload,
                    });
                    match link_tx.try_send(ServerEnvelope::Event { event }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            link_metrics.step_dropped();
                            debug!(
                                session_id = %link_session_id,
                                service = %service,
                                "dropping step tick, client channel full"
                            );
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                    continue;
                }
                LinkEvent::Message { service, payload } => {
                    json!({ "type": "message", "service": service.slot_name(), "data": payload })
                }
                LinkEvent::Event { service, payload } => {
                    // Backend events that already carry a type pass through as
                    // themselves.
                    if payload.get("type").is_some() {
                        payload
                    } else {
                        json!({
                            "type": "backend_event",
                            "service": service.slot_name(),
                            "event": payload,
                        })
                    }
                }
            };
            if link_tx
                .send(ServerEnvelope::Event { event: payload })
                .await
                .is_err()
            {
                break;
            }
        }
    };

    // Bus task: forward matching topics, minus the excluded internal chatter.
    let bus_tx = tx.clone();
    let bus_metrics = app.metrics.clone();
    let bus_filter = app.filter.clone();
    let bus_session_id = session_id.clone();
    let bus_task = async move {
        loop {
            match bus_rx.recv().await {
                Ok(message) => {
                    if !subscriptions.matches(&message.topic) {
                        continue;
                    }
                    if !bus_filter.allows(&message.topic) {
                        debug!(
                            session_id = %bus_session_id,
                            topic = %message.topic,
                            "suppressing internal bus chatter"
                        );
                        continue;
                    }
                    let event = json!({
                        "type": "bus_message",
                        "topic": message.topic,
                        "payload": message.payload,
                    });
                    if bus_tx.send(ServerEnvelope::Event { event }).await.is_err() {
                        break;
                    }
                    bus_metrics.bus_message_forwarded();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(session_id = %bus_session_id, missed, "bus subscription lagged");
                    bus_metrics.events_dropped_by(missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    // Inbound task: strict arrival order. Each request's fan-out completes
    // before the next frame is read.
    let inbound_app = app.clone();
    let inbound_tx = tx.clone();
    let inbound_session_id = session_id.clone();
    let inbound_user = session_user.clone();
    let inbound_cancel = cancel.clone();
    let inbound_graph = graph_link.clone();
    let inbound_machine = machine_link.clone();
    let inbound_task = async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let envelope = match serde_json::from_str::<ClientEnvelope>(text.as_str()) {
                        Ok(envelope) => envelope,
                        Err(error) => {
                            inbound_app.metrics.malformed_message();
                            let preview: String = text.chars().take(120).collect();
                            warn!(
                                session_id = %inbound_session_id,
                                %error,
                                preview = %preview,
                                "dropping undecodable client frame"
                            );
                            continue;
                        }
                    };

                    // Pings never refresh identity or dispatch.
                    if envelope == ClientEnvelope::Ping {
                        continue;
                    }

                    // Re-resolve identity from the connection's credentials.
                    // The session id survives the change; a failure here ends
                    // every session this user holds.
                    match inbound_app.authenticator.resolve(token.as_deref()).await {
                        Ok(resolved) => {
                            let refreshed = match resolved {
                                Some(identity) => SessionUser {
                                    id: identity.id,
                                    display_name: identity.display_name,
                                    roles: identity.roles,
                                },
                                None => {
                                    SessionUser::anonymous(&inbound_app.anonymous_display_name)
                                }
                            };
                            let mut current = inbound_user.write().await;
                            if *current != refreshed {
                                info!(
                                    session_id = %inbound_session_id,
                                    user = %refreshed.display_name,
                                    "session identity changed"
                                );
                                inbound_app
                                    .registry
                                    .update_user(&inbound_session_id, &refreshed.id)
                                    .await;
                                *current = refreshed;
                            }
                        }
                        Err(error) => {
                            inbound_app.metrics.auth_failure();
                            warn!(
                                session_id = %inbound_session_id,
                                %error,
                                "credential refresh failed, forcing logout"
                            );
                            let user = inbound_user.read().await.clone();
                            if user.is_anonymous() {
                                inbound_cancel.cancel();
                            } else {
                                inbound_app.registry.logout_user(&user.id).await;
                            }
                            break;
                        }
                    }

                    match envelope {
                        ClientEnvelope::Logout => {
                            let user = inbound_user.read().await.clone();
                            info!(
                                session_id = %inbound_session_id,
                                user = %user.display_name,
                                "client logout"
                            );
                            if user.is_anonymous() {
                                // A guest logout only ends this session.
                                inbound_cancel.cancel();
                            } else {
                                inbound_app.registry.logout_user(&user.id).await;
                            }
                            break;
                        }
                        ClientEnvelope::Request {
                            request_id,
                            method,
                            args,
                            topic,
                        } => {
                            inbound_app.metrics.request_received();

                            // Streaming/persistence traffic is republished onto
                            // the bus instead of dispatched to the backends.
                            if let Some(routing) = topic.as_deref() {
                                if routing.contains("stream") || routing.contains("persistence") {
                                    inbound_app.metrics.bus_message_published();
                                    let payload = json!({
                                        "type": "request",
                                        "requestId": request_id,
                                        "method": method,
                                        "args": args,
                                        "topic": routing,
                                    });
                                    let receivers = inbound_app.bus.publish(routing, payload);
                                    debug!(
                                        session_id = %inbound_session_id,
                                        topic = %routing,
                                        receivers,
                                        "republished onto the bus"
                                    );
                                    continue;
                                }
                            }

                            // machine.confirm_step is the one uncorrelated
                            // verb: forward the acknowledgement, no response.
                            if method == "machine.confirm_step" {
                                if let Some(machine_id) =
                                    args.get("machineId").and_then(Value::as_str)
                                {
                                    if let Err(error) =
                                        inbound_machine.confirm_step(machine_id).await
                                    {
                                        debug!(
                                            session_id = %inbound_session_id,
                                            %error,
                                            "step confirm not delivered"
                                        );
                                    }
                                } else {
                                    warn!(
                                        session_id = %inbound_session_id,
                                        "confirm_step without machineId"
                                    );
                                }
                                continue;
                            }

                            // Outbound interceptors may rewrite the message or
                            // steer the fan-out.
                            let user = inbound_user.read().await.clone();
                            let context = MessageContext::new(
                                inbound_session_id.clone(),
                                user.clone(),
                                json!({
                                    "requestId": request_id,
                                    "method": method,
                                    "args": args,
                                }),
                            );
                            let context =
                                inbound_app.interceptors.before_send_to_server(context).await;
                            let method = context
                                .message
                                .get("method")
                                .and_then(Value::as_str)
                                .unwrap_or(method.as_str())
                                .to_string();
                            let args = context.message.get("args").cloned().unwrap_or(Value::Null);

                            let mut response =
                                ResponseBody::new(request_id.as_str(), method.as_str());

                            // Both calls run concurrently; one failing or
                            // timing out never holds up the other.
                            let graph_call = async {
                                if context.graph {
                                    Some(inbound_graph.send(&method, args.clone()).await)
                                } else {
                                    None
                                }
                            };
                            let machine_call = async {
                                if context.machine {
                                    Some(inbound_machine.send(&method, args.clone()).await)
                                } else {
                                    None
                                }
                            };
                            let (graph_outcome, machine_outcome) =
                                tokio::join!(graph_call, machine_call);

                            for (service, outcome) in [
                                (ServiceKind::Graph, graph_outcome),
                                (ServiceKind::Machine, machine_outcome),
                            ] {
                                let Some(outcome) = outcome else { continue };
                                let value = match outcome {
                                    Ok(payload) => payload,
                                    Err(error) => {
                                        if matches!(
                                            error,
                                            LinkError::Call(CallError::Timeout { .. })
                                        ) {
                                            inbound_app.metrics.backend_timeout();
                                        }
                                        debug!(
                                            session_id = %inbound_session_id,
                                            service = %service,
                                            %error,
                                            "backend call failed"
                                        );
                                        error.to_slot_value()
                                    }
                                };
                                response.set_slot(service, value);
                            }

                            // Inbound interceptors see the assembled body.
                            let body = match serde_json::to_value(&response) {
                                Ok(body) => body,
                                Err(error) => {
                                    error!(
                                        session_id = %inbound_session_id,
                                        %error,
                                        "unserializable response body"
                                    );
                                    continue;
                                }
                            };
                            let context =
                                MessageContext::new(inbound_session_id.clone(), user, body);
                            let context =
                                inbound_app.interceptors.before_send_to_client(context).await;
                            let response = match serde_json::from_value::<ResponseBody>(
                                context.message,
                            ) {
                                Ok(transformed) => transformed,
                                Err(error) => {
                                    warn!(
                                        session_id = %inbound_session_id,
                                        %error,
                                        "interceptor broke the response shape, sending untransformed"
                                    );
                                    response
                                }
                            };
                            if inbound_tx
                                .send(ServerEnvelope::Response(response))
                                .await
                                .is_err()
                            {
                                debug!(
                                    session_id = %inbound_session_id,
                                    "client channel closed before the response"
                                );
                                break;
                            }
                        }
                        ClientEnvelope::Ping => {}
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(session_id = %inbound_session_id, "client closed connection");
                    break;
                }
                Err(error) => {
                    inbound_app.metrics.websocket_error();
                    debug!(session_id = %inbound_session_id, %error, "client socket error");
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(session_id = %session_id, "sender task ended"),
        _ = link_event_task => debug!(session_id = %session_id, "link event task ended"),
        _ = bus_task => debug!(session_id = %session_id, "bus task ended"),
        _ = inbound_task => debug!(session_id = %session_id, "inbound task ended"),
        _ = cancel.cancelled() => debug!(session_id = %session_id, "session cancelled"),
    }

    info!(session_id = %session_id, "session closing");
    graph_link.disconnect();
    machine_link.disconnect();
    app.registry.remove(&session_id).await;
    app.metrics.session_closed();
    info!(session_id = %session_id, "session closed");
}
