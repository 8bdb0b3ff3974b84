//! Message transform hooks.
//!
//! Interceptors see every correlated request on its way to the backends and
//! every assembled response on its way back to the client. The stock chain
//! carries only the payload trimmer; deployments add their own.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

use gridflow_wire::SessionUser;

/// Transient per-message transform state.
///
/// `graph` and `machine` govern which backends an outbound request fans out
/// to; an interceptor may clear either to steer the request.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub session_id: String,
    pub user: SessionUser,
    pub message: Value,
    pub graph: bool,
    pub machine: bool,
}

impl MessageContext {
    pub fn new(session_id: impl Into<String>, user: SessionUser, message: Value) -> Self {
        Self {
            session_id: session_id.into(),
            user,
            message,
            graph: true,
            machine: true,
        }
    }
}

/// A message transform. Both hooks default to identity; implement the one
/// you need.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Runs before an inbound request fans out to the backends.
    async fn before_send_to_server(&self, context: MessageContext) -> MessageContext {
        context
    }

    /// Runs before an assembled response is sent to the client.
    async fn before_send_to_client(&self, context: MessageContext) -> MessageContext {
        context
    }
}

/// Ordered interceptor pipeline. Empty means identity.
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub async fn before_send_to_server(&self, mut context: MessageContext) -> MessageContext {
        for interceptor in &self.interceptors {
            context = interceptor.before_send_to_server(context).await;
        }
        context
    }

    pub async fn before_send_to_client(&self, mut context: MessageContext) -> MessageContext {
        for interceptor in &self.interceptors {
            context = interceptor.before_send_to_client(context).await;
        }
        context
    }
}

/// Strips the full graph definition out of command responses.
///
/// Command responses embed the entire recalculated graph under
/// `response.graph.graphdef` in the graph slot. Subscribed clients already
/// receive the same data as change events, so the copy here is dead weight
/// on every edit.
pub struct PayloadTrimInterceptor;

#[async_trait]
impl Interceptor for PayloadTrimInterceptor {
    async fn before_send_to_client(&self, mut context: MessageContext) -> MessageContext {
        let is_command = context
            .message
            .get("requestType")
            .and_then(Value::as_str)
            .is_some_and(|t| t.rsplit('.').next() == Some("command"));
        if !is_command {
            return context;
        }

        let removed = context
            .message
            .get_mut("graphserver")
            .and_then(|slot| slot.get_mut("response"))
            .and_then(|response| response.get_mut("graph"))
            .and_then(Value::as_object_mut)
            .and_then(|graph| graph.remove("graphdef"));
        if removed.is_some() {
            trace!(session_id = %context.session_id, "trimmed graphdef from command response");
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with(message: Value) -> MessageContext {
        MessageContext::new("s-1", SessionUser::anonymous("Guest"), message)
    }

    fn command_response() -> Value {
        json!({
            "requestId": "1a2b-1",
            "requestType": "graph.command",
            "graphserver": {
                "response": {
                    "graph": {
                        "graphdef": { "cells": { "A1": "=B1+1" } },
                        "revision": 42
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        let chain = InterceptorChain::new();
        assert!(chain.is_empty());

        let context = context_with(command_response());
        let out = chain.before_send_to_client(context).await;
        assert_eq!(out.message, command_response());
        assert!(out.graph && out.machine);
    }

    #[tokio::test]
    async fn trim_strips_graphdef_from_command_responses() {
        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(PayloadTrimInterceptor));

        let out = chain
            .before_send_to_client(context_with(command_response()))
            .await;
        let graph = &out.message["graphserver"]["response"]["graph"];
        assert!(graph.get("graphdef").is_none());
        // Everything next to it survives.
        assert_eq!(graph["revision"], 42);
    }

    #[tokio::test]
    async fn non_command_responses_pass_untouched() {
        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(PayloadTrimInterceptor));

        let mut message = command_response();
        message["requestType"] = json!("graph.load");
        let out = chain.before_send_to_client(context_with(message.clone())).await;
        assert_eq!(out.message, message);
    }

    #[tokio::test]
    async fn missing_path_is_a_no_op() {
        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(PayloadTrimInterceptor));

        let message = json!({
            "requestId": "1a2b-2",
            "requestType": "machine.command",
            "machineserver": { "state": "running" }
        });
        let out = chain.before_send_to_client(context_with(message.clone())).await;
        assert_eq!(out.message, message);
    }

    #[tokio::test]
    async fn interceptors_run_in_push_order_and_may_steer_routing() {
        struct GraphOnly;
        #[async_trait]
        impl Interceptor for GraphOnly {
            async fn before_send_to_server(&self, mut context: MessageContext) -> MessageContext {
                context.machine = false;
                context
            }
        }

        struct Tag(&'static str);
        #[async_trait]
        impl Interceptor for Tag {
            async fn before_send_to_server(&self, mut context: MessageContext) -> MessageContext {
                if let Some(tags) = context.message["tags"].as_array_mut() {
                    tags.push(json!(self.0));
                }
                context
            }
        }

        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(Tag("first")));
        chain.push(Arc::new(GraphOnly));
        chain.push(Arc::new(Tag("second")));

        let out = chain
            .before_send_to_server(context_with(json!({ "tags": [] })))
            .await;
        assert_eq!(out.message["tags"], json!(["first", "second"]));
        assert!(out.graph);
        assert!(!out.machine);
    }
}
