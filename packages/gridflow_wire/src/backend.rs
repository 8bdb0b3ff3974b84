//! Gateway ↔ backend-service wire frames.
//!
//! Same conventions as the client envelopes, one enum per direction. The
//! gateway is always the connecting side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gateway → backend frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendRequest {
    /// Correlated call; the backend must answer with a `response` or `error`
    /// frame carrying the same `requestId`.
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        method: String,
        #[serde(default)]
        args: Value,
    },
    /// Uncorrelated step acknowledgement. Tells the backend the client has
    /// consumed a prior step tick, so it may emit the next one.
    #[serde(rename_all = "camelCase")]
    ConfirmStep { resource_id: String },
}

/// Backend → gateway frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendReply {
    /// Successful answer to a correlated call.
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        #[serde(default)]
        result: Value,
    },
    /// Failed answer to a correlated call.
    #[serde(rename_all = "camelCase")]
    Error { request_id: String, error: Value },
    /// Business event addressed to connected clients.
    Event { event: Value },
    /// Execution tick. Forwarded on the lossy path, never queued.
    Step { step: Value },
    /// Raw payload passed through to the client unchanged.
    Message { data: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize_request() {
        let msg = BackendRequest::Request {
            request_id: "e-7".to_string(),
            method: "graph.update".to_string(),
            args: json!({ "cells": ["A1"] }),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "request",
                "requestId": "e-7",
                "method": "graph.update",
                "args": { "cells": ["A1"] }
            })
        );
    }

    #[test]
    fn serialize_confirm_step() {
        let msg = BackendRequest::ConfirmStep {
            resource_id: "m1".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "confirm_step", "resourceId": "m1" })
        );
    }

    #[test]
    fn deserialize_response_defaults_result() {
        let v = json!({ "type": "response", "requestId": "e-9" });
        let msg: BackendReply = serde_json::from_value(v).unwrap();
        assert_eq!(
            msg,
            BackendReply::Response {
                request_id: "e-9".to_string(),
                result: Value::Null,
            }
        );
    }

    #[test]
    fn reply_variants_roundtrip() {
        let replies = vec![
            BackendReply::Error {
                request_id: "e-1".to_string(),
                error: json!({ "code": "NOT_FOUND" }),
            },
            BackendReply::Event {
                event: json!({ "type": "sheet_changed", "sheetId": "s1" }),
            },
            BackendReply::Step {
                step: json!({ "type": "step", "machineId": "m1", "cycle": 42 }),
            },
            BackendReply::Message {
                data: json!({ "anything": true }),
            },
        ];
        for reply in replies {
            let text = serde_json::to_string(&reply).unwrap();
            let back: BackendReply = serde_json::from_str(&text).unwrap();
            assert_eq!(back, reply);
        }
    }
}
