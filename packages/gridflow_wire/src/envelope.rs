//! Client-facing wire envelopes.
//!
//! Field names are camelCase on the wire (`requestId`, `requestType`) because
//! deployed front ends already speak that shape; the `type` tag selects the
//! variant in both directions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two backend compute services behind the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Graph,
    Machine,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Graph, ServiceKind::Machine];

    /// Response-slot name for this service, also the stem of its status events.
    pub fn slot_name(&self) -> &'static str {
        match self {
            Self::Graph => "graphserver",
            Self::Machine => "machineserver",
        }
    }

    /// Client-visible status event name: `graphserver_connected` etc.
    pub fn status_event(&self, connected: bool) -> String {
        let state = if connected {
            "connected"
        } else {
            "disconnected"
        };
        format!("{}_{state}", self.slot_name())
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot_name())
    }
}

/// Identity snapshot stamped onto every gateway→client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Stable for the whole life of the connection, even as `user` changes.
    pub id: String,
    pub user: SessionUser,
}

/// The user half of a session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SessionUser {
    /// Unauthenticated sessions render as the `anon` user.
    pub fn anonymous(display_name: impl Into<String>) -> Self {
        Self {
            id: "anon".to_string(),
            display_name: display_name.into(),
            roles: Vec::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == "anon"
    }
}

/// Client → gateway frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// A correlated request. A `topic` marks bus-bound traffic that is
    /// republished instead of dispatched to the backends.
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        method: String,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },
    /// Keepalive. The gateway ignores it entirely: no identity refresh, no
    /// dispatch, no reply.
    Ping,
    /// Tear down every session belonging to this user.
    Logout,
}

/// Gateway → client frames, before the session snapshot is stamped on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Joined fan-out result for one request.
    Response(ResponseBody),
    /// Request-level failure with no backend slot to carry it.
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: Value,
    },
    /// Out-of-band event: built-in status events, step ticks, or forwarded
    /// bus payloads. The inner `type` field names the event.
    Event { event: Value },
}

impl ServerEnvelope {
    /// Inner event type tag, if this is an event frame.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            Self::Event { event } => event.get("type").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Joined result of one request's backend fan-out.
///
/// Each slot is present only when that service was asked, and holds either the
/// service's payload or an `{error}` object. Both slots are populated
/// independently; neither waits on the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub request_id: String,
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphserver: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machineserver: Option<Value>,
}

impl ResponseBody {
    pub fn new(request_id: impl Into<String>, request_type: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            request_type: request_type.into(),
            graphserver: None,
            machineserver: None,
        }
    }

    pub fn set_slot(&mut self, service: ServiceKind, value: Value) {
        match service {
            ServiceKind::Graph => self.graphserver = Some(value),
            ServiceKind::Machine => self.machineserver = Some(value),
        }
    }

    pub fn slot(&self, service: ServiceKind) -> Option<&Value> {
        match service {
            ServiceKind::Graph => self.graphserver.as_ref(),
            ServiceKind::Machine => self.machineserver.as_ref(),
        }
    }
}

/// What actually goes over the client socket: the envelope plus the current
/// session snapshot, flattened into one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFrame {
    #[serde(flatten)]
    pub body: ServerEnvelope,
    pub session: SessionSnapshot,
}

impl SessionFrame {
    pub fn new(body: ServerEnvelope, session: SessionSnapshot) -> Self {
        Self { body, session }
    }
}
