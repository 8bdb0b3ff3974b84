//! Failure taxonomy for correlated calls.

use std::time::Duration;

use serde_json::{Value, json};

/// Why a correlated call failed to produce a result payload.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// No reply arrived before the deadline. The pending entry is purged, so
    /// a late reply matches nothing.
    #[error("call '{method}' timed out after {elapsed:?}")]
    Timeout { method: String, elapsed: Duration },

    /// The underlying channel died with the call still outstanding.
    #[error("connection lost with call outstanding")]
    ConnectionLost,

    /// The remote side answered with a business-level error payload.
    #[error("backend error: {0}")]
    Backend(Value),

    /// The proxy was already shut down when the call was issued.
    #[error("channel closed")]
    Closed,
}

impl CallError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::ConnectionLost => "connection_lost",
            Self::Backend(_) => "backend_error",
            Self::Closed => "closed",
        }
    }

    /// Render into the `{error}` object a response slot carries. Backend
    /// errors keep their payload; transport-level failures render as text.
    pub fn to_slot_value(&self) -> Value {
        match self {
            Self::Backend(payload) => json!({ "error": payload }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_keeps_payload() {
        let err = CallError::Backend(json!({ "code": "NOT_FOUND", "id": "g1" }));
        assert_eq!(
            err.to_slot_value(),
            json!({ "error": { "code": "NOT_FOUND", "id": "g1" } })
        );
    }

    #[test]
    fn transport_errors_render_as_text() {
        let err = CallError::Timeout {
            method: "machine.start".to_string(),
            elapsed: Duration::from_secs(20),
        };
        let slot = err.to_slot_value();
        let text = slot["error"].as_str().unwrap();
        assert!(text.contains("machine.start"), "got: {text}");

        assert_eq!(
            CallError::ConnectionLost.to_slot_value(),
            json!({ "error": "connection lost with call outstanding" })
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(CallError::ConnectionLost.error_code(), "connection_lost");
        assert_eq!(CallError::Closed.error_code(), "closed");
        assert_eq!(
            CallError::Backend(Value::Null).error_code(),
            "backend_error"
        );
    }
}
