//! Connection-level client errors.
//!
//! Failures of individual calls are reported as
//! [`CallError`](gridflow_wire::CallError); this module only covers getting
//! the socket up in the first place.

/// Failure establishing the gateway connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The WebSocket connect or handshake failed.
    #[error("failed to connect to gateway: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}
