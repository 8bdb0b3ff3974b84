//! WebSocket client for the Gridflow gateway.
//!
//! [`GatewayClient`] turns the gateway's frame transport into a call/reply
//! interface: outbound requests are correlated by identifier with a per-call
//! deadline, while events pushed by the gateway fan out to registered
//! listeners. Convenience wrappers for the common graph and machine verbs
//! live on the client itself.

mod api;
pub mod client;
pub mod error;
pub mod listeners;

pub use client::{ClientOptions, GatewayClient};
pub use error::ClientError;
pub use listeners::{EventListeners, ListenerId};

pub use gridflow_wire::CallError;
