//! Shared wire protocol for the Gridflow gateway and its clients.
//!
//! Everything that crosses a socket in this system is a JSON text frame shaped
//! by one of the envelope enums here. The correlation machinery
//! ([`PendingCallTable`], [`CallIdGen`]) lives alongside the envelopes because
//! both sides of the wire (the gateway's backend links and the client library)
//! run the same call/reply matching.

pub mod backend;
pub mod envelope;
pub mod error;
pub mod id;
pub mod pending;

pub use backend::{BackendReply, BackendRequest};
pub use envelope::{
    ClientEnvelope, ResponseBody, ServerEnvelope, ServiceKind, SessionFrame, SessionSnapshot,
    SessionUser,
};
pub use error::CallError;
pub use id::CallIdGen;
pub use pending::{PendingCallTable, Settlement};
