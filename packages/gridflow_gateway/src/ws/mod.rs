//! WebSocket surface: session multiplexing, the session registry, and the
//! interceptor chain that rewrites traffic in both directions.

pub mod interceptor;
pub mod registry;
pub mod session;
