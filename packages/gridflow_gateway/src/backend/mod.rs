//! Links to the backend compute services.

mod link;

pub use link::{BackendLink, LinkError, LinkEvent, LinkOptions, LinkState};
