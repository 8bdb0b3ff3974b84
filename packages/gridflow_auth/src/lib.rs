//! Signed-token identity primitives for Gridflow.
//!
//! The gateway treats authentication as an external concern; this package is
//! the collaborator that turns transport credentials into a verified
//! [`UserIdentity`]. Tokens are ed25519-signed JSON claims: whoever holds the
//! signing key mints them, the gateway only verifies.

pub mod encoding;
pub mod error;
pub mod identity;
pub mod keys;
pub mod token;

pub use error::AuthError;
pub use identity::UserIdentity;
pub use keys::{PublicKey, Signature, SigningKey};
pub use token::{TokenClaims, TokenIssuer, TokenVerifier, now_unix};
