//! Credential resolution for sessions.
//!
//! The gateway re-resolves credentials on every non-ping client message, so
//! an expired token takes effect mid-session instead of at the next connect.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use gridflow_auth::{AuthError, PublicKey, TokenVerifier, UserIdentity};

use crate::config::AuthConfig;

/// Maps transport-level credentials to a user identity.
///
/// `Ok(None)` means no credentials were presented and the session runs as the
/// anonymous user. `Err` means credentials were presented and failed, which
/// forces a logout.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn resolve(&self, credentials: Option<&str>) -> Result<Option<UserIdentity>, AuthError>;
}

/// Resolves every connection as anonymous. Used when `[auth]` is disabled.
pub struct AnonymousAuthenticator;

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn resolve(&self, _credentials: Option<&str>) -> Result<Option<UserIdentity>, AuthError> {
        Ok(None)
    }
}

/// Verifies signed access tokens against the configured trusted key.
pub struct TokenAuthenticator {
    verifier: TokenVerifier,
}

impl TokenAuthenticator {
    pub fn new(verify_key: PublicKey) -> Self {
        Self {
            verifier: TokenVerifier::new(verify_key),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn resolve(&self, credentials: Option<&str>) -> Result<Option<UserIdentity>, AuthError> {
        let Some(token) = credentials else {
            return Ok(None);
        };
        Ok(Some(self.verifier.verify_token(token)?))
    }
}

/// Build the authenticator the config asks for.
pub fn build_authenticator(config: &AuthConfig) -> anyhow::Result<Arc<dyn Authenticator>> {
    if !config.enabled {
        return Ok(Arc::new(AnonymousAuthenticator));
    }
    let key = PublicKey::from_base64(&config.verify_key)
        .context("[auth] verify_key is not a valid public key")?;
    tracing::info!(fingerprint = %key.fingerprint(), "token auth enabled");
    Ok(Arc::new(TokenAuthenticator::new(key)))
}
