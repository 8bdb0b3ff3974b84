//! Signed access tokens.
//!
//! A token is `base64url(claims_json) . base64url(signature)` with the
//! signature covering the exact claims bytes. Verification checks the
//! signature before it parses the claims, so unsigned input is never fed to
//! the JSON parser.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::encoding::{base64_decode, base64_encode};
use crate::error::AuthError;
use crate::identity::UserIdentity;
use crate::keys::{PublicKey, Signature, SigningKey, verify};

/// Current unix time in seconds.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Token payload. Timestamps are unix seconds; `expires_at = 0` means the
/// token never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl TokenClaims {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            roles: self.roles.clone(),
        }
    }
}

/// Mints tokens. Lives wherever the platform issues credentials; the gateway
/// itself only ever verifies.
pub struct TokenIssuer {
    signing_key: SigningKey,
}

impl TokenIssuer {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn issue(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| AuthError::InvalidToken(format!("claims encode: {e}")))?;
        let signature = self.signing_key.sign(&payload);
        Ok(format!(
            "{}.{}",
            base64_encode(&payload),
            base64_encode(signature.as_bytes())
        ))
    }

    /// Issue for a user with a TTL from now. `ttl_secs = 0` never expires.
    pub fn issue_for(
        &self,
        user_id: &str,
        display_name: &str,
        roles: Vec<String>,
        ttl_secs: u64,
    ) -> Result<String, AuthError> {
        let issued_at = now_unix();
        let expires_at = if ttl_secs == 0 {
            0
        } else {
            issued_at + ttl_secs
        };
        self.issue(&TokenClaims {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            roles,
            issued_at,
            expires_at,
        })
    }
}

/// Verifies tokens against one trusted public key.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    trusted: PublicKey,
}

impl TokenVerifier {
    pub fn new(trusted: PublicKey) -> Self {
        Self { trusted }
    }

    pub fn trusted_key(&self) -> &PublicKey {
        &self.trusted
    }

    /// Verify signature then expiry against the current clock.
    pub fn verify_token(&self, token: &str) -> Result<UserIdentity, AuthError> {
        self.verify_at(token, now_unix())
    }

    /// Verify against a caller-supplied timestamp. Lets tests exercise expiry
    /// without mocking the clock.
    pub fn verify_at(&self, token: &str, now_unix_secs: u64) -> Result<UserIdentity, AuthError> {
        let (payload_b64, sig_b64) = token
            .split_once('.')
            .ok_or_else(|| AuthError::InvalidToken("missing signature separator".to_string()))?;

        let payload = base64_decode(payload_b64)
            .map_err(|e| AuthError::InvalidToken(format!("payload: {e}")))?;
        let sig_bytes = base64_decode(sig_b64)
            .map_err(|e| AuthError::InvalidToken(format!("signature: {e}")))?;
        let sig_arr: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| AuthError::InvalidToken("signature must be 64 bytes".to_string()))?;

        verify(&self.trusted, &payload, &Signature::from_bytes(sig_arr))?;

        let claims: TokenClaims = serde_json::from_slice(&payload)
            .map_err(|e| AuthError::InvalidToken(format!("claims: {e}")))?;

        if claims.expires_at != 0 && now_unix_secs > claims.expires_at {
            return Err(AuthError::Expired {
                expired_at: claims.expires_at,
            });
        }

        Ok(claims.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer_and_verifier() -> (TokenIssuer, TokenVerifier) {
        let sk = SigningKey::generate(&mut rand::rng());
        let verifier = TokenVerifier::new(sk.public_key());
        (TokenIssuer::new(sk), verifier)
    }

    fn claims(expires_at: u64) -> TokenClaims {
        TokenClaims {
            user_id: "u-42".to_string(),
            display_name: "Ada".to_string(),
            roles: vec!["editor".to_string()],
            issued_at: 100,
            expires_at,
        }
    }

    #[test]
    fn issue_verify_roundtrip() {
        let (issuer, verifier) = issuer_and_verifier();
        let token = issuer.issue(&claims(0)).unwrap();

        let identity = verifier.verify_at(&token, 100).unwrap();
        assert_eq!(identity.id, "u-42");
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.roles, vec!["editor".to_string()]);
    }

    #[test]
    fn expiry_boundary() {
        let (issuer, verifier) = issuer_and_verifier();
        let token = issuer.issue(&claims(1000)).unwrap();

        assert!(verifier.verify_at(&token, 999).is_ok());
        // Not strictly after: still valid at the expiry second.
        assert!(verifier.verify_at(&token, 1000).is_ok());
        assert_eq!(
            verifier.verify_at(&token, 1001),
            Err(AuthError::Expired { expired_at: 1000 })
        );
    }

    #[test]
    fn zero_expiry_never_expires() {
        let (issuer, verifier) = issuer_and_verifier();
        let token = issuer.issue(&claims(0)).unwrap();
        assert!(verifier.verify_at(&token, u64::MAX).is_ok());
    }

    #[test]
    fn tampered_payload_rejected() {
        let (issuer, verifier) = issuer_and_verifier();
        let token = issuer.issue(&claims(0)).unwrap();

        // Re-encode the payload with an escalated role, keep the signature.
        let (payload_b64, sig_b64) = token.split_once('.').unwrap();
        let mut payload = base64_decode(payload_b64).unwrap();
        let json = String::from_utf8(payload.clone()).unwrap();
        payload = json.replace("editor", "admin!").into_bytes();
        let forged = format!("{}.{sig_b64}", base64_encode(&payload));

        assert_eq!(
            verifier.verify_at(&forged, 100),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn wrong_issuer_rejected() {
        let (issuer, _) = issuer_and_verifier();
        let (_, other_verifier) = issuer_and_verifier();
        let token = issuer.issue(&claims(0)).unwrap();
        assert_eq!(
            other_verifier.verify_at(&token, 100),
            Err(AuthError::InvalidSignature)
        );
    }

    #[test]
    fn structurally_broken_tokens() {
        let (_, verifier) = issuer_and_verifier();
        for bad in ["", "no-separator", "a.b.c", "!!!.???", "YWJj."] {
            let err = verifier.verify_at(bad, 100).unwrap_err();
            assert_eq!(err.error_code(), "invalid_token", "input: {bad:?}");
        }
    }

    #[test]
    fn issue_for_sets_ttl() {
        let (issuer, verifier) = issuer_and_verifier();
        let token = issuer
            .issue_for("u-1", "Grace", Vec::new(), 3600)
            .unwrap();
        assert!(verifier.verify_token(&token).is_ok());
        // Far future: past the TTL.
        assert!(matches!(
            verifier.verify_at(&token, now_unix() + 7200),
            Err(AuthError::Expired { .. })
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn any_claims_roundtrip(
                user_id in ".{0,64}",
                display_name in ".{0,64}",
                roles in proptest::collection::vec("[a-z]{1,12}", 0..4),
                issued_at in any::<u64>(),
            ) {
                let sk = SigningKey::from_bytes([99u8; 32]);
                let issuer = TokenIssuer::new(sk.clone());
                let verifier = TokenVerifier::new(sk.public_key());

                let token = issuer.issue(&TokenClaims {
                    user_id: user_id.clone(),
                    display_name: display_name.clone(),
                    roles: roles.clone(),
                    issued_at,
                    expires_at: 0,
                }).unwrap();

                let identity = verifier.verify_at(&token, issued_at).unwrap();
                prop_assert_eq!(identity.id, user_id);
                prop_assert_eq!(identity.display_name, display_name);
                prop_assert_eq!(identity.roles, roles);
            }
        }
    }
}
