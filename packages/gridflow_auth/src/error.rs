//! Verification failure types with stable machine-readable codes.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Structurally broken token: bad separator, bad base64, bad claims JSON.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Unparseable key material.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired at {expired_at}")]
    Expired { expired_at: u64 },
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired { .. } => "token_expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            AuthError::InvalidToken("x".to_string()).error_code(),
            "invalid_token"
        );
        assert_eq!(AuthError::InvalidSignature.error_code(), "invalid_signature");
        assert_eq!(
            AuthError::Expired { expired_at: 10 }.error_code(),
            "token_expired"
        );
    }
}
