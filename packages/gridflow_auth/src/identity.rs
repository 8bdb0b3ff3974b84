//! Resolved user identity.

use serde::{Deserialize, Serialize};

/// A platform user as established by token verification.
///
/// This is the post-verification view: no key material, just who the user is.
/// Sessions without credentials have no `UserIdentity` at all rather than a
/// sentinel value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            roles: Vec::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_default_empty() {
        let user: UserIdentity =
            serde_json::from_str(r#"{"id":"u1","display_name":"Ada"}"#).unwrap();
        assert!(user.roles.is_empty());
        assert!(!user.has_role("admin"));
    }

    #[test]
    fn has_role_matches_exactly() {
        let mut user = UserIdentity::new("u1", "Ada");
        user.roles.push("admin".to_string());
        assert!(user.has_role("admin"));
        assert!(!user.has_role("adm"));
    }
}
