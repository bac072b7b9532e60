//! The outcome of a completed authorization-code flow.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Tokens and profile produced by a successful
/// [`complete_authentication`](crate::ServerSideProtocolClient::complete_authentication).
///
/// The same shape is persisted as a session, see [`SessionRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    /// The access token.
    pub access_token: String,

    /// The token type (usually "Bearer").
    pub token_type: String,

    /// The raw ID token (JWT).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Optional refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scopes, space-separated.
    #[serde(default)]
    pub scope: String,

    /// ID token claims.
    #[serde(default)]
    pub profile: Map<String, Value>,

    /// Access token expiry as a Unix timestamp in seconds.
    pub expires_at: i64,

    /// Caller payload passed to `begin_authentication`.
    #[serde(default)]
    pub state: Value,
}

/// A stored session is an [`AuthenticatedIdentity`].
pub type SessionRecord = AuthenticatedIdentity;

impl AuthenticatedIdentity {
    /// The `sub` claim, if the profile carries one.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.profile.get("sub").and_then(Value::as_str)
    }

    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_in() <= 0
    }

    /// Seconds until `expires_at`; negative once expired.
    #[must_use]
    pub fn expires_in(&self) -> i64 {
        self.expires_at - OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Returns `true` if `scope` contains `wanted` as a whole word.
    #[must_use]
    pub fn has_scope(&self, wanted: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(expires_at: i64) -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            id_token: None,
            refresh_token: None,
            scope: "openid profile".to_string(),
            profile: json!({"sub": "user-1"}).as_object().cloned().unwrap_or_default(),
            expires_at,
            state: json!({"returnUrl": "/x"}),
        }
    }

    #[test]
    fn test_expiry() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        assert!(!identity(now + 600).is_expired());
        assert!(identity(now - 1).is_expired());
        assert!(identity(now + 600).expires_in() > 590);
    }

    #[test]
    fn test_subject_and_scope() {
        let id = identity(0);
        assert_eq!(id.subject(), Some("user-1"));
        assert!(id.has_scope("profile"));
        assert!(!id.has_scope("prof"));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let encoded = serde_json::to_value(identity(0)).unwrap();
        assert!(encoded.get("id_token").is_none());
        assert!(encoded.get("refresh_token").is_none());

        let decoded: AuthenticatedIdentity =
            serde_json::from_value(json!({"access_token": "a", "token_type": "Bearer", "expires_at": 1}))
                .unwrap();
        assert_eq!(decoded.state, Value::Null);
        assert!(decoded.profile.is_empty());
    }
}
