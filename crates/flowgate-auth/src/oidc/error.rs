//! Error types for the OIDC engine.
//!
//! These never reach callers directly; they are folded into [`AuthError`]
//! at the engine boundary.

use crate::error::AuthError;

/// Errors raised while talking to an OpenID provider.
#[derive(Debug, thiserror::Error)]
pub enum OidcError {
    /// The discovery document could not be fetched or parsed.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// The issuer in the discovery document does not match the authority.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The configured authority.
        expected: String,
        /// The issuer from the discovery document.
        actual: String,
    },

    /// The JWKS could not be fetched or parsed.
    #[error("JWKS error: {0}")]
    Jwks(String),

    /// No key in the JWKS matches the token.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A URL uses a scheme other than https.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },

    /// The token endpoint returned something other than a token response.
    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),

    /// The token endpoint returned an OAuth error body.
    #[error("OAuth error from provider: {error} - {description}")]
    OAuth {
        /// The OAuth error code.
        error: String,
        /// Optional error description.
        description: String,
    },

    /// An `openid` request was answered without an ID token.
    #[error("Token response is missing the ID token")]
    MissingIdToken,

    /// The token is signed with an algorithm this engine cannot verify.
    #[error("Unsupported ID token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The nonce in the ID token doesn't match the one stored with the flow.
    #[error("Nonce mismatch: ID token nonce does not match expected nonce")]
    NonceMismatch,

    /// The stored PKCE verifier is malformed.
    #[error("Invalid code verifier: {0}")]
    InvalidVerifier(String),

    /// The provider does not advertise a required endpoint.
    #[error("Provider metadata is missing {0}")]
    MissingEndpoint(&'static str),

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to parse a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JWT decoding or validation error.
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl OidcError {
    /// Creates an `IssuerMismatch` error.
    #[must_use]
    pub fn issuer_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::IssuerMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an `OAuth` error from a provider response.
    #[must_use]
    pub fn oauth(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Returns `true` if this is an ID token validation error.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound(_)
                | Self::MissingIdToken
                | Self::UnsupportedAlgorithm(_)
                | Self::NonceMismatch
                | Self::Jwt(_)
        )
    }

    /// Returns `true` if this happened before any token was requested.
    #[must_use]
    pub fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_)
                | Self::IssuerMismatch { .. }
                | Self::InvalidScheme(_)
                | Self::MissingEndpoint(_)
        )
    }
}

/// Provider metadata failures stay discovery errors and a nonce that ties
/// the token to a different flow is a state mismatch. Everything else is a
/// token exchange failure.
impl From<OidcError> for AuthError {
    fn from(e: OidcError) -> Self {
        match e {
            OidcError::NonceMismatch => AuthError::state_mismatch(e.to_string()),
            ref other if other.is_discovery_error() => AuthError::discovery(other.to_string()),
            other => AuthError::token_exchange(other.to_string()),
        }
    }
}
