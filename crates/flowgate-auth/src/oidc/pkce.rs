//! PKCE (RFC 7636) for the client side of the flow, S256 only.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::error::OidcError;

/// Challenge method sent with every authorization request.
pub const CHALLENGE_METHOD: &str = "S256";

/// PKCE code verifier.
///
/// A high-entropy random string over `[A-Za-z0-9-._~]`, 43 to 128
/// characters long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Wraps a stored verifier, checking its length and alphabet.
    pub fn new(verifier: String) -> Result<Self, OidcError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(OidcError::InvalidVerifier(format!(
                "length must be 43-128, got {len}"
            )));
        }
        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(OidcError::InvalidVerifier(
                "must use unreserved characters only".to_string(),
            ));
        }
        Ok(Self(verifier))
    }

    /// Generates 32 random bytes, base64url-encoded (43 characters).
    #[must_use]
    pub fn generate() -> Self {
        Self(random_token(32))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the verifier and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// PKCE code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Create a challenge from a verifier using the S256 method.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `bytes` random bytes, base64url-encoded without padding.
pub(crate) fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_generation() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 43);
        assert!(PkceVerifier::new(verifier.as_str().to_string()).is_ok());
        assert_ne!(verifier, PkceVerifier::generate());
    }

    #[test]
    fn test_verifier_validation() {
        assert!(PkceVerifier::new("a".repeat(42)).is_err());
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert!(PkceVerifier::new("a".repeat(129)).is_err());
        assert!(PkceVerifier::new(format!("{}+", "a".repeat(43))).is_err());
    }

    #[test]
    fn test_rfc7636_appendix_b() {
        let verifier =
            PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_string()).unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);
        assert_eq!(
            challenge.as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_ne!(
            challenge,
            PkceChallenge::from_verifier(&PkceVerifier::generate())
        );
    }

    #[test]
    fn test_random_token_is_url_safe() {
        let token = random_token(16);
        assert_eq!(token.len(), 22);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}
