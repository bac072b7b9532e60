//! OpenID Connect Discovery client and caching.
//!
//! Provider metadata is fetched from `{issuer}/.well-known/openid-configuration`
//! and kept in process for a configurable TTL, so building an authorization
//! URL normally costs no network round trip.
//!
//! # Security Considerations
//!
//! - Only HTTPS issuer URLs are allowed unless `allow_http` is set
//! - The issuer claim in the document must match the issuer URL used to fetch it
//! - Response size is limited

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use super::error::OidcError;
use super::http::read_body_limited;

/// Provider metadata used by the engine.
///
/// Unknown fields are ignored; list-valued fields default to empty so
/// minimal documents still parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcDiscoveryDocument {
    /// URL that the OP asserts as its Issuer Identifier.
    pub issuer: String,

    /// URL of the OP's Authorization Endpoint.
    pub authorization_endpoint: String,

    /// URL of the OP's Token Endpoint.
    pub token_endpoint: String,

    /// URL of the OP's JSON Web Key Set document.
    pub jwks_uri: String,

    /// URL of the OP's UserInfo Endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// RP-initiated logout endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// Supported `response_type` values.
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported ID token signing algorithms.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Supported PKCE methods, when advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Supported scopes, when advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
}

impl OidcDiscoveryDocument {
    /// Returns `true` unless the provider advertises PKCE methods without S256.
    #[must_use]
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_none_or(|methods| methods.iter().any(|m| m == "S256"))
    }
}

/// Configuration for the OIDC discovery cache.
#[derive(Debug, Clone)]
pub struct DiscoveryCacheConfig {
    /// Time-to-live for cached discovery documents (default: 1 hour).
    pub ttl: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) issuer URLs.
    pub allow_http: bool,
}

impl Default for DiscoveryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

struct CachedDiscovery {
    document: OidcDiscoveryDocument,
    fetched_at: Instant,
}

/// Fetches and caches discovery documents by issuer.
pub struct DiscoveryCache {
    http_client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, CachedDiscovery>>>,
    config: DiscoveryCacheConfig,
}

impl DiscoveryCache {
    /// Creates a cache that fetches through `http_client`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: DiscoveryCacheConfig) -> Self {
        Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Gets a discovery document, using the cache if available.
    pub async fn get(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, OidcError> {
        let key = normalize_issuer(issuer);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key)
                && cached.fetched_at.elapsed() < self.config.ttl
            {
                tracing::trace!(%issuer, "discovery cache hit");
                return Ok(cached.document.clone());
            }
        }

        self.refresh(issuer).await
    }

    /// Fetches a fresh document, bypassing and then updating the cache.
    pub async fn refresh(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, OidcError> {
        let document = self.discover(issuer).await?;
        let mut cache = self.cache.write().await;
        cache.insert(
            normalize_issuer(issuer),
            CachedDiscovery {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(document)
    }

    async fn discover(&self, issuer: &Url) -> Result<OidcDiscoveryDocument, OidcError> {
        self.validate_scheme(issuer)?;
        let discovery_url = build_discovery_url(issuer);

        tracing::debug!(url = %discovery_url, "fetching OIDC discovery document");
        let response = self
            .http_client
            .get(discovery_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%issuer, error = %e, "failed to fetch OIDC discovery");
                OidcError::Discovery(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(OidcError::Discovery(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let body = read_body_limited(response, self.config.max_response_size)
            .await
            .map_err(|e| match e {
                OidcError::Network(e) => OidcError::Discovery(e.to_string()),
                other => other,
            })?;
        let document: OidcDiscoveryDocument = serde_json::from_slice(&body)
            .map_err(|e| OidcError::Discovery(format!("invalid document: {e}")))?;

        validate_issuer(&document, issuer)?;
        validate_endpoints(&document)?;
        Ok(document)
    }

    fn validate_scheme(&self, url: &Url) -> Result<(), OidcError> {
        match url.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            other => Err(OidcError::InvalidScheme(other.to_string())),
        }
    }
}

/// `{issuer}/.well-known/openid-configuration`, keeping any issuer path.
fn build_discovery_url(issuer: &Url) -> Url {
    let mut discovery_url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    discovery_url.set_path(&format!("{path}/.well-known/openid-configuration"));
    discovery_url.set_query(None);
    discovery_url
}

/// The document issuer must be identical to the URL it was fetched for,
/// ignoring a trailing slash.
fn validate_issuer(document: &OidcDiscoveryDocument, expected: &Url) -> Result<(), OidcError> {
    let expected = expected.as_str().trim_end_matches('/');
    let actual = document.issuer.trim_end_matches('/');
    if expected != actual {
        return Err(OidcError::issuer_mismatch(expected, actual));
    }
    Ok(())
}

/// The engine cannot run a flow without these three endpoints.
fn validate_endpoints(document: &OidcDiscoveryDocument) -> Result<(), OidcError> {
    let required = [
        ("authorization_endpoint", &document.authorization_endpoint),
        ("token_endpoint", &document.token_endpoint),
        ("jwks_uri", &document.jwks_uri),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(OidcError::MissingEndpoint(name));
        }
    }
    Ok(())
}

fn normalize_issuer(issuer: &Url) -> String {
    issuer.as_str().trim_end_matches('/').to_string()
}
