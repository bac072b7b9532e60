//! Provider JWKS fetching and caching.
//!
//! Keys are cached per `jwks_uri`. The TTL comes from the provider's
//! `Cache-Control: max-age`, clamped between a minimum and a maximum so a
//! hostile header can neither pin stale keys forever nor force a fetch per
//! token. A `kid` that is not in the cached set triggers one refresh, which
//! is how provider key rotation is picked up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

use super::error::OidcError;
use super::http::read_body_limited;

/// Configuration for the provider JWKS cache.
#[derive(Debug, Clone)]
pub struct JwksCacheConfig {
    /// TTL when Cache-Control is absent (default: 1 hour).
    pub default_ttl: Duration,

    /// Upper bound on any TTL (default: 24 hours).
    pub max_ttl: Duration,

    /// Lower bound on any TTL (default: 5 minutes).
    pub min_ttl: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) JWKS URIs.
    pub allow_http: bool,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(86400),
            min_ttl: Duration::from_secs(300),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// In-memory cache of provider signing keys.
pub struct ProviderJwksCache {
    http_client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, CachedJwks>>>,
    config: JwksCacheConfig,
}

impl ProviderJwksCache {
    /// Creates a cache that fetches through `http_client`.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: JwksCacheConfig) -> Self {
        Self {
            http_client,
            cache: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Gets the key with id `kid`, refreshing the set once on a miss.
    pub async fn get_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Result<(DecodingKey, Option<Algorithm>), OidcError> {
        if let Some(found) = self.cached_key(jwks_uri, kid).await {
            tracing::trace!(kid, %jwks_uri, "JWKS cache hit");
            return Ok(found);
        }

        tracing::debug!(kid, %jwks_uri, "JWKS cache miss");
        self.refresh(jwks_uri).await?;

        self.cached_key(jwks_uri, kid)
            .await
            .ok_or_else(|| OidcError::KeyNotFound(kid.to_string()))
    }

    async fn cached_key(
        &self,
        jwks_uri: &Url,
        kid: &str,
    ) -> Option<(DecodingKey, Option<Algorithm>)> {
        let cache = self.cache.read().await;
        let cached = cache.get(&normalize_uri(jwks_uri))?;
        if Instant::now() >= cached.expires_at {
            return None;
        }
        cached
            .jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .and_then(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|dk| (dk, jwk_algorithm(jwk)))
            })
    }

    /// All signing keys of the set, for tokens without a `kid` header.
    /// Keys marked `use: "enc"` are excluded.
    pub async fn find_signing_keys(
        &self,
        jwks_uri: &Url,
    ) -> Result<Vec<(DecodingKey, Option<Algorithm>)>, OidcError> {
        let key = normalize_uri(jwks_uri);
        let fresh = {
            let cache = self.cache.read().await;
            cache
                .get(&key)
                .is_some_and(|cached| Instant::now() < cached.expires_at)
        };
        if !fresh {
            self.refresh(jwks_uri).await?;
        }

        let cache = self.cache.read().await;
        let cached = cache
            .get(&key)
            .ok_or_else(|| OidcError::Jwks("cache miss after refresh".to_string()))?;

        let keys: Vec<_> = cached
            .jwks
            .keys
            .iter()
            .filter(|k| !matches!(k.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .filter_map(|jwk| {
                DecodingKey::from_jwk(jwk)
                    .ok()
                    .map(|dk| (dk, jwk_algorithm(jwk)))
            })
            .collect();

        if keys.is_empty() {
            return Err(OidcError::KeyNotFound("no signing keys in JWKS".to_string()));
        }
        Ok(keys)
    }

    /// Fetches the set and replaces the cached copy.
    pub async fn refresh(&self, jwks_uri: &Url) -> Result<(), OidcError> {
        match jwks_uri.scheme() {
            "https" => {}
            "http" if self.config.allow_http => {}
            other => return Err(OidcError::InvalidScheme(other.to_string())),
        }

        tracing::debug!(%jwks_uri, "fetching JWKS");
        let response = self
            .http_client
            .get(jwks_uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(%jwks_uri, error = %e, "failed to fetch JWKS");
                OidcError::Jwks(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(OidcError::Jwks(format!(
                "HTTP status {}",
                response.status().as_u16()
            )));
        }

        let ttl = self.parse_cache_control(response.headers());
        let body = read_body_limited(response, self.config.max_response_size)
            .await
            .map_err(|e| match e {
                OidcError::Network(e) => OidcError::Jwks(e.to_string()),
                other => other,
            })?;
        let jwks: JwkSet = serde_json::from_slice(&body)
            .map_err(|e| OidcError::Jwks(format!("invalid JWKS: {e}")))?;

        tracing::debug!(%jwks_uri, keys = jwks.keys.len(), ?ttl, "cached JWKS");
        self.cache.write().await.insert(
            normalize_uri(jwks_uri),
            CachedJwks {
                jwks,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    /// `max-age` from Cache-Control, clamped to `[min_ttl, max_ttl]`.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|s| s.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }

}

fn normalize_uri(uri: &Url) -> String {
    uri.as_str().trim_end_matches('/').to_string()
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
