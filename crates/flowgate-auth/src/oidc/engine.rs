//! Authorization-code flow with PKCE against an OpenID provider.

use std::collections::HashMap;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use super::discovery::{DiscoveryCache, DiscoveryCacheConfig, OidcDiscoveryDocument};
use super::error::OidcError;
use super::http::read_body_limited;
use super::jwks::{JwksCacheConfig, ProviderJwksCache};
use super::pkce::{CHALLENGE_METHOD, PkceChallenge, PkceVerifier, random_token};
use crate::config::ProviderConfig;
use crate::engine::{AuthorizationRequest, BeginAuthOptions, ProtocolEngine, query_param};
use crate::error::{AuthError, AuthResult};
use crate::flow_state::{AuthFlowStateManager, FlowState};
use crate::identity::AuthenticatedIdentity;

/// Access token lifetime assumed when the provider sends no `expires_in`
/// and no ID token `exp`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

const MAX_TOKEN_RESPONSE_SIZE: usize = 1024 * 1024;

/// Authorization request parameters owned by the engine. Extra parameters
/// with these names are dropped.
const RESERVED_AUTH_PARAMS: &[&str] = &[
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
    "prompt",
    "login_hint",
];

/// [`ProtocolEngine`] for OpenID Connect providers.
///
/// Provider metadata and signing keys are cached in process; flow state goes
/// through the [`AuthFlowStateManager`] passed to each call.
pub struct OidcProtocolEngine {
    config: ProviderConfig,
    authority: Url,
    redirect_uri: Url,
    http_client: reqwest::Client,
    discovery: DiscoveryCache,
    jwks: ProviderJwksCache,
}

impl std::fmt::Debug for OidcProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProtocolEngine")
            .field("authority", &self.authority.as_str())
            .field("client_id", &self.config.client_id)
            .field("redirect_uri", &self.redirect_uri.as_str())
            .finish_non_exhaustive()
    }
}

impl OidcProtocolEngine {
    /// Creates an engine for one provider and client registration.
    pub fn new(config: ProviderConfig) -> AuthResult<Self> {
        config.validate()?;
        let authority = config.authority_url()?;
        let redirect_uri = config.redirect_url()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("HTTP client: {e}")))?;

        let discovery = DiscoveryCache::new(
            http_client.clone(),
            DiscoveryCacheConfig {
                ttl: config.discovery_ttl,
                allow_http: config.allow_http,
                ..DiscoveryCacheConfig::default()
            },
        );
        let jwks = ProviderJwksCache::new(
            http_client.clone(),
            JwksCacheConfig {
                allow_http: config.allow_http,
                ..JwksCacheConfig::default()
            },
        );

        Ok(Self {
            config,
            authority,
            redirect_uri,
            http_client,
            discovery,
            jwks,
        })
    }

    /// The provider settings this engine was built with.
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Current provider metadata.
    pub async fn metadata(&self) -> Result<OidcDiscoveryDocument, OidcError> {
        self.discovery.get(&self.authority).await
    }

    fn build_authorization_url(
        &self,
        endpoint: &str,
        flow: &FlowState,
        challenge: &PkceChallenge,
        options: &BeginAuthOptions,
    ) -> Result<Url, OidcError> {
        let mut url = Url::parse(endpoint)?;
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &flow.redirect_uri);
            params.append_pair("scope", &flow.requested_scope);
            params.append_pair("state", &flow.correlation_id);
            params.append_pair("nonce", &flow.nonce);
            params.append_pair("code_challenge", challenge.as_str());
            params.append_pair("code_challenge_method", CHALLENGE_METHOD);

            if let Some(prompt) = &options.prompt {
                params.append_pair("prompt", prompt);
            }
            if let Some(hint) = &options.login_hint {
                params.append_pair("login_hint", hint);
            }
            for (key, value) in self.config.extra_auth_params.iter().chain(&options.extra_params) {
                if RESERVED_AUTH_PARAMS.contains(&key.as_str()) {
                    tracing::warn!(
                        param = %key,
                        "ignoring extra parameter that overrides a protocol parameter"
                    );
                    continue;
                }
                params.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(
        &self,
        metadata: &OidcDiscoveryDocument,
        code: &str,
        flow: &FlowState,
        verifier: &PkceVerifier,
    ) -> Result<TokenResponse, OidcError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", flow.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        tracing::debug!(token_endpoint = %metadata.token_endpoint, "exchanging authorization code");
        let response = self
            .http_client
            .post(&metadata.token_endpoint)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = read_body_limited(response, MAX_TOKEN_RESPONSE_SIZE).await?;

        if !status.is_success() {
            if let Ok(oauth_error) = serde_json::from_slice::<OAuthErrorResponse>(&body) {
                return Err(OidcError::oauth(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }
            return Err(OidcError::TokenEndpoint(format!("HTTP {status}")));
        }

        serde_json::from_slice::<TokenResponse>(&body)
            .map_err(|e| OidcError::TokenEndpoint(format!("invalid token response: {e}")))
    }

    /// Verifies the ID token signature and claims, including the nonce.
    async fn validate_id_token(
        &self,
        metadata: &OidcDiscoveryDocument,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<IdTokenClaims, OidcError> {
        let header = decode_header(id_token)?;

        let candidates: Vec<(DecodingKey, Algorithm)> = if is_hmac(header.alg) {
            // Symmetric tokens are signed with the client secret.
            let secret = self
                .config
                .client_secret
                .as_deref()
                .ok_or_else(|| OidcError::UnsupportedAlgorithm(format!("{:?}", header.alg)))?;
            vec![(DecodingKey::from_secret(secret.as_bytes()), header.alg)]
        } else {
            let jwks_uri = Url::parse(&metadata.jwks_uri)?;
            match header.kid.as_deref() {
                Some(kid) => {
                    let (key, key_alg) = self.jwks.get_key(&jwks_uri, kid).await?;
                    vec![(key, key_alg.unwrap_or(header.alg))]
                }
                None => self
                    .jwks
                    .find_signing_keys(&jwks_uri)
                    .await?
                    .into_iter()
                    .filter(|(_, alg)| alg.is_none_or(|a| a == header.alg))
                    .map(|(key, _)| (key, header.alg))
                    .collect(),
            }
        };

        let issuer = metadata.issuer.as_str();
        let mut last_error = OidcError::KeyNotFound("no usable key".to_string());
        for (key, alg) in candidates {
            let mut validation = Validation::new(alg);
            validation.set_audience(&[&self.config.client_id]);
            validation.set_issuer(&[issuer, issuer.trim_end_matches('/')]);
            validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
            validation.leeway = self.config.clock_skew.as_secs();

            match jsonwebtoken::decode::<IdTokenClaims>(id_token, &key, &validation) {
                Ok(data) => {
                    let claims = data.claims;
                    if claims.nonce.as_deref() != Some(expected_nonce) {
                        return Err(OidcError::NonceMismatch);
                    }
                    tracing::debug!(sub = %claims.sub, iss = %claims.iss, "validated ID token");
                    return Ok(claims);
                }
                Err(e) => last_error = e.into(),
            }
        }
        Err(last_error)
    }

    fn build_identity(
        &self,
        tokens: TokenResponse,
        claims: Option<IdTokenClaims>,
        flow: FlowState,
    ) -> AuthenticatedIdentity {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let expires_at = tokens
            .expires_in
            .map(|secs| now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)))
            .or(claims.as_ref().map(|c| c.exp))
            .unwrap_or(now + DEFAULT_TOKEN_LIFETIME_SECS);

        let profile = match claims {
            Some(claims) => claims.into_profile(),
            None => Map::new(),
        };

        AuthenticatedIdentity {
            access_token: tokens.access_token,
            token_type: tokens.token_type,
            id_token: tokens.id_token,
            refresh_token: tokens.refresh_token,
            scope: tokens.scope.unwrap_or(flow.requested_scope),
            profile,
            expires_at,
            state: flow.caller_state,
        }
    }

    async fn finish(
        &self,
        code: &str,
        flow: FlowState,
    ) -> Result<AuthenticatedIdentity, OidcError> {
        let verifier = PkceVerifier::new(flow.code_verifier.clone())?;
        let metadata = self.metadata().await?;

        let tokens = self.exchange_code(&metadata, code, &flow, &verifier).await?;

        let claims = match tokens.id_token.as_deref() {
            Some(id_token) => Some(
                self.validate_id_token(&metadata, id_token, &flow.nonce)
                    .await?,
            ),
            None if requests_openid(&flow.requested_scope) => {
                return Err(OidcError::MissingIdToken);
            }
            None => None,
        };

        Ok(self.build_identity(tokens, claims, flow))
    }
}

#[async_trait]
impl ProtocolEngine for OidcProtocolEngine {
    async fn create_authorization_request(
        &self,
        options: BeginAuthOptions,
        flows: &AuthFlowStateManager,
    ) -> AuthResult<AuthorizationRequest> {
        let metadata = self
            .metadata()
            .await
            .map_err(|e| AuthError::discovery(e.to_string()))?;
        if !metadata.supports_s256() {
            return Err(AuthError::discovery("provider does not support S256 PKCE"));
        }

        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        let correlation_id = uuid::Uuid::new_v4().simple().to_string();
        let scope = options
            .scope
            .clone()
            .unwrap_or_else(|| self.config.scope.clone());

        let flow = FlowState::new(
            correlation_id.clone(),
            verifier.into_inner(),
            scope,
            options.state.clone(),
        )
        .with_nonce(random_token(32))
        .with_redirect_uri(self.redirect_uri.as_str());

        let authorization_url = self
            .build_authorization_url(&metadata.authorization_endpoint, &flow, &challenge, &options)
            .map_err(|e| AuthError::discovery(e.to_string()))?;

        flows.store_flow_state(&flow, None).await?;

        tracing::debug!(
            %correlation_id,
            endpoint = %metadata.authorization_endpoint,
            "built authorization request"
        );

        Ok(AuthorizationRequest {
            authorization_url,
            correlation_id,
        })
    }

    async fn process_authorization_response(
        &self,
        callback_url: &Url,
        flows: &AuthFlowStateManager,
    ) -> AuthResult<AuthenticatedIdentity> {
        let Some(correlation_id) = query_param(callback_url, "state") else {
            return Err(AuthError::StateNotFound);
        };

        // Consume before anything else so no callback can be replayed.
        let Some(flow) = flows.take_flow_state(&correlation_id).await? else {
            return Err(AuthError::StateNotFound);
        };

        if let Some(error) = query_param(callback_url, "error") {
            let description = query_param(callback_url, "error_description").unwrap_or_default();
            tracing::warn!(%correlation_id, %error, "provider returned an error");
            return Err(AuthError::provider(error, description));
        }

        if flow.is_expired(self.config.max_flow_age.as_secs()) {
            tracing::debug!(%correlation_id, "flow exceeded its maximum age");
            return Err(AuthError::StateNotFound);
        }

        let code = query_param(callback_url, "code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::invalid_callback("missing code parameter"))?;

        self.finish(&code, flow).await.map_err(|e| {
            if e.is_validation_error() {
                tracing::warn!(%correlation_id, error = %e, "ID token rejected");
            }
            AuthError::from(e)
        })
    }

    async fn clear_stale_state(&self, flows: &AuthFlowStateManager) -> AuthResult<u64> {
        let max_age = self.config.max_flow_age.as_secs();
        let mut removed = 0;
        for correlation_id in flows.list_flows().await? {
            let stale = match flows.get_flow_state(&correlation_id).await {
                Ok(Some(flow)) => flow.is_expired(max_age),
                Ok(None) => false,
                Err(AuthError::Serialization { .. }) => true,
                Err(e) => return Err(e),
            };
            if stale {
                flows.remove_flow_state(&correlation_id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "removed stale flow state");
        }
        Ok(removed)
    }

    async fn create_end_session_url(
        &self,
        id_token_hint: Option<&str>,
        state: Option<&str>,
    ) -> AuthResult<Option<Url>> {
        let metadata = self
            .metadata()
            .await
            .map_err(|e| AuthError::discovery(e.to_string()))?;
        let Some(endpoint) = metadata.end_session_endpoint.as_deref() else {
            return Ok(None);
        };

        let mut url = Url::parse(endpoint).map_err(|e| AuthError::discovery(e.to_string()))?;
        {
            let mut params = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                params.append_pair("id_token_hint", hint);
            }
            if let Some(uri) = &self.config.post_logout_redirect_uri {
                params.append_pair("post_logout_redirect_uri", uri);
            }
            params.append_pair("client_id", &self.config.client_id);
            if let Some(state) = state {
                params.append_pair("state", state);
            }
        }
        Ok(Some(url))
    }
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn requests_openid(scope: &str) -> bool {
    scope.split_whitespace().any(|s| s == "openid")
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth error response.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// ID token claims; everything beyond the registered claims lands in `extra`.
#[derive(Debug, Clone, Deserialize)]
struct IdTokenClaims {
    iss: String,
    sub: String,
    #[serde(deserialize_with = "deserialize_audience")]
    aud: Vec<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

impl IdTokenClaims {
    fn into_profile(self) -> Map<String, Value> {
        let mut profile: Map<String, Value> = self.extra.into_iter().collect();
        profile.insert("iss".to_string(), Value::String(self.iss));
        profile.insert("sub".to_string(), Value::String(self.sub));
        let aud = match self.aud.as_slice() {
            [single] => Value::String(single.clone()),
            _ => Value::from(self.aud),
        };
        profile.insert("aud".to_string(), aud);
        profile.insert("exp".to_string(), Value::from(self.exp));
        if let Some(iat) = self.iat {
            profile.insert("iat".to_string(), Value::from(iat));
        }
        if let Some(nonce) = self.nonce {
            profile.insert("nonce".to_string(), Value::String(nonce));
        }
        profile
    }
}

/// Audience can be a string or an array.
fn deserialize_audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}
