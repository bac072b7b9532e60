//! Configuration for the flow engine, its state stores and the Redis backend.
//!
//! All sections use `#[serde(default)]`, so a configuration file only needs to
//! name what differs from the defaults.
//!
//! # Example
//!
//! ```toml
//! [provider]
//! authority = "https://login.example.com"
//! client_id = "my-app"
//! client_secret = "s3cret"
//! redirect_uri = "https://app.example.com/callback"
//! request_timeout = "10s"
//!
//! [flow_state]
//! key_prefix = "oidc:"
//! ttl = 600
//!
//! [session]
//! key_prefix = "session:"
//! ttl = 86400
//!
//! [redis]
//! url = "redis://cache:6379"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use flowgate_store::{RedisConfig, StoreOptions};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;

/// Environment variable prefix, e.g. `FLOWGATE__PROVIDER__CLIENT_ID`.
pub const ENV_PREFIX: &str = "FLOWGATE";

/// Default session namespace.
pub const DEFAULT_SESSION_PREFIX: &str = "session:";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowgateConfig {
    /// Identity provider and client registration.
    pub provider: ProviderConfig,

    /// Namespace and TTL of per-flow transient state.
    pub flow_state: StoreOptions,

    /// Namespace and TTL of authenticated sessions.
    pub session: StoreOptions,

    /// Shared Redis backend.
    pub redis: RedisConfig,
}

impl Default for FlowgateConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            flow_state: StoreOptions::default(),
            session: StoreOptions::with_prefix(DEFAULT_SESSION_PREFIX),
            redis: RedisConfig::default(),
        }
    }
}

impl FlowgateConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// `FLOWGATE__SECTION__FIELD` environment overrides, then validates.
    ///
    /// A path that does not exist is skipped, so environment-only
    /// deployments need no file.
    pub fn load(path: Option<&Path>) -> Result<Self, AuthError> {
        let mut builder = Config::builder();
        if let Some(p) = path {
            let pathbuf = PathBuf::from(p);
            if pathbuf.exists() {
                builder = builder.add_source(File::from(pathbuf));
            }
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let cfg = builder
            .build()
            .map_err(|e| AuthError::configuration(format!("config build error: {e}")))?;
        let merged: Self = cfg
            .try_deserialize()
            .map_err(|e| AuthError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, AuthError> {
        let parsed: Self = toml::from_str(s)
            .map_err(|e| AuthError::configuration(format!("invalid TOML: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks the invariants the stores and the engine rely on.
    pub fn validate(&self) -> Result<(), AuthError> {
        validate_store("flow_state", &self.flow_state)?;
        validate_store("session", &self.session)?;

        let flow = self.flow_state.key_prefix.as_str();
        let session = self.session.key_prefix.as_str();
        // One namespace must never enumerate the other's keys.
        if flow.starts_with(session) || session.starts_with(flow) {
            return Err(AuthError::configuration(format!(
                "flow_state prefix '{flow}' and session prefix '{session}' overlap"
            )));
        }

        self.provider.validate()
    }
}

fn validate_store(section: &str, options: &StoreOptions) -> Result<(), AuthError> {
    if options.key_prefix.is_empty() {
        return Err(AuthError::configuration(format!(
            "{section}.key_prefix must not be empty"
        )));
    }
    if options.default_ttl_seconds == 0 {
        return Err(AuthError::configuration(format!(
            "{section}.ttl must be greater than zero"
        )));
    }
    Ok(())
}

/// Identity provider settings passed through to the protocol engine.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Issuer URL; discovery is fetched from
    /// `{authority}/.well-known/openid-configuration`.
    pub authority: String,

    /// OAuth client identifier.
    pub client_id: String,

    /// Client secret for confidential clients.
    pub client_secret: Option<String>,

    /// Callback URL registered with the provider.
    pub redirect_uri: String,

    /// Space-separated scopes requested by default.
    pub scope: String,

    /// Where the provider sends the user after RP-initiated logout.
    pub post_logout_redirect_uri: Option<String>,

    /// Extra query parameters added to every authorization URL.
    pub extra_auth_params: BTreeMap<String, String>,

    /// Timeout for discovery, JWKS and token endpoint requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Leeway applied to ID token `exp`/`nbf`/`iat` checks.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// How long a begun flow may take to complete, measured from
    /// `created_at`. Applied on top of the store TTL.
    #[serde(with = "humantime_serde")]
    pub max_flow_age: Duration,

    /// How long a discovery document is cached.
    #[serde(with = "humantime_serde")]
    pub discovery_ttl: Duration,

    /// Permit `http://` authority and endpoint URLs. Test setups only.
    pub allow_http: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            authority: String::new(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: String::new(),
            scope: "openid profile email".to_string(),
            post_logout_redirect_uri: None,
            extra_auth_params: BTreeMap::new(),
            request_timeout: Duration::from_secs(30),
            clock_skew: Duration::from_secs(60),
            max_flow_age: Duration::from_secs(3600),
            discovery_ttl: Duration::from_secs(3600),
            allow_http: false,
        }
    }
}

impl ProviderConfig {
    /// Creates provider settings with defaults for everything else.
    #[must_use]
    pub fn new(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Self::default()
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the default scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Sets the post-logout redirect URI.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uri = Some(uri.into());
        self
    }

    /// Allows `http://` URLs.
    ///
    /// # Warning
    ///
    /// This should only be used for testing.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Parsed authority URL.
    pub fn authority_url(&self) -> Result<Url, AuthError> {
        self.parse_url("authority", &self.authority)
    }

    /// Parsed redirect URI.
    pub fn redirect_url(&self) -> Result<Url, AuthError> {
        self.parse_url("redirect_uri", &self.redirect_uri)
    }

    fn parse_url(&self, field: &str, value: &str) -> Result<Url, AuthError> {
        let url = Url::parse(value)
            .map_err(|e| AuthError::configuration(format!("provider.{field} '{value}': {e}")))?;
        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_http => Ok(url),
            scheme => Err(AuthError::configuration(format!(
                "provider.{field} uses scheme '{scheme}' (only https is allowed)"
            ))),
        }
    }

    /// Checks the provider section on its own.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("provider.client_id must be set"));
        }
        self.authority_url()?;
        self.redirect_url()?;
        if let Some(uri) = &self.post_logout_redirect_uri {
            Url::parse(uri).map_err(|e| {
                AuthError::configuration(format!("provider.post_logout_redirect_uri: {e}"))
            })?;
        }
        if !self.scope.split_whitespace().any(|s| s == "openid") {
            return Err(AuthError::configuration(
                "provider.scope must include 'openid'",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[provider]
authority = "https://login.example.com"
client_id = "app"
redirect_uri = "https://app.example.com/callback"
"#;

    #[test]
    fn test_defaults() {
        let config = FlowgateConfig::default();
        assert_eq!(config.flow_state.key_prefix, "oidc:");
        assert_eq!(config.flow_state.default_ttl_seconds, 3600);
        assert_eq!(config.session.key_prefix, "session:");
        assert_eq!(config.provider.scope, "openid profile email");
        assert_eq!(config.provider.request_timeout, Duration::from_secs(30));
        assert!(!config.provider.allow_http);
    }

    #[test]
    fn test_from_toml_minimal() {
        let config = FlowgateConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.provider.client_id, "app");
        assert_eq!(config.session.default_ttl_seconds, 3600);
    }

    #[test]
    fn test_from_toml_humantime_and_ttl_alias() {
        let doc = format!(
            "{MINIMAL}request_timeout = \"5s\"\nclock_skew = \"2m\"\n\n[flow_state]\nttl = 600\n"
        );
        let config = FlowgateConfig::from_toml_str(&doc).unwrap();
        assert_eq!(config.provider.request_timeout, Duration::from_secs(5));
        assert_eq!(config.provider.clock_skew, Duration::from_secs(120));
        assert_eq!(config.flow_state.default_ttl_seconds, 600);
        assert_eq!(config.flow_state.key_prefix, "oidc:");
    }

    #[test]
    fn test_validate_rejects_overlapping_prefixes() {
        let mut config = FlowgateConfig::from_toml_str(MINIMAL).unwrap();
        config.session.key_prefix = "oidc:".to_string();
        assert!(config.validate().is_err());

        config.session.key_prefix = "oidc:s:".to_string();
        assert!(config.validate().is_err());

        config.session.key_prefix = "sess:".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FlowgateConfig::from_toml_str(MINIMAL).unwrap();
        config.flow_state.default_ttl_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = FlowgateConfig::from_toml_str(MINIMAL).unwrap();
        config.session.key_prefix.clear();
        assert!(config.validate().is_err());

        let mut config = FlowgateConfig::from_toml_str(MINIMAL).unwrap();
        config.provider.client_id = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = FlowgateConfig::from_toml_str(MINIMAL).unwrap();
        config.provider.scope = "profile".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_authority_requires_allow_http() {
        let provider = ProviderConfig::new(
            "http://localhost:8080",
            "app",
            "http://localhost:3000/cb",
        );
        assert!(provider.validate().is_err());
        assert!(provider.with_allow_http(true).validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "{MINIMAL}\n[redis]\nurl = \"redis://cache:6380\"").unwrap();

        let config = FlowgateConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.provider.authority, "https://login.example.com");
        assert_eq!(config.redis.url, "redis://cache:6380");
    }

    #[test]
    fn test_load_without_file_fails_validation() {
        let missing = Path::new("/nonexistent/flowgate.toml");
        let err = FlowgateConfig::load(Some(missing)).unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }
}
