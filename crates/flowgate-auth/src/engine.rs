//! Protocol engine seam.
//!
//! The client drives the flow but leaves the protocol details to a
//! [`ProtocolEngine`]: building the authorization URL, and turning the
//! callback into an [`AuthenticatedIdentity`]. Engines read and write flow
//! state only through the [`AuthFlowStateManager`] they are handed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::AuthResult;
use crate::flow_state::AuthFlowStateManager;
use crate::identity::AuthenticatedIdentity;

/// Per-request options for [`ProtocolEngine::create_authorization_request`].
#[derive(Debug, Clone, Default)]
pub struct BeginAuthOptions {
    /// Opaque caller payload, returned as
    /// [`AuthenticatedIdentity::state`] on completion.
    pub state: Value,

    /// Scope for this request; the configured default when `None`.
    pub scope: Option<String>,

    /// OIDC `prompt` parameter.
    pub prompt: Option<String>,

    /// OIDC `login_hint` parameter.
    pub login_hint: Option<String>,

    /// Additional query parameters for this request only.
    pub extra_params: BTreeMap<String, String>,
}

impl BeginAuthOptions {
    /// Options carrying `state` and nothing else.
    #[must_use]
    pub fn with_state(state: Value) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Sets the scope.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Sets `prompt`.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Sets `login_hint`.
    #[must_use]
    pub fn login_hint(mut self, hint: impl Into<String>) -> Self {
        self.login_hint = Some(hint.into());
        self
    }

    /// Adds an extra query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.insert(key.into(), value.into());
        self
    }
}

/// Where to send the user, and the id that ties the callback back to it.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationRequest {
    /// Provider URL the caller redirects to.
    pub authorization_url: Url,

    /// Key of the persisted flow state.
    pub correlation_id: String,
}

/// An authorization-code protocol implementation.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Builds the authorization URL and persists the flow state.
    async fn create_authorization_request(
        &self,
        options: BeginAuthOptions,
        flows: &AuthFlowStateManager,
    ) -> AuthResult<AuthorizationRequest>;

    /// Consumes the flow state named by the callback, validates it and
    /// exchanges the authorization code.
    ///
    /// The flow state must be consumed before any validation so that a
    /// callback can never be replayed, whatever its outcome.
    async fn process_authorization_response(
        &self,
        callback_url: &Url,
        flows: &AuthFlowStateManager,
    ) -> AuthResult<AuthenticatedIdentity>;

    /// Removes flow state that can no longer complete. The backend TTL
    /// already enforces expiry, so the default does nothing.
    async fn clear_stale_state(&self, _flows: &AuthFlowStateManager) -> AuthResult<u64> {
        Ok(0)
    }

    /// Builds an RP-initiated logout URL, if the provider supports one.
    async fn create_end_session_url(
        &self,
        _id_token_hint: Option<&str>,
        _state: Option<&str>,
    ) -> AuthResult<Option<Url>> {
        Ok(None)
    }
}

/// Returns the first value of query parameter `name`.
pub(crate) fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use serde_json::json;

    #[test]
    fn test_options_builder() {
        let options = BeginAuthOptions::with_state(json!({"returnUrl": "/x"}))
            .scope("openid email")
            .prompt("login")
            .login_hint("a@example.com")
            .param("ui_locales", "de");

        assert_eq!(options.state["returnUrl"], "/x");
        assert_eq!(options.scope.as_deref(), Some("openid email"));
        assert_eq!(options.prompt.as_deref(), Some("login"));
        assert_eq!(options.extra_params["ui_locales"], "de");
    }

    #[test]
    fn test_query_param() {
        let url = Url::parse("https://app.example.com/cb?code=abc&state=xyz&state=dup").unwrap();
        assert_eq!(query_param(&url, "code").as_deref(), Some("abc"));
        assert_eq!(query_param(&url, "state").as_deref(), Some("xyz"));
        assert_eq!(query_param(&url, "error"), None);
    }

    struct NoopEngine;

    #[async_trait]
    impl ProtocolEngine for NoopEngine {
        async fn create_authorization_request(
            &self,
            _options: BeginAuthOptions,
            _flows: &AuthFlowStateManager,
        ) -> AuthResult<AuthorizationRequest> {
            Err(AuthError::configuration("not supported"))
        }

        async fn process_authorization_response(
            &self,
            _callback_url: &Url,
            _flows: &AuthFlowStateManager,
        ) -> AuthResult<AuthenticatedIdentity> {
            Err(AuthError::StateNotFound)
        }
    }

    #[test]
    fn test_provided_methods() {
        use flowgate_store::{InMemoryBackend, StoreOptions};
        use std::sync::Arc;
        use tokio_test::block_on;

        let flows = AuthFlowStateManager::with_backend(
            Arc::new(InMemoryBackend::new()),
            StoreOptions::default(),
        );
        block_on(async {
            assert_eq!(NoopEngine.clear_stale_state(&flows).await.unwrap(), 0);
            assert_eq!(
                NoopEngine.create_end_session_url(Some("t"), None).await.unwrap(),
                None
            );
        });
    }
}
