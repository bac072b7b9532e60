//! Server-side entry point for the authorization-code flow.

use std::sync::Arc;

use flowgate_store::KeyValueBackend;
use url::Url;

use crate::config::FlowgateConfig;
use crate::engine::{AuthorizationRequest, BeginAuthOptions, ProtocolEngine};
use crate::error::{AuthError, AuthResult};
use crate::flow_state::AuthFlowStateManager;
use crate::identity::AuthenticatedIdentity;
use crate::oidc::OidcProtocolEngine;

/// Composes a [`ProtocolEngine`] with flow-state storage.
///
/// Each attempt moves through started, callback received, state consumed,
/// validated and finally token exchanged or failed. Once the flow state has
/// been consumed the attempt cannot be resumed; a failed completion creates
/// no session and the caller must begin again.
#[derive(Clone)]
pub struct ServerSideProtocolClient {
    engine: Arc<dyn ProtocolEngine>,
    flows: AuthFlowStateManager,
}

impl std::fmt::Debug for ServerSideProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSideProtocolClient")
            .field("flows", &self.flows)
            .finish_non_exhaustive()
    }
}

impl ServerSideProtocolClient {
    /// Creates a client over any engine.
    #[must_use]
    pub fn new(engine: Arc<dyn ProtocolEngine>, flows: AuthFlowStateManager) -> Self {
        Self { engine, flows }
    }

    /// Creates a client backed by [`OidcProtocolEngine`], storing flow state
    /// on `backend` under `config.flow_state`.
    pub fn oidc(config: &FlowgateConfig, backend: Arc<dyn KeyValueBackend>) -> AuthResult<Self> {
        config.validate()?;
        let engine = OidcProtocolEngine::new(config.provider.clone())?;
        let flows = AuthFlowStateManager::with_backend(backend, config.flow_state.clone());
        Ok(Self::new(Arc::new(engine), flows))
    }

    /// Flow-state storage used by this client.
    #[must_use]
    pub fn flows(&self) -> &AuthFlowStateManager {
        &self.flows
    }

    /// Starts a flow: persists its state and returns the URL to redirect to.
    pub async fn begin_authentication(
        &self,
        options: BeginAuthOptions,
    ) -> AuthResult<AuthorizationRequest> {
        let request = self
            .engine
            .create_authorization_request(options, &self.flows)
            .await?;
        tracing::debug!(correlation_id = %request.correlation_id, "authentication started");
        Ok(request)
    }

    /// Finishes a flow from the provider's redirect back to us.
    ///
    /// `callback_url` may be absolute or a path with query string, as seen
    /// by the HTTP handler.
    ///
    /// # Errors
    ///
    /// - [`AuthError::StateNotFound`] if the correlation id was never issued,
    ///   has expired or was already used
    /// - [`AuthError::StateMismatch`] if the callback does not belong to the flow
    /// - [`AuthError::TokenExchange`] if the code exchange or token validation fails
    /// - [`AuthError::Provider`] if the provider reported an error
    pub async fn complete_authentication(
        &self,
        callback_url: &str,
    ) -> AuthResult<AuthenticatedIdentity> {
        let url = parse_callback_url(callback_url)?;
        match self
            .engine
            .process_authorization_response(&url, &self.flows)
            .await
        {
            Ok(identity) => {
                tracing::info!(
                    subject = identity.subject().unwrap_or("unknown"),
                    "authentication completed"
                );
                Ok(identity)
            }
            Err(e) => {
                if e.is_security_failure() {
                    tracing::warn!(error = %e, category = %e.category(), "callback rejected");
                } else {
                    tracing::debug!(error = %e, category = %e.category(), "authentication failed");
                }
                Err(e)
            }
        }
    }

    /// Lets the engine sweep flow state that can no longer complete.
    pub async fn cleanup_expired_state(&self) -> AuthResult<u64> {
        self.engine.clear_stale_state(&self.flows).await
    }

    /// RP-initiated logout URL, when the engine supports it.
    pub async fn end_session_url(
        &self,
        id_token_hint: Option<&str>,
        state: Option<&str>,
    ) -> AuthResult<Option<Url>> {
        self.engine.create_end_session_url(id_token_hint, state).await
    }
}

fn parse_callback_url(raw: &str) -> AuthResult<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost")
            .and_then(|base| base.join(raw))
            .map_err(|e| AuthError::invalid_callback(e.to_string())),
        Err(e) => Err(AuthError::invalid_callback(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_url() {
        let url = parse_callback_url("https://app.example.com/cb?code=c&state=s").unwrap();
        assert_eq!(url.path(), "/cb");

        let url = parse_callback_url("/cb?code=c&state=s").unwrap();
        assert_eq!(url.query(), Some("code=c&state=s"));

        assert!(matches!(
            parse_callback_url("http://[::1"),
            Err(AuthError::InvalidCallback { .. })
        ));
    }
}
