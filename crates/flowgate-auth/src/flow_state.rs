//! Per-flow transient state.
//!
//! A [`FlowState`] is written when an authorization request is built and
//! consumed exactly once when the provider redirects back. It lives in its
//! own namespace of the shared backend, keyed by correlation id (the OAuth
//! `state` parameter).

use std::collections::HashSet;
use std::sync::Arc;

use flowgate_store::{KeyValueBackend, KeyedExpiringStore, StoreOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::AuthResult;

/// Everything the callback needs to finish a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Correlation id, sent to the provider as the `state` parameter.
    pub correlation_id: String,

    /// PKCE code verifier.
    pub code_verifier: String,

    /// Scope sent in the authorization request.
    pub requested_scope: String,

    /// OIDC nonce expected in the ID token.
    #[serde(default)]
    pub nonce: String,

    /// Redirect URI sent in the authorization request.
    #[serde(default)]
    pub redirect_uri: String,

    /// Unix timestamp (seconds) at which the flow began.
    #[serde(default)]
    pub created_at: i64,

    /// Caller payload echoed back on completion.
    #[serde(default)]
    pub caller_state: Value,
}

impl FlowState {
    /// Creates flow state stamped with the current time.
    #[must_use]
    pub fn new(
        correlation_id: impl Into<String>,
        code_verifier: impl Into<String>,
        requested_scope: impl Into<String>,
        caller_state: Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            code_verifier: code_verifier.into(),
            requested_scope: requested_scope.into(),
            nonce: String::new(),
            redirect_uri: String::new(),
            created_at: OffsetDateTime::now_utc().unix_timestamp(),
            caller_state,
        }
    }

    /// Sets the nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// Returns `true` if the flow began more than `max_age_seconds` ago.
    #[must_use]
    pub fn is_expired(&self, max_age_seconds: u64) -> bool {
        let age = OffsetDateTime::now_utc().unix_timestamp() - self.created_at;
        age > i64::try_from(max_age_seconds).unwrap_or(i64::MAX)
    }
}

/// Persists [`FlowState`] through a [`KeyedExpiringStore`].
///
/// Unlike the session path, an entry that fails to decode is reported as
/// [`AuthError::Serialization`](crate::AuthError::Serialization): a corrupt
/// flow is not silently treated as a missing one.
#[derive(Debug, Clone)]
pub struct AuthFlowStateManager {
    store: KeyedExpiringStore,
}

impl AuthFlowStateManager {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(store: KeyedExpiringStore) -> Self {
        Self { store }
    }

    /// Creates a store over a shared backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn KeyValueBackend>, options: StoreOptions) -> Self {
        Self::new(KeyedExpiringStore::new(backend, options))
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &KeyedExpiringStore {
        &self.store
    }

    /// Writes `state` under its correlation id, replacing any entry.
    ///
    /// With `ttl_override` the TTL is reset right after the write.
    pub async fn store_flow_state(
        &self,
        state: &FlowState,
        ttl_override: Option<u64>,
    ) -> AuthResult<()> {
        let encoded = serde_json::to_string(state)?;
        self.store.set(&state.correlation_id, &encoded).await?;
        if let Some(ttl) = ttl_override {
            self.store.set_ttl(&state.correlation_id, ttl).await?;
        }
        Ok(())
    }

    /// Reads and deletes the flow state for `correlation_id`.
    ///
    /// On backends with an atomic take, at most one of several concurrent
    /// callers receives the state.
    pub async fn take_flow_state(&self, correlation_id: &str) -> AuthResult<Option<FlowState>> {
        match self.store.remove(correlation_id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Reads the flow state without consuming it.
    pub async fn get_flow_state(&self, correlation_id: &str) -> AuthResult<Option<FlowState>> {
        match self.store.get(correlation_id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if flow state exists for `correlation_id`.
    pub async fn has_flow_state(&self, correlation_id: &str) -> AuthResult<bool> {
        Ok(self.store.exists(correlation_id).await?)
    }

    /// Deletes the flow state, discarding it.
    pub async fn remove_flow_state(&self, correlation_id: &str) -> AuthResult<()> {
        self.store.remove(correlation_id).await?;
        Ok(())
    }

    /// Correlation ids of all live flows.
    pub async fn list_flows(&self) -> AuthResult<HashSet<String>> {
        Ok(self.store.list_keys().await?)
    }

    /// Deletes every flow in this namespace.
    pub async fn clear_all(&self) -> AuthResult<u64> {
        Ok(self.store.clear_namespace().await?)
    }
}
