//! Authenticated session storage.
//!
//! Sessions are [`SessionRecord`]s keyed by a caller-chosen session id in a
//! namespace distinct from flow state. A record that fails to decode reads as
//! [`SessionLookup::Absent`]: a corrupt session behaves like a logged-out one.

use std::collections::HashSet;
use std::sync::Arc;

use flowgate_store::{KeyValueBackend, KeyedExpiringStore, StoreOptions};

use crate::error::AuthResult;
use crate::identity::SessionRecord;

/// Result of a session read.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionLookup {
    /// A live, decodable session.
    Found(SessionRecord),
    /// Missing, expired or undecodable.
    Absent,
}

impl SessionLookup {
    /// Converts into an `Option`.
    #[must_use]
    pub fn into_option(self) -> Option<SessionRecord> {
        match self {
            Self::Found(record) => Some(record),
            Self::Absent => None,
        }
    }

    /// Returns `true` for [`SessionLookup::Found`].
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Persists [`SessionRecord`]s through a [`KeyedExpiringStore`].
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: KeyedExpiringStore,
}

impl SessionManager {
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

    /// Writes `record` under `session_id`, replacing any prior session in a
    /// single backend write.
    ///
    /// With `ttl_override` the TTL is reset right after the write.
    pub async fn store_session(
        &self,
        session_id: &str,
        record: &SessionRecord,
        ttl_override: Option<u64>,
    ) -> AuthResult<()> {
        let encoded = serde_json::to_string(record)?;
        self.store.set(session_id, &encoded).await?;
        if let Some(ttl) = ttl_override {
            self.store.set_ttl(session_id, ttl).await?;
        }
        tracing::debug!(session_id, "session stored");
        Ok(())
    }

    /// Reads a session. Backend failures propagate; decode failures do not.
    pub async fn get_session(&self, session_id: &str) -> AuthResult<SessionLookup> {
        let Some(raw) = self.store.get(session_id).await? else {
            return Ok(SessionLookup::Absent);
        };
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Ok(SessionLookup::Found(record)),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "discarding undecodable session");
                Ok(SessionLookup::Absent)
            }
        }
    }

    /// Deletes a session.
    pub async fn remove_session(&self, session_id: &str) -> AuthResult<()> {
        self.store.remove(session_id).await?;
        tracing::debug!(session_id, "session removed");
        Ok(())
    }

    /// Returns `true` if an entry exists for `session_id`.
    pub async fn has_session(&self, session_id: &str) -> AuthResult<bool> {
        Ok(self.store.exists(session_id).await?)
    }

    /// Sliding expiration: resets the remaining lifetime of a session.
    pub async fn refresh_session_ttl(&self, session_id: &str, seconds: u64) -> AuthResult<()> {
        Ok(self.store.set_ttl(session_id, seconds).await?)
    }

    /// Ids of all live sessions.
    pub async fn list_sessions(&self) -> AuthResult<HashSet<String>> {
        Ok(self.store.list_keys().await?)
    }

    /// Deletes every session in this namespace.
    pub async fn clear_sessions(&self) -> AuthResult<u64> {
        Ok(self.store.clear_namespace().await?)
    }
}
