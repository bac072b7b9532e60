//! Namespaced, TTL-bound key/value store.
//!
//! A [`KeyedExpiringStore`] prepends its prefix to every logical key before
//! talking to the backend and strips it from every enumerated key. Several
//! stores with different prefixes can share one backend without observing
//! each other's keys.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowgate_store::{InMemoryBackend, KeyedExpiringStore, StoreOptions};
//!
//! let backend = Arc::new(InMemoryBackend::new());
//! let flows = KeyedExpiringStore::new(backend.clone(), StoreOptions::default());
//! let sessions = KeyedExpiringStore::new(backend, StoreOptions::with_prefix("session:"));
//!
//! flows.set("abc", "{}").await?;
//! assert!(sessions.get("abc").await?.is_none());
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::KeyValueBackend;
use crate::StoreResult;

/// Default key prefix for flow state.
pub const DEFAULT_KEY_PREFIX: &str = "oidc:";

/// Default entry lifetime in seconds.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Options recognized by [`KeyedExpiringStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// String prepended to every logical key.
    pub key_prefix: String,

    /// TTL applied on every `set` unless overridden.
    #[serde(alias = "ttl")]
    pub default_ttl_seconds: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }
}

impl StoreOptions {
    /// Default options with a different prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Sets the default TTL.
    #[must_use]
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.default_ttl_seconds = seconds;
        self
    }
}

/// Prefix-scoped view over a shared [`KeyValueBackend`].
#[derive(Clone)]
pub struct KeyedExpiringStore {
    backend: Arc<dyn KeyValueBackend>,
    options: StoreOptions,
}

impl std::fmt::Debug for KeyedExpiringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedExpiringStore")
            .field("backend", &self.backend.name())
            .field("options", &self.options)
            .finish()
    }
}

impl KeyedExpiringStore {
    /// Creates a store over `backend`. The backend is shared, not owned.
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueBackend>, options: StoreOptions) -> Self {
        Self { backend, options }
    }

    /// The namespace prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.options.key_prefix
    }

    /// TTL applied by [`set`](Self::set).
    #[must_use]
    pub fn default_ttl(&self) -> u64 {
        self.options.default_ttl_seconds
    }

    /// The shared backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.options.key_prefix, key)
    }

    /// Writes `value` with the default TTL, replacing any existing entry.
    pub async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.set_with_ttl(key, value, self.options.default_ttl_seconds)
            .await
    }

    /// Writes `value` with an explicit TTL.
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        let full = self.namespaced(key);
        self.backend.set_with_ttl(&full, value, ttl_seconds).await?;
        tracing::debug!(key = %full, ttl_seconds, "store set");
        Ok(())
    }

    /// Reads `key`. Missing and expired keys both read as `None`.
    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let full = self.namespaced(key);
        let value = self.backend.get(&full).await?;
        tracing::debug!(key = %full, hit = value.is_some(), "store get");
        Ok(value)
    }

    /// Deletes `key`, returning the value that was present.
    ///
    /// Uses the backend's [`take`](KeyValueBackend::take). On backends with
    /// an atomic get-and-delete at most one concurrent caller receives the
    /// value; otherwise this is a read followed by a delete.
    pub async fn remove(&self, key: &str) -> StoreResult<Option<String>> {
        let full = self.namespaced(key);
        let value = self.backend.take(&full).await?;
        tracing::debug!(key = %full, hit = value.is_some(), "store remove");
        Ok(value)
    }

    /// Returns `true` if `key` exists and has not expired.
    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.backend.exists(&self.namespaced(key)).await
    }

    /// Lists every logical key in this namespace, prefix stripped.
    pub async fn list_keys(&self) -> StoreResult<HashSet<String>> {
        let pattern = format!("{}*", escape_glob(&self.options.key_prefix));
        let keys = self.backend.keys(&pattern).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(self.options.key_prefix.as_str()).map(String::from))
            .collect())
    }

    /// Resets the remaining TTL of `key`. Missing keys are left alone.
    pub async fn set_ttl(&self, key: &str, seconds: u64) -> StoreResult<()> {
        let full = self.namespaced(key);
        if !self.backend.expire(&full, seconds).await? {
            tracing::debug!(key = %full, "set_ttl on missing key ignored");
        }
        Ok(())
    }

    /// Deletes every key in this namespace, returning how many were removed.
    ///
    /// Keys under other prefixes are untouched. When the namespace is empty
    /// no delete is issued.
    pub async fn clear_namespace(&self) -> StoreResult<u64> {
        let pattern = format!("{}*", escape_glob(&self.options.key_prefix));
        let keys = self.backend.keys(&pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self.backend.delete(&keys).await?;
        tracing::debug!(prefix = %self.options.key_prefix, deleted, "namespace cleared");
        Ok(deleted)
    }
}

/// Escapes glob metacharacters so `s` matches only itself.
#[must_use]
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
