//! Backend capability trait.
//!
//! [`KeyValueBackend`] is the narrow set of operations the store needs from
//! a shared cache. Each concrete client library gets one adapter that
//! implements it; nothing above this trait knows which library is in use.
//!
//! | Operation | Method | Contract |
//! |-----------|--------|----------|
//! | set-with-ttl | [`set_with_ttl`](KeyValueBackend::set_with_ttl) | overwrite, reset TTL |
//! | get | [`get`](KeyValueBackend::get) | no side effect |
//! | delete | [`delete`](KeyValueBackend::delete) | idempotent, returns count |
//! | list-keys-by-pattern | [`keys`](KeyValueBackend::keys) | glob, e.g. `oidc:*` |
//! | set-ttl | [`expire`](KeyValueBackend::expire) | `false` if absent |
//! | check-exists | [`exists`](KeyValueBackend::exists) | |
//!
//! Keys handed to a backend are already namespaced; backends never see
//! logical keys.

use async_trait::async_trait;

use crate::StoreResult;

/// Minimal capability interface over an external key-value cache.
///
/// Implementations must treat an expired key exactly like a missing one.
/// The client behind an implementation is owned by the caller and shared;
/// implementations never close or reconfigure it.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Writes `value` under `key`, replacing any existing entry and its TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()>;

    /// Reads `key`. Returns `None` if it does not exist or has expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Deletes every key in `keys`, returning how many existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Lists every live key matching the glob `pattern`.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Resets the remaining TTL of `key`. Returns `false` if it did not exist.
    async fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<bool>;

    /// Returns `true` if `key` exists and has not expired.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Reads and deletes `key`, returning the value that was present.
    ///
    /// The default is a plain read followed by a plain delete. Two
    /// concurrent callers can both observe the value before either deletes
    /// it. Backends with an atomic get-and-delete primitive override this so
    /// that at most one caller receives the value.
    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(&[key.to_string()]).await?;
        }
        Ok(value)
    }

    /// Returns `true` if [`take`](Self::take) is a single atomic operation.
    fn atomic_take(&self) -> bool {
        false
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
