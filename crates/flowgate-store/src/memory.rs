//! In-process backend built on `DashMap`.
//!
//! Entries carry a deadline measured on the tokio clock, so tests can drive
//! expiry with a paused runtime instead of sleeping. Expired entries read as
//! absent and are evicted lazily on access or by [`InMemoryBackend::purge_expired`].
//!
//! Suitable for tests and single-instance deployments. Every instance owns
//! its own map, so nothing is shared across processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tokio::time::Instant;

use crate::backend::KeyValueBackend;
use crate::error::StoreError;
use crate::StoreResult;

/// A stored value with its expiry deadline.
#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Lock-free in-memory key-value backend with TTL support.
///
/// Cloning is cheap and clones share the same map, which is how one
/// "physical" backend is handed to several stores.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
    entries: Arc<DashMap<String, Entry>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evicts every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired in-memory entries");
        }
        removed
    }

    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> StoreResult<()> {
        if ttl_seconds == 0 {
            return Err(StoreError::command("SET", "invalid expire time"));
        }
        let expires_at = deadline(Instant::now(), ttl_seconds)
            .ok_or_else(|| StoreError::command("SET", "invalid expire time"))?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.evict_if_expired(key, now);
        Ok(None)
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let now = Instant::now();
        let mut deleted = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|item| !item.value().is_expired(now) && matcher.is_match(item.key()))
            .map(|item| item.key().clone())
            .collect())
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<bool> {
        let now = Instant::now();
        let expires_at = deadline(now, ttl_seconds)
            .ok_or_else(|| StoreError::command("EXPIRE", "invalid expire time"))?;
        let mut extended = false;
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = expires_at;
                extended = true;
            }
        }
        if !extended {
            self.evict_if_expired(key, now);
        }
        Ok(extended)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value))
    }

    fn atomic_take(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// `now + ttl_seconds`, or `None` when the deadline is not representable.
fn deadline(now: Instant, ttl_seconds: u64) -> Option<Instant> {
    now.checked_add(Duration::from_secs(ttl_seconds))
}

/// Compiles a Redis-style glob (`*`, `?`, `[...]`, `\` escapes) into an
/// anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                let mut closed = false;
                let mut first = true;
                for class_char in chars.by_ref() {
                    match class_char {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '^' if first => out.push('^'),
                        '\\' | '[' | ']' | '&' | '~' => {
                            out.push('\\');
                            out.push(class_char);
                        }
                        other => out.push(other),
                    }
                    first = false;
                }
                if !closed {
                    return Err(StoreError::invalid_pattern(pattern, "unclosed character class"));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::invalid_pattern(pattern, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_and_question() {
        let re = glob_to_regex("oidc:*").unwrap();
        assert!(re.is_match("oidc:abc"));
        assert!(re.is_match("oidc:"));
        assert!(!re.is_match("session:abc"));

        let re = glob_to_regex("k?y").unwrap();
        assert!(re.is_match("key"));
        assert!(!re.is_match("kkey"));
    }

    #[test]
    fn test_glob_escapes_and_classes() {
        let re = glob_to_regex(r"a\*:*").unwrap();
        assert!(re.is_match("a*:x"));
        assert!(!re.is_match("ab:x"));

        let re = glob_to_regex("[ab]c").unwrap();
        assert!(re.is_match("ac"));
        assert!(re.is_match("bc"));
        assert!(!re.is_match("cc"));

        let re = glob_to_regex("x.y").unwrap();
        assert!(!re.is_match("xzy"));

        assert!(glob_to_regex("[abc").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_lazy_eviction() {
        let backend = InMemoryBackend::new();
        backend.set_with_ttl("k", "v", 1).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let backend = InMemoryBackend::new();
        backend.set_with_ttl("short", "1", 1).await.unwrap();
        backend.set_with_ttl("long", "2", 60).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(backend.purge_expired(), 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_and_reports_missing() {
        let backend = InMemoryBackend::new();
        backend.set_with_ttl("k", "v", 1).await.unwrap();
        assert!(backend.expire("k", 10).await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(backend.exists("k").await.unwrap());

        assert!(!backend.expire("missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let backend = InMemoryBackend::new();
        assert!(backend.set_with_ttl("k", "v", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_is_an_error() {
        let backend = InMemoryBackend::new();
        let err = backend.set_with_ttl("k", "v", u64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::Command { operation: "SET", .. }));
        assert!(backend.is_empty());

        backend.set_with_ttl("k", "v", 60).await.unwrap();
        let err = backend.expire("k", u64::MAX).await.unwrap_err();
        assert!(matches!(err, StoreError::Command { operation: "EXPIRE", .. }));
        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let backend = InMemoryBackend::new();
        backend.set_with_ttl("k", "v", 60).await.unwrap();
        assert_eq!(backend.take("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(backend.take("k").await.unwrap(), None);
        assert!(backend.atomic_take());
    }

    #[tokio::test]
    async fn test_delete_counts_live_keys() {
        let backend = InMemoryBackend::new();
        backend.set_with_ttl("a", "1", 60).await.unwrap();
        backend.set_with_ttl("b", "2", 60).await.unwrap();
        let deleted = backend
            .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }
}
