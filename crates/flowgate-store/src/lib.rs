//! # flowgate-store
//!
//! Namespaced, TTL-bound key/value storage over a shared cache backend.
//!
//! ## Overview
//!
//! - [`KeyValueBackend`] - the minimal capability set required from a cache
//! - [`KeyedExpiringStore`] - prefix-scoped store with default TTLs
//! - [`InMemoryBackend`] - `DashMap` backend for tests and single instances
//! - [`RedisBackend`] - Redis backend over a `deadpool-redis` pool
//!
//! The backend client is always injected by the caller and shared between
//! stores; no store creates, closes or reconfigures it.

pub mod backend;
mod error;
pub mod memory;
pub mod redis_backend;
pub mod store;

pub use backend::KeyValueBackend;
pub use error::{ErrorCategory, StoreError};
pub use memory::InMemoryBackend;
pub use redis_backend::{RedisBackend, RedisConfig, create_redis_pool};
pub use store::{
    DEFAULT_KEY_PREFIX, DEFAULT_TTL_SECONDS, KeyedExpiringStore, StoreOptions, escape_glob,
};

/// Type alias for backend results.
pub type StoreResult<T> = Result<T, StoreError>;
