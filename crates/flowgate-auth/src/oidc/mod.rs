//! OpenID Connect implementation of [`ProtocolEngine`](crate::ProtocolEngine).
//!
//! - [`OidcProtocolEngine`] - authorization-code flow with PKCE
//! - [`DiscoveryCache`] - provider metadata from `.well-known/openid-configuration`
//! - [`ProviderJwksCache`] - provider signing keys
//! - [`PkceVerifier`] / [`PkceChallenge`] - RFC 7636, S256 only

pub mod discovery;
pub mod engine;
pub mod error;
mod http;
pub mod jwks;
pub mod pkce;

pub use discovery::{DiscoveryCache, DiscoveryCacheConfig, OidcDiscoveryDocument};
pub use engine::OidcProtocolEngine;
pub use error::OidcError;
pub use jwks::{JwksCacheConfig, ProviderJwksCache};
pub use pkce::{PkceChallenge, PkceVerifier};
