//! # flowgate-auth
//!
//! Server-side OpenID Connect authorization-code flow with state and sessions
//! kept in a shared, TTL-bound key/value store.
//!
//! ## Overview
//!
//! - [`ServerSideProtocolClient`] - `begin_authentication` / `complete_authentication`
//! - [`AuthFlowStateManager`] - single-use per-flow state (PKCE verifier, nonce, caller payload)
//! - [`SessionManager`] - authenticated sessions in their own namespace
//! - [`ProtocolEngine`] - the protocol seam; [`oidc::OidcProtocolEngine`] is the shipped engine
//! - [`FlowgateConfig`] - provider, store and Redis settings
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowgate_auth::{BeginAuthOptions, FlowgateConfig, ServerSideProtocolClient, SessionManager};
//! use flowgate_store::RedisBackend;
//!
//! let config = FlowgateConfig::load(Some("flowgate.toml".as_ref()))?;
//! let backend = Arc::new(RedisBackend::connect(&config.redis).await?);
//! let client = ServerSideProtocolClient::oidc(&config, backend.clone())?;
//! let sessions = SessionManager::with_backend(backend, config.session.clone());
//!
//! let request = client
//!     .begin_authentication(BeginAuthOptions::with_state(serde_json::json!({"returnUrl": "/x"})))
//!     .await?;
//! // redirect to request.authorization_url, then on callback:
//! let identity = client.complete_authentication(&callback_url).await?;
//! sessions.store_session(&session_id, &identity, None).await?;
//! ```

pub mod client;
pub mod config;
pub mod engine;
mod error;
pub mod flow_state;
pub mod identity;
pub mod oidc;
pub mod session;

pub use client::ServerSideProtocolClient;
pub use config::{FlowgateConfig, ProviderConfig};
pub use engine::{AuthorizationRequest, BeginAuthOptions, ProtocolEngine};
pub use error::{AuthError, AuthResult, ErrorCategory};
pub use flow_state::{AuthFlowStateManager, FlowState};
pub use identity::{AuthenticatedIdentity, SessionRecord};
pub use session::{SessionLookup, SessionManager};
