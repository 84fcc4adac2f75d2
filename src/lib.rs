// src/lib.rs

//! `idp-bridge` authenticates visitors against a hosted OpenID-Connect
//! provider (Cognito-style), verifies the returned identity token against
//! the provider's published JWKS, reconciles the verified claims into a
//! local user directory, and optionally mirrors local user changes back to
//! the provider.

pub mod config;
pub mod directory;
pub mod error;
pub mod flow;
pub mod jwks;
pub mod key;
pub mod model;
pub mod provision;
pub mod sync;
pub mod verifier;

/// The public prelude for the `idp-bridge` crate.
///
/// Re-exports the types most embedders need.
pub mod prelude {
    pub use crate::config::{Config, ConfigBuilder};
    pub use crate::directory::{
        AddressSnapshot, DirectoryAttribute, DirectoryClient, DirectoryError, LocalDirectory,
        ProfileUpdate, SessionSink, UserId, UserSnapshot,
    };
    pub use crate::error::BridgeError;
    pub use crate::flow::{CallbackParams, LoginOutcome, SsoFlow};
    pub use crate::jwks::JwksCache;
    pub use crate::model::{Claims, Jwk, JwkSet, OAuthState};
    pub use crate::provision::{reconcile, resolve_role, ProvisionOutcome};
    pub use crate::sync::{sync_user, sync_user_best_effort, SyncEvent, SyncOutcome, SyncTrigger};
    pub use crate::verifier::Verifier;
}

/// Installs a `fmt` tracing subscriber driven by `RUST_LOG`, for embedders
/// that have no subscriber of their own. Safe to call more than once.
pub fn init_operator_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
