// src/error.rs

use thiserror::Error;

/// The primary error type for the `idp-bridge` library.
///
/// Verification- and exchange-time variants abort the login flow before any
/// session is established. `DirectorySyncFailed` is the one exception to the
/// fail-the-request rule: outbound sync errors are reported, never fatal to
/// the local operation that triggered them.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed identity token: {0}")]
    MalformedToken(String),

    #[error("Identity token audience does not include the configured client id")]
    AudienceMismatch,

    #[error("Identity token is expired")]
    TokenExpired,

    #[error("JWKS unavailable from {url}: {reason}")]
    JwksUnavailable { url: String, reason: String },

    #[error("No JWK found for kid: {0}")]
    KeyNotFound(String),

    #[error("Unable to reconstruct a public key from the JWK: {0}")]
    KeyConstructionFailed(String),

    #[error("Identity token signature verification failed")]
    SignatureInvalid,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token exchange response is missing the id_token field")]
    MissingIdentityToken,

    #[error("No usable email claim returned by the identity provider")]
    MissingEmailClaim,

    #[error("Unable to resolve a local user: {0}")]
    UserResolutionFailed(String),

    #[error("Directory sync failed during {operation}: {reason}")]
    DirectorySyncFailed { operation: String, reason: String },
}

impl BridgeError {
    /// The terse, generic message shown to the visitor.
    ///
    /// Never echoes provider error internals; the detailed cause is available
    /// through `Display` on the operator side.
    pub fn user_message(&self) -> &'static str {
        match self {
            BridgeError::MalformedToken(_)
            | BridgeError::AudienceMismatch
            | BridgeError::TokenExpired
            | BridgeError::JwksUnavailable { .. }
            | BridgeError::KeyNotFound(_)
            | BridgeError::KeyConstructionFailed(_)
            | BridgeError::SignatureInvalid => "Login failed: invalid token.",
            BridgeError::TokenExchangeFailed(_)
            | BridgeError::MissingIdentityToken
            | BridgeError::Http(_) => "Login failed.",
            BridgeError::MissingEmailClaim => "Login failed: no email returned by identity provider.",
            BridgeError::UserResolutionFailed(_) => "Login failed: user not found.",
            BridgeError::DirectorySyncFailed { .. } => "Directory sync failed.",
            BridgeError::InvalidUrl(_) | BridgeError::MissingConfiguration(_) => {
                "Single sign-on is not configured."
            }
        }
    }
}
