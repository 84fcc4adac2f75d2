// src/model.rs

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// A single JSON Web Key as published by the provider's JWKS endpoint
/// (RFC 7517). Only the RSA fields are of interest here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Modulus, base64url-encoded big-endian unsigned integer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Public exponent, base64url-encoded big-endian unsigned integer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// A JSON Web Key Set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// The JSON body returned by the provider's `/oauth2/token` endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenEndpointResponse {
    pub id_token: Option<String>,
    pub access_token: Option<String>,
    /// Set by the provider on exchange failure, e.g. `invalid_grant`.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// The opaque `state` value round-tripped through the provider.
///
/// Encoded as base64 of a small JSON record so the callback can recover the
/// pre-redirect target; the provider treats it as an opaque blob.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct OAuthState {
    pub redirect_to: String,
    pub sso_attempted: String,
}

impl OAuthState {
    pub fn new(redirect_to: impl Into<String>) -> Self {
        Self {
            redirect_to: redirect_to.into(),
            sso_attempted: "0".to_string(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a two-string struct cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let bytes = STANDARD.decode(raw.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Verified key/value facts about a user, extracted from an identity token
/// payload. Immutable once produced; lives for a single request.
///
/// Accessors make the missing-vs-empty distinction explicit: `str` returns
/// `Some("")` for a present-but-empty claim and `None` for an absent one,
/// while `non_empty` collapses both to `None`.
#[derive(Debug, Clone)]
pub struct Claims(serde_json::Map<String, serde_json::Value>);

impl Claims {
    pub fn new(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }

    /// A string claim, distinguishing absent (`None`) from empty (`Some("")`).
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// A string claim that is present and non-empty.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.str(key).filter(|s| !s.is_empty())
    }

    /// A string-array claim. A scalar string is treated as a one-element
    /// array, matching how providers emit `aud` and group claims.
    pub fn string_array(&self, key: &str) -> Vec<&str> {
        match self.0.get(key) {
            Some(serde_json::Value::String(s)) => vec![s.as_str()],
            Some(serde_json::Value::Array(values)) => {
                values.iter().filter_map(|v| v.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// An integer-valued claim (`exp`, `iat`, ...).
    pub fn integer(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(|v| v.as_i64())
    }

    /// Whether the `aud` claim (string or array form) contains `client_id`.
    pub fn audience_contains(&self, client_id: &str) -> bool {
        self.string_array("aud").iter().any(|a| *a == client_id)
    }

    /// The `exp` claim, when present.
    pub fn expiry(&self) -> Option<i64> {
        self.integer("exp")
    }

    pub fn issuer(&self) -> Option<&str> {
        self.non_empty("iss")
    }
}
