// src/jwks.rs

use crate::error::BridgeError;
use crate::model::{Jwk, JwkSet};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// How long a fetched JWKS document stays fresh.
pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A process-wide cache of provider JWKS documents.
///
/// Entries are keyed by a hash of the source URL and expire after
/// [`JWKS_CACHE_TTL`]. Concurrent misses for the same URL each fetch
/// independently and the last writer wins; JWKS content changes rarely, so a
/// brief duplicate fetch is an accepted cost rather than a correctness bug.
#[derive(Clone)]
pub struct JwksCache {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    entries: Cache<String, Arc<JwkSet>>,
}

impl JwksCache {
    pub fn new() -> Self {
        Self::with_ttl(JWKS_CACHE_TTL)
    }

    /// A cache with a custom TTL. Production uses [`JwksCache::new`]; the
    /// override exists so expiry behavior is observable in tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            inner: Arc::new(Inner {
                http_client,
                entries: Cache::builder()
                    .max_capacity(16)
                    .time_to_live(ttl)
                    .build(),
            }),
        }
    }

    /// Returns the JWK with the given `kid` from the set published at
    /// `jwks_url`.
    ///
    /// A fresh cached set is scanned first. Any miss, whether no entry, an
    /// expired entry, or a fresh entry without the requested `kid`, triggers
    /// a refetch that replaces the whole entry before the final scan.
    #[instrument(skip(self), err)]
    pub async fn get_key(&self, jwks_url: &str, kid: &str) -> Result<Jwk, BridgeError> {
        let cache_key = url_cache_key(jwks_url);

        if let Some(set) = self.inner.entries.get(&cache_key).await {
            if let Some(jwk) = find_kid(&set, kid) {
                debug!(kid, "JWKS cache hit");
                return Ok(jwk);
            }
        }

        debug!(kid, url = jwks_url, "JWKS cache miss, fetching");
        let set = self.fetch(jwks_url).await?;
        self.inner
            .entries
            .insert(cache_key, Arc::clone(&set))
            .await;

        find_kid(&set, kid).ok_or_else(|| BridgeError::KeyNotFound(kid.to_string()))
    }

    async fn fetch(&self, jwks_url: &str) -> Result<Arc<JwkSet>, BridgeError> {
        let response = self.inner.http_client.get(jwks_url).send().await?;
        if !response.status().is_success() {
            return Err(BridgeError::JwksUnavailable {
                url: jwks_url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| BridgeError::JwksUnavailable {
                url: jwks_url.to_string(),
                reason: format!("malformed JWKS body: {e}"),
            })?;
        if set.keys.is_empty() {
            return Err(BridgeError::JwksUnavailable {
                url: jwks_url.to_string(),
                reason: "empty keys array".to_string(),
            });
        }
        Ok(Arc::new(set))
    }
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

fn find_kid(set: &JwkSet, kid: &str) -> Option<Jwk> {
    set.keys.iter().find(|k| k.kid == kid).cloned()
}

/// Stable cache key for a JWKS source URL.
fn url_cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jwks_body() -> serde_json::Value {
        json!({
            "keys": [
                {"kid": "key-1", "kty": "RSA", "n": "qw", "e": "AQAB"},
                {"kid": "key-2", "kty": "RSA", "n": "uw", "e": "AQAB"}
            ]
        })
    }

    async fn mount_jwks(server: &MockServer, expected_hits: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body()))
            .expect(expected_hits)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_hits_the_cache() {
        let server = MockServer::start().await;
        mount_jwks(&server, 1).await;
        let url = format!("{}/.well-known/jwks.json", server.uri());

        let cache = JwksCache::new();
        let first = cache.get_key(&url, "key-1").await.unwrap();
        let second = cache.get_key(&url, "key-2").await.unwrap();
        assert_eq!(first.kid, "key-1");
        assert_eq!(second.kid, "key-2");
    }

    #[tokio::test]
    async fn expired_entry_is_refetched_exactly_once() {
        let server = MockServer::start().await;
        mount_jwks(&server, 2).await;
        let url = format!("{}/.well-known/jwks.json", server.uri());

        let cache = JwksCache::with_ttl(Duration::from_millis(50));
        cache.get_key(&url, "key-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.get_key(&url, "key-1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_kid_in_fresh_entry_refetches_then_reports_not_found() {
        let server = MockServer::start().await;
        mount_jwks(&server, 2).await;
        let url = format!("{}/.well-known/jwks.json", server.uri());

        let cache = JwksCache::new();
        cache.get_key(&url, "key-1").await.unwrap();
        let err = cache.get_key(&url, "rotated-away").await.unwrap_err();
        assert!(matches!(err, BridgeError::KeyNotFound(kid) if kid == "rotated-away"));
    }

    #[tokio::test]
    async fn empty_keys_array_is_an_error_and_never_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
            .expect(2)
            .mount(&server)
            .await;
        let url = format!("{}/.well-known/jwks.json", server.uri());

        let cache = JwksCache::new();
        for _ in 0..2 {
            let err = cache.get_key(&url, "key-1").await.unwrap_err();
            assert!(matches!(err, BridgeError::JwksUnavailable { .. }));
        }
    }

    #[tokio::test]
    async fn http_error_is_jwks_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let url = format!("{}/.well-known/jwks.json", server.uri());

        let err = JwksCache::new().get_key(&url, "key-1").await.unwrap_err();
        assert!(matches!(err, BridgeError::JwksUnavailable { .. }));
    }

    #[test]
    fn cache_keys_are_stable_and_distinct_per_url() {
        let a = url_cache_key("https://a.example.com/jwks");
        assert_eq!(a, url_cache_key("https://a.example.com/jwks"));
        assert_ne!(a, url_cache_key("https://b.example.com/jwks"));
        assert_eq!(a.len(), 64);
    }
}
