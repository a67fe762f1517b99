//! Cached Google signing keys.
//!
//! The whole key set lives under a single moka entry with a fixed TTL. A miss
//! or an unknown `kid` refetches the entire set; `try_get_with` makes
//! concurrent callers share one fetch, and readers only ever see a complete set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use moka::future::Cache;
use rsa::{BigUint, RsaPublicKey};
use serde::Deserialize;

use crate::error::IdentityError;

/// One fetched generation of provider keys.
#[derive(Debug)]
pub struct KeySet {
    generation: u64,
    keys: HashMap<String, RsaPublicKey>,
}

impl KeySet {
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&RsaPublicKey> {
        self.keys.get(kid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Deserialize)]
struct JwksDocument {
    #[serde(default)]
    keys: Vec<RawJwk>,
}

#[derive(Deserialize)]
struct RawJwk {
    kty: Option<String>,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

/// Time-bounded cache of the provider's RSA verification keys.
pub struct JwksCache {
    http: reqwest::Client,
    jwks_uri: String,
    cache: Cache<(), Arc<KeySet>>,
    generation: AtomicU64,
}

impl JwksCache {
    #[must_use]
    pub fn new(http: reqwest::Client, jwks_uri: impl Into<String>, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self {
            http,
            jwks_uri: jwks_uri.into(),
            cache,
            generation: AtomicU64::new(0),
        }
    }

    /// Look up the key for `kid`, refetching the set once if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Jwks` if the set cannot be fetched and
    /// `IdentityError::InvalidIdToken` if the key is still unknown after a refresh.
    pub async fn key(&self, kid: &str) -> Result<RsaPublicKey, IdentityError> {
        let set = self.current().await?;
        if let Some(key) = set.get(kid) {
            return Ok(key.clone());
        }

        // Only drop the entry we looked at; a newer set from another caller stays.
        if self.cache.get(&()).await.is_some_and(|cached| cached.generation == set.generation) {
            tracing::debug!(kid, "Unknown Google key id, refreshing JWKS");
            self.cache.invalidate(&()).await;
        }

        let set = self.current().await?;
        set.get(kid).cloned().ok_or_else(|| IdentityError::invalid("unknown id_token key id"))
    }

    async fn current(&self) -> Result<Arc<KeySet>, IdentityError> {
        self.cache
            .try_get_with((), self.fetch())
            .await
            .map_err(|e| IdentityError::Jwks(e.to_string()))
    }

    async fn fetch(&self) -> Result<Arc<KeySet>, IdentityError> {
        let response = self.http.get(&self.jwks_uri).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(IdentityError::Jwks(format!("status {}", status.as_u16())));
        }
        let document: JwksDocument = response.json().await?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let set = parse_key_set(document, generation);
        tracing::info!(keys = set.len(), generation, "Fetched Google JWKS");
        Ok(Arc::new(set))
    }
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache").field("jwks_uri", &self.jwks_uri).finish()
    }
}

fn parse_key_set(document: JwksDocument, generation: u64) -> KeySet {
    let mut keys = HashMap::new();
    for jwk in document.keys {
        if jwk.kty.as_deref() != Some("RSA") {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            tracing::warn!("Skipping Google JWK without kid, n or e");
            continue;
        };
        match rsa_key(&n, &e) {
            Some(key) => {
                keys.insert(kid, key);
            }
            None => tracing::warn!(kid = %kid, "Skipping malformed Google JWK"),
        }
    }
    KeySet { generation, keys }
}

fn rsa_key(n: &str, e: &str) -> Option<RsaPublicKey> {
    let n = URL_SAFE_NO_PAD.decode(n.trim_end_matches('=')).ok()?;
    let e = URL_SAFE_NO_PAD.decode(e.trim_end_matches('=')).ok()?;
    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_unusable_entries() {
        let document: JwksDocument = serde_json::from_value(serde_json::json!({
            "keys": [
                {"kty": "EC", "kid": "ec", "x": "AA", "y": "AA"},
                {"kty": "RSA", "kid": "no-modulus", "e": "AQAB"},
                {"kty": "RSA", "kid": "bad", "n": "!!!", "e": "AQAB"}
            ]
        }))
        .unwrap();
        let set = parse_key_set(document, 1);
        assert!(set.is_empty());
        assert_eq!(set.generation, 1);
    }

    #[test]
    fn test_parse_missing_keys_field() {
        let document: JwksDocument = serde_json::from_str("{}").unwrap();
        assert!(parse_key_set(document, 1).is_empty());
    }
}
