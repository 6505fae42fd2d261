// ABOUTME: JWKS document fetching and signing-key caching for inbound JWT validation
// ABOUTME: Caches RSA public keys by (jwks_url, kid) with a one-hour lazy TTL
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

use crate::constants::{timeouts, ttl};
use crate::correlation::TtlMap;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// A single JSON Web Key as published by an upstream issuer.
///
/// Decoding is tolerant: unknown fields are ignored and optional fields
/// default, so issuer-side additions do not break validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, "RSA" for every issuer this proxy talks to
    pub kty: String,
    /// Key id, matched against the inbound token header
    pub kid: String,
    /// Algorithm hint, when published
    #[serde(default)]
    pub alg: Option<String>,
    /// Public key use, when published
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url
    pub n: String,
    /// RSA exponent, base64url
    pub e: String,
}

/// JWKS document container
#[derive(Debug, Deserialize)]
struct JwksDocument {
    #[serde(default)]
    keys: Vec<Jwk>,
}

/// Failure to produce a signing key
#[derive(Debug, Error)]
pub enum JwksError {
    /// The JWKS document could not be fetched or parsed
    #[error("failed to fetch JWKS from {url}: {reason}")]
    KeyFetch {
        /// The JWKS URL that failed
        url: String,
        /// Transport or parse failure detail
        reason: String,
    },
    /// The document held no entry for the requested kid
    #[error("no key {kid} in JWKS at {url}")]
    KeyNotFound {
        /// The JWKS URL that was consulted
        url: String,
        /// The kid the token named
        kid: String,
    },
    /// The JWK could not be turned into a verification key
    #[error("unusable JWK for kid {kid}: {reason}")]
    KeyMaterial {
        /// The offending kid
        kid: String,
        /// Conversion failure detail
        reason: String,
    },
}

/// Fetches and caches issuer signing keys by (jwks_url, kid).
///
/// Entries older than one hour are treated as misses; expiry is lazy on
/// the next read. Concurrent misses for the same key may each fetch; the
/// last write wins, which is harmless for immutable published keys.
pub struct JwksKeyCache {
    http: reqwest::Client,
    keys: TtlMap<Jwk>,
}

impl JwksKeyCache {
    /// Create a cache with the standard 5-second fetch timeout
    #[must_use]
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeouts::JWKS_FETCH)
            .build()
            .unwrap_or_default();
        Self {
            http,
            keys: TtlMap::new(ttl::JWKS_KEY),
        }
    }

    fn cache_key(jwks_url: &str, kid: &str) -> String {
        format!("{jwks_url}|{kid}")
    }

    /// Resolve the signing key for `kid` as published at `jwks_url`.
    ///
    /// # Errors
    /// `KeyFetch` if the document is unreachable or unparseable,
    /// `KeyNotFound` if no entry matches, `KeyMaterial` if the matching
    /// entry cannot be converted into an RSA verification key.
    pub async fn signing_key(&self, jwks_url: &str, kid: &str) -> Result<DecodingKey, JwksError> {
        let cache_key = Self::cache_key(jwks_url, kid);
        if let Some(jwk) = self.keys.get(&cache_key).await {
            return decoding_key(&jwk);
        }

        debug!(jwks_url, kid, "JWKS cache miss, fetching document");
        let document: JwksDocument = self
            .http
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::KeyFetch {
                url: jwks_url.to_owned(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| JwksError::KeyFetch {
                url: jwks_url.to_owned(),
                reason: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| JwksError::KeyFetch {
                url: jwks_url.to_owned(),
                reason: e.to_string(),
            })?;

        let jwk = document
            .keys
            .into_iter()
            .find(|k| k.kid == kid)
            .ok_or_else(|| JwksError::KeyNotFound {
                url: jwks_url.to_owned(),
                kid: kid.to_owned(),
            })?;

        self.keys.put(&cache_key, jwk.clone()).await;
        decoding_key(&jwk)
    }

    /// Seed a key directly, bypassing the fetch. Used when keys are
    /// distributed out of band and by tests.
    pub async fn store_key(&self, jwks_url: &str, jwk: Jwk) {
        let cache_key = Self::cache_key(jwks_url, &jwk.kid);
        self.keys.put(&cache_key, jwk).await;
    }
}

impl Default for JwksKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksError> {
    DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(|e| JwksError::KeyMaterial {
        kid: jwk.kid.clone(),
        reason: e.to_string(),
    })
}
