// ABOUTME: In-memory correlation store carrying state across OAuth redirect hops
// ABOUTME: TTL-stamped LRU maps with lazy expiry and atomic take semantics
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Correlation Store
//!
//! Browser-driven flows cross four independent redirects; the only thing
//! binding the hops together is a set of high-entropy keys handed to the
//! browser and looked up again on the next request. Each family below is
//! a bounded map whose entries expire 15 minutes after creation. Expiry
//! is lazy: `get` evicts and reports absent once the deadline has passed.
//!
//! The return-code family is consumed through `take`, a single atomic
//! read-and-delete, which is what makes authorization codes single-use
//! without any cross-request locking.

use crate::constants::{ttl, CORRELATION_CAPACITY, CORRELATION_KEY_BYTES};
use crate::errors::AppError;
use crate::flow::models::{LinkSession, OidcOutboundEntry, ReturnCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use lru::LruCache;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A value plus its expiry deadline
#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Bounded TTL map with lazy expiry.
///
/// Backed by an LRU cache so an abandoned-flow flood cannot grow memory
/// without bound; entries past their deadline are evicted on the read
/// path. All operations take the write lock because the LRU order and
/// expiry eviction both mutate.
pub struct TtlMap<T> {
    entries: RwLock<LruCache<String, Entry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlMap<T> {
    /// Create a map whose entries live for `ttl` after insertion
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, CORRELATION_CAPACITY)
    }

    /// Create a map with an explicit capacity bound
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("capacity must be non-zero");
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Insert or replace the value under `key`. The TTL clock restarts.
    pub async fn put(&self, key: &str, value: T) {
        let entry = Entry::new(value, self.ttl);
        self.entries.write().await.push(key.to_owned(), entry);
    }

    /// Look up `key`, evicting it first if expired
    pub async fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.write().await;
        let expired = entries.get(key).is_some_and(Entry::is_expired);
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Atomically read and delete. At most one caller ever receives the
    /// value for a given key.
    pub async fn take(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.write().await;
        let entry = entries.pop(key)?;
        if entry.is_expired() {
            return None;
        }
        Some(entry.value)
    }

    /// Remove `key` if present
    pub async fn delete(&self, key: &str) {
        self.entries.write().await.pop(key);
    }

    /// Number of live entries, counting not-yet-evicted expired ones
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the map holds no entries at all
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// The three flow-correlation families. The fourth family of the design,
/// the JWKS key cache, is the same `TtlMap` instantiated inside
/// `jwks::JwksKeyCache` with its own one-hour TTL.
pub struct CorrelationStore {
    /// outbound_state → inbound flow context plus staged tokens
    pub oidc: TtlMap<OidcOutboundEntry>,
    /// link_state → connected-account linking session
    pub links: TtlMap<LinkSession>,
    /// issued code → staged agent token and original flow context
    pub codes: TtlMap<ReturnCode>,
}

impl CorrelationStore {
    /// Create the store with the standard 15-minute policy
    #[must_use]
    pub fn new() -> Self {
        Self {
            oidc: TtlMap::new(ttl::CORRELATION),
            links: TtlMap::new(ttl::CORRELATION),
            codes: TtlMap::new(ttl::CORRELATION),
        }
    }

    /// Create a store with an explicit TTL, used by expiry tests
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            oidc: TtlMap::new(ttl),
            links: TtlMap::new(ttl),
            codes: TtlMap::new(ttl),
        }
    }
}

impl Default for CorrelationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a fresh correlation key: 32 CSPRNG bytes, base64url.
///
/// # Errors
/// Returns an error if the system RNG fails; the proxy cannot operate
/// securely without it.
pub fn generate_correlation_key() -> Result<String, AppError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; CORRELATION_KEY_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| AppError::internal("system RNG failure"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
