//! Signing key discovery.
//!
//! Keys come from the tenant's JSON Web Key Set and are cached by `kid` for a
//! fixed time-to-live. Remote fetches are rate limited; a caller that misses
//! the cache waits at most `max_wait` in total, queuing behind other refreshes
//! and the limiter, before giving up. Lookups that fail are never cached.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::DecodingKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::utils::clock::Clock;

pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A public key able to verify RS256 signatures.
#[derive(Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub decoding_key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("signing key {kid} not found: {reason}")]
pub struct KeyNotFound {
    pub kid: String,
    pub reason: String,
}

impl KeyNotFound {
    fn new(kid: &str, reason: impl Into<String>) -> Self {
        Self {
            kid: kid.to_string(),
            reason: reason.into(),
        }
    }
}

/// Where key sets come from.
#[async_trait]
pub trait JwksSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<JwkSet>;
}

/// Fetches the key set over HTTPS with a hard timeout.
pub struct HttpJwksSource {
    client: reqwest::Client,
    uri: String,
}

impl HttpJwksSource {
    pub fn new(uri: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            uri: uri.into(),
        })
    }
}

#[async_trait]
impl JwksSource for HttpJwksSource {
    async fn fetch(&self) -> anyhow::Result<JwkSet> {
        let set = self
            .client
            .get(&self.uri)
            .send()
            .await?
            .error_for_status()?
            .json::<JwkSet>()
            .await?;
        Ok(set)
    }
}

struct CachedKey {
    key: Arc<SigningKey>,
    fetched_at: DateTime<Utc>,
}

/// Keys by `kid`, each valid for `ttl` after it was fetched.
pub struct KeyCache {
    entries: DashMap<String, CachedKey>,
    ttl: chrono::Duration,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    /// The cached key, unless it is missing or older than the TTL.
    pub fn get_fresh(&self, kid: &str, now: DateTime<Utc>) -> Option<Arc<SigningKey>> {
        let entry = self.entries.get(kid)?;
        if now - entry.fetched_at < self.ttl {
            Some(entry.key.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: SigningKey, now: DateTime<Utc>) {
        self.entries.insert(
            key.key_id.clone(),
            CachedKey {
                key: Arc::new(key),
                fetched_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct KeyResolverSettings {
    pub requests_per_minute: u32,
    /// Longest a cache miss waits for the refresh slot and the rate limiter together.
    pub max_wait: Duration,
}

impl Default for KeyResolverSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            max_wait: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

pub struct KeyResolver {
    source: Arc<dyn JwksSource>,
    cache: Arc<KeyCache>,
    clock: Arc<dyn Clock>,
    limiter: DefaultDirectRateLimiter,
    max_wait: Duration,
    // Serializes refreshes so concurrent misses share one fetch.
    refresh: Mutex<()>,
}

impl KeyResolver {
    pub fn new(
        source: Arc<dyn JwksSource>,
        cache: Arc<KeyCache>,
        clock: Arc<dyn Clock>,
        settings: KeyResolverSettings,
    ) -> Self {
        let per_minute = NonZeroU32::new(settings.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            source,
            cache,
            clock,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            max_wait: settings.max_wait,
            refresh: Mutex::new(()),
        }
    }

    pub async fn resolve_key(&self, kid: &str) -> Result<Arc<SigningKey>, KeyNotFound> {
        if let Some(key) = self.cache.get_fresh(kid, self.clock.now()) {
            return Ok(key);
        }

        // Queuing for the refresh slot and for a limiter permit share one deadline.
        let deadline = tokio::time::Instant::now() + self.max_wait;
        let Ok(_refresh) = tokio::time::timeout_at(deadline, self.refresh.lock()).await else {
            return Err(rate_limited(kid));
        };
        // Another task may have refreshed while this one waited.
        if let Some(key) = self.cache.get_fresh(kid, self.clock.now()) {
            return Ok(key);
        }
        if tokio::time::timeout_at(deadline, self.limiter.until_ready())
            .await
            .is_err()
        {
            return Err(rate_limited(kid));
        }

        let set = self.source.fetch().await.map_err(|e| {
            warn!(kid, error = %e, "Failed to fetch JWKS");
            KeyNotFound::new(kid, format!("key set fetch failed: {e}"))
        })?;

        let fetched_at = self.clock.now();
        let mut loaded = 0usize;
        for jwk in &set.keys {
            let Some(key_id) = jwk.common.key_id.clone() else {
                continue;
            };
            if !matches!(jwk.algorithm, AlgorithmParameters::RSA(_)) {
                debug!(kid = %key_id, "Skipping non-RSA key");
                continue;
            }
            match DecodingKey::from_jwk(jwk) {
                Ok(decoding_key) => {
                    self.cache.insert(
                        SigningKey {
                            key_id,
                            decoding_key,
                        },
                        fetched_at,
                    );
                    loaded += 1;
                }
                Err(e) => warn!(kid = %key_id, error = %e, "Skipping unusable key"),
            }
        }
        info!(loaded, cached = self.cache.len(), "JWKS refreshed");

        self.cache
            .get_fresh(kid, fetched_at)
            .ok_or_else(|| KeyNotFound::new(kid, "kid not present in key set"))
    }
}

fn rate_limited(kid: &str) -> KeyNotFound {
    warn!(kid, "JWKS fetch rate limit exceeded");
    KeyNotFound::new(kid, "key set fetch rate limit exceeded")
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const SIGNER_KID: &str = "signer-key-1";
    pub const SIGNER_PEM: &str = include_str!("testdata/signer_rsa.pem");
    pub const IMPOSTOR_PEM: &str = include_str!("testdata/impostor_rsa.pem");
    pub const JWKS_JSON: &str = include_str!("testdata/jwks.json");

    /// Serves a fixed key set and counts fetches. `failing` makes every fetch error.
    pub struct StaticJwks {
        pub set: Option<JwkSet>,
        pub fetches: AtomicUsize,
    }

    impl StaticJwks {
        pub fn signer() -> Self {
            Self {
                set: Some(serde_json::from_str(JWKS_JSON).unwrap()),
                fetches: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                set: None,
                fetches: AtomicUsize::new(0),
            }
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JwksSource for StaticJwks {
        async fn fetch(&self) -> anyhow::Result<JwkSet> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.set
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::utils::clock::testing::ManualClock;
    use chrono::TimeZone;

    fn resolver(
        source: Arc<StaticJwks>,
        clock: Arc<ManualClock>,
        settings: KeyResolverSettings,
    ) -> KeyResolver {
        KeyResolver::new(
            source,
            Arc::new(KeyCache::new(DEFAULT_KEY_TTL)),
            clock,
            settings,
        )
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_cached_key_is_reused_within_ttl() {
        let source = Arc::new(StaticJwks::signer());
        let clock = clock();
        let resolver = resolver(source.clone(), clock.clone(), KeyResolverSettings::default());

        let first = resolver.resolve_key(SIGNER_KID).await.unwrap();
        clock.advance(chrono::Duration::hours(23));
        let second = resolver.resolve_key(SIGNER_KID).await.unwrap();

        assert_eq!(first.key_id, SIGNER_KID);
        assert_eq!(second.key_id, SIGNER_KID);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_key_is_refetched_after_ttl() {
        let source = Arc::new(StaticJwks::signer());
        let clock = clock();
        let resolver = resolver(source.clone(), clock.clone(), KeyResolverSettings::default());

        resolver.resolve_key(SIGNER_KID).await.unwrap();
        clock.advance(chrono::Duration::hours(24));
        resolver.resolve_key(SIGNER_KID).await.unwrap();

        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_kid_is_not_cached() {
        let source = Arc::new(StaticJwks::signer());
        let cache = Arc::new(KeyCache::new(DEFAULT_KEY_TTL));
        let resolver = KeyResolver::new(
            source.clone(),
            cache.clone(),
            clock(),
            KeyResolverSettings::default(),
        );
        assert!(cache.is_empty());

        let err = resolver.resolve_key("rotated-away").await.unwrap_err();
        assert_eq!(err.kid, "rotated-away");
        assert!(err.reason.contains("not present"));
        // Only the keys the set actually holds are cached.
        assert_eq!(cache.len(), 1);

        resolver.resolve_key("rotated-away").await.unwrap_err();
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_key_not_found() {
        let source = Arc::new(StaticJwks::failing());
        let resolver = resolver(source, clock(), KeyResolverSettings::default());

        let err = resolver.resolve_key(SIGNER_KID).await.unwrap_err();
        assert!(err.reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_after_bounded_wait() {
        let source = Arc::new(StaticJwks::signer());
        let settings = KeyResolverSettings {
            requests_per_minute: 1,
            max_wait: Duration::from_millis(20),
        };
        let resolver = resolver(source.clone(), clock(), settings);

        resolver.resolve_key("missing-1").await.unwrap_err();
        let err = resolver.resolve_key("missing-2").await.unwrap_err();

        assert!(err.reason.contains("rate limit"));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_wait_bound() {
        let source = Arc::new(StaticJwks::signer());
        let max_wait = Duration::from_millis(200);
        let settings = KeyResolverSettings {
            requests_per_minute: 1,
            max_wait,
        };
        let resolver = Arc::new(resolver(source.clone(), clock(), settings));
        resolver.resolve_key(SIGNER_KID).await.unwrap();

        let misses = (0..10).map(|i| {
            let resolver = resolver.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let result = resolver.resolve_key(&format!("random-{i}")).await;
                (result, started.elapsed())
            })
        });
        let outcomes = futures_util::future::join_all(misses).await;

        let mut slowest = Duration::ZERO;
        for outcome in outcomes {
            let (result, waited) = outcome.unwrap();
            assert!(result.unwrap_err().reason.contains("rate limit"));
            slowest = slowest.max(waited);
        }
        assert!(slowest < max_wait * 2, "slowest miss waited {slowest:?}");
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_http_source_reads_key_set() {
        use axum::{routing::get, Router};

        let app = Router::new().route(
            "/tenant/discovery/v2.0/keys",
            get(|| async {
                (
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    JWKS_JSON,
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = HttpJwksSource::new(
            format!("http://{addr}/tenant/discovery/v2.0/keys"),
            Duration::from_secs(5),
        )
        .unwrap();
        let set = source.fetch().await.unwrap();

        assert_eq!(set.keys.len(), 1);
        assert_eq!(set.keys[0].common.key_id.as_deref(), Some(SIGNER_KID));
    }
}
