use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use aliri::jwk::{KeyId, KeyIdRef};
use aliri_clock::{Clock, System, UnixTime};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use super::KeySource;
use crate::{
    error::KeySourceError,
    http::HttpClient,
    keys::{Key, KeySet},
};

const RATE_WINDOW_SECS: u64 = 60;

/// Tuning for keys fetched from a remote JWKS
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksCacheConfig {
    /// Whether keys fetched by `kid` are cached
    pub enabled: bool,
    /// The maximum number of cached keys
    pub max_entries: usize,
    /// How long a cached key is served before it is fetched again
    pub max_age_secs: u64,
    /// Whether the number of JWKS requests is limited
    pub rate_limit: bool,
    /// The maximum number of JWKS requests in any one-minute window
    pub requests_per_minute: u32,
}

impl JwksCacheConfig {
    /// How long a cached key is served
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10,
            max_age_secs: 300,
            rate_limit: true,
            requests_per_minute: 60,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct CachedKeys {
    entries: HashMap<KeyId, CachedKey>,
}

#[derive(Clone, Debug)]
struct CachedKey {
    key: Key,
    fetched_at: UnixTime,
}

#[derive(Debug)]
struct RequestWindow {
    started: UnixTime,
    requests: u32,
}

struct Inner<C> {
    jwks_url: Url,
    client: Arc<dyn HttpClient>,
    config: JwksCacheConfig,
    cache: ArcSwap<CachedKeys>,
    window: Mutex<RequestWindow>,
    clock: C,
}

impl<C: fmt::Debug> fmt::Debug for Inner<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("JwksKeySource")
            .field("jwks_url", &self.jwks_url.as_str())
            .field("client", &self.client)
            .field("config", &self.config)
            .field("cached", &self.cache.load().entries.len())
            .field("clock", &self.clock)
            .finish()
    }
}

/// A key source backed by a remote JSON Web Key Set
///
/// Keys are fetched by `kid` and cached for the configured maximum age.
/// Once the cache holds the configured maximum number of keys, the
/// oldest key is evicted. JWKS requests may be capped per minute, in
/// which case lookups that would exceed the cap fail with
/// [`KeySourceError::RateLimited`] instead of calling the remote.
///
/// Clones share the same cache and request window.
pub struct JwksKeySource<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for JwksKeySource<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for JwksKeySource<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl JwksKeySource {
    /// Constructs a key source for the JWKS at `jwks_url`
    pub fn new(jwks_url: Url, client: Arc<dyn HttpClient>, config: JwksCacheConfig) -> Self {
        Self::with_clock(jwks_url, client, config, System)
    }
}

impl<C: Clock> JwksKeySource<C> {
    /// Constructs a key source that uses `clock` for cache ages and
    /// request windows
    pub fn with_clock(
        jwks_url: Url,
        client: Arc<dyn HttpClient>,
        config: JwksCacheConfig,
        clock: C,
    ) -> Self {
        let window = RequestWindow {
            started: clock.now(),
            requests: 0,
        };

        Self {
            inner: Arc::new(Inner {
                jwks_url,
                client,
                config,
                cache: ArcSwap::from_pointee(CachedKeys::default()),
                window: Mutex::new(window),
                clock,
            }),
        }
    }

    /// The URL of the remote JWKS
    pub fn jwks_url(&self) -> &Url {
        &self.inner.jwks_url
    }

    /// The cache and rate limit settings
    pub fn config(&self) -> &JwksCacheConfig {
        &self.inner.config
    }

    fn cached(&self, kid: &KeyIdRef, now: UnixTime) -> Option<Key> {
        if !self.inner.config.enabled {
            return None;
        }

        let cache = self.inner.cache.load();
        cache
            .entries
            .get(kid)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.key.clone())
    }

    fn is_fresh(&self, entry: &CachedKey, now: UnixTime) -> bool {
        now.0 < entry.fetched_at.0.saturating_add(self.inner.config.max_age_secs)
    }

    fn remember(&self, kid: &KeyIdRef, key: &Key, now: UnixTime) {
        let max_entries = self.inner.config.max_entries;
        if !self.inner.config.enabled || max_entries == 0 {
            return;
        }

        // Concurrent fetches of the same kid insert equivalent entries
        self.inner.cache.rcu(|current| {
            let mut next = CachedKeys::clone(current);
            next.entries.retain(|_, entry| self.is_fresh(entry, now));
            next.entries.insert(
                kid.to_owned(),
                CachedKey {
                    key: key.clone(),
                    fetched_at: now,
                },
            );

            while next.entries.len() > max_entries {
                let oldest = next
                    .entries
                    .iter()
                    .filter(|(cached_kid, _)| &***cached_kid != kid)
                    .min_by_key(|(_, entry)| entry.fetched_at)
                    .map(|(cached_kid, _)| cached_kid.clone());

                match oldest {
                    Some(oldest) => {
                        next.entries.remove(&oldest);
                    }
                    None => break,
                }
            }

            next
        });
    }

    fn admit_request(&self, now: UnixTime) -> bool {
        if !self.inner.config.rate_limit {
            return true;
        }

        let mut window = self
            .inner
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if now.0 >= window.started.0.saturating_add(RATE_WINDOW_SECS) {
            *window = RequestWindow {
                started: now,
                requests: 0,
            };
        }

        if window.requests < self.inner.config.requests_per_minute {
            window.requests += 1;
            true
        } else {
            false
        }
    }

    #[tracing::instrument(skip(self), fields(jwks.url = %self.inner.jwks_url))]
    async fn fetch(&self) -> Result<KeySet, KeySourceError> {
        if !self.admit_request(self.inner.clock.now()) {
            tracing::warn!(
                jwks.requests_per_minute = self.inner.config.requests_per_minute,
                "JWKS request rate limit reached"
            );
            return Err(KeySourceError::RateLimited);
        }

        tracing::debug!("fetching JWKS");
        let response = match self.inner.client.get(&self.inner.jwks_url).await {
            Ok(response) => response,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "JWKS request failed");
                return Err(err.into());
            }
        };

        if !response.is_success() {
            tracing::warn!(
                http.status_code = response.status,
                "JWKS request failed; unexpected response status",
            );
            return Err(KeySourceError::UnexpectedStatus {
                status: response.status,
            });
        }

        match serde_json::from_slice::<KeySet>(&response.body) {
            Ok(keys) => {
                tracing::info!(jwks.keys = keys.len(), "JWKS refreshed");
                Ok(keys)
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "JWKS refresh failed; unable to deserialize response");
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl<C> KeySource for JwksKeySource<C>
where
    C: Clock + fmt::Debug + Send + Sync,
{
    async fn signing_key(&self, kid: &KeyIdRef) -> Result<Key, KeySourceError> {
        if let Some(key) = self.cached(kid, self.inner.clock.now()) {
            tracing::trace!(jwk.kid = %kid, "JWKS cache hit");
            return Ok(key);
        }

        let keys = self.fetch().await?;
        let key = keys.get(kid).cloned().ok_or_else(|| {
            tracing::debug!(jwk.kid = %kid, "kid not present in JWKS");
            KeySourceError::UnknownKeyId {
                kid: kid.to_owned(),
            }
        })?;

        self.remember(kid, &key, self.inner.clock.now());
        Ok(key)
    }

    async fn key_set(&self) -> Result<KeySet, KeySourceError> {
        self.fetch().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{self, RecordingHttpClient, SharedClock};
    use color_eyre::Result;
    use tracing_test::traced_test;

    fn jwks_url() -> Url {
        Url::parse("https://auth.example/.well-known/jwks.json").unwrap()
    }

    fn hmac_jwks() -> String {
        let keys: KeySet = vec![
            test::hmac_key(Some("a"), b"secret-a"),
            test::hmac_key(Some("b"), b"secret-b"),
        ]
        .into_iter()
        .collect();
        serde_json::to_string(&keys).unwrap()
    }

    fn source(
        client: &Arc<RecordingHttpClient>,
        config: JwksCacheConfig,
        clock: &SharedClock,
    ) -> JwksKeySource<SharedClock> {
        JwksKeySource::with_clock(jwks_url(), client.clone(), config, clock.clone())
    }

    #[tokio::test]
    async fn fetches_key_by_kid_and_caches_it() -> Result<()> {
        let client = RecordingHttpClient::responding(200, test::rsa::JWKS);
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);
        let kid = KeyIdRef::from_str(test::rsa::KEY_ID);

        let first = source.signing_key(kid).await?;
        let second = source.signing_key(kid).await?;

        assert_eq!(first, second);
        assert_eq!(first.key_id(), Some(kid));
        assert_eq!(client.gets(), vec![jwks_url()]);
        Ok(())
    }

    #[tokio::test]
    async fn refetches_after_max_age() -> Result<()> {
        let client = RecordingHttpClient::responding(200, test::rsa::JWKS);
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);
        let kid = KeyIdRef::from_str(test::rsa::KEY_ID);

        source.signing_key(kid).await?;
        clock.advance(299);
        source.signing_key(kid).await?;
        assert_eq!(client.calls(), 1);

        clock.advance(1);
        source.signing_key(kid).await?;
        assert_eq!(client.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn disabled_cache_fetches_every_time() -> Result<()> {
        let client = RecordingHttpClient::responding(200, test::rsa::JWKS);
        let clock = SharedClock::new(test::NOW);
        let config = JwksCacheConfig {
            enabled: false,
            ..JwksCacheConfig::default()
        };
        let source = source(&client, config, &clock);
        let kid = KeyIdRef::from_str(test::rsa::KEY_ID);

        source.signing_key(kid).await?;
        source.signing_key(kid).await?;

        assert_eq!(client.calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn evicts_oldest_key_when_full() -> Result<()> {
        let client = RecordingHttpClient::responding(200, hmac_jwks());
        let clock = SharedClock::new(test::NOW);
        let config = JwksCacheConfig {
            max_entries: 1,
            ..JwksCacheConfig::default()
        };
        let source = source(&client, config, &clock);

        source.signing_key(KeyIdRef::from_str("a")).await?;
        source.signing_key(KeyIdRef::from_str("b")).await?;
        source.signing_key(KeyIdRef::from_str("b")).await?;
        assert_eq!(client.calls(), 2);

        source.signing_key(KeyIdRef::from_str("a")).await?;
        assert_eq!(client.calls(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_kid_is_reported() -> Result<()> {
        let client = RecordingHttpClient::responding(200, test::rsa::JWKS);
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);

        let result = source.signing_key(KeyIdRef::from_str("missing")).await;

        assert!(matches!(result, Err(KeySourceError::UnknownKeyId { .. })));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn rate_limit_caps_requests_per_minute() -> Result<()> {
        let client = RecordingHttpClient::responding(200, hmac_jwks());
        let clock = SharedClock::new(test::NOW);
        let config = JwksCacheConfig {
            enabled: false,
            requests_per_minute: 2,
            ..JwksCacheConfig::default()
        };
        let source = source(&client, config, &clock);
        let kid = KeyIdRef::from_str("a");

        source.signing_key(kid).await?;
        source.signing_key(kid).await?;
        let limited = source.signing_key(kid).await;

        assert!(matches!(limited, Err(KeySourceError::RateLimited)));
        assert_eq!(client.calls(), 2);
        assert!(logs_contain("JWKS request rate limit reached"));

        clock.advance(60);
        source.signing_key(kid).await?;
        assert_eq!(client.calls(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn unexpected_status_is_reported() -> Result<()> {
        let client = RecordingHttpClient::responding(503, "unavailable");
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);

        let result = source.signing_key(KeyIdRef::from_str("a")).await;

        assert!(matches!(
            result,
            Err(KeySourceError::UnexpectedStatus { status: 503 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_body_is_reported() -> Result<()> {
        let client = RecordingHttpClient::responding(200, "<html>");
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);

        let result = source.signing_key(KeyIdRef::from_str("a")).await;

        assert!(matches!(result, Err(KeySourceError::Decode(_))));
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_is_reported() -> Result<()> {
        let client = RecordingHttpClient::unreachable();
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);

        let result = source.signing_key(KeyIdRef::from_str("a")).await;

        assert!(matches!(result, Err(KeySourceError::Request(_))));
        Ok(())
    }

    #[tokio::test]
    async fn key_set_returns_all_keys() -> Result<()> {
        let client = RecordingHttpClient::responding(200, test::rsa::JWKS);
        let clock = SharedClock::new(test::NOW);
        let source = source(&client, JwksCacheConfig::default(), &clock);

        let keys = source.key_set().await?;

        assert_eq!(keys, test::rsa_keys());
        Ok(())
    }
}
