use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CacheSettings;
use crate::store::{Store, StoreError};

use super::{CacheError, CacheKey, CacheResult, Payload};

/// Contents of in-flight marker and dedup entries. The stored value carries
/// no information, only the key's existence does.
const TOKEN: &[u8] = b"1";

/// How a value was obtained, for the per-request observability event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the cache.
    Hit,
    /// Recomputed by this request and written back.
    Miss,
    /// Another request recomputed it while this one waited.
    Coalesced,
    /// The store was unavailable; computed directly, bypassing the cache.
    Degraded,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
            Outcome::Coalesced => "coalesced",
            Outcome::Degraded => "degraded",
        }
    }
}

impl AsRef<str> for Outcome {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// The cache policy layer on top of a [`Store`].
///
/// Owns key construction and entry lifecycle. The single-flight guarantee is
/// enforced through an atomic conditional-set on the shared store, so it holds
/// across all server processes, not just within this one.
#[derive(Debug, Clone)]
pub struct CacheManager {
    store: Arc<dyn Store>,
    namespace: Arc<str>,
    settings: CacheSettings,
}

impl CacheManager {
    pub fn new(store: Arc<dyn Store>, namespace: &str, settings: CacheSettings) -> Self {
        CacheManager {
            store,
            namespace: namespace.into(),
            settings,
        }
    }

    /// Builds the namespaced key for a logical identifier.
    pub fn key(&self, logical: &str) -> CacheKey {
        CacheKey::new(&self.namespace, logical)
    }

    /// Looks up `logical` in the cache, computing and populating it on a miss.
    ///
    /// Concurrent calls for the same missing key collapse into a single
    /// execution of `compute`; the others poll for its result with bounded
    /// backoff and fail with [`CacheError::StampedeTimeout`] if it does not
    /// appear within the configured wait.
    ///
    /// If the store is unavailable, `compute` is invoked directly and its
    /// result returned with [`Outcome::Degraded`]; store outages never fail
    /// the request. Compute failures are returned verbatim as
    /// [`CacheError::Compute`].
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        logical: &str,
        ttl: Duration,
        compute: F,
    ) -> CacheResult<(T, Outcome)>
    where
        T: Payload,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let key = self.key(logical);

        match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match T::decode(bytes) {
                Ok(value) => return Ok((value, Outcome::Hit)),
                Err(err) => {
                    // The entry is unusable; invalidate it and recompute.
                    tracing::warn!(key = %key, error = %err, "Failed to decode cache entry, invalidating");
                    metric!(counter("cache.decode_failure") += 1);
                    if let Err(err) = self.store.delete(key.as_str()).await {
                        tracing::debug!(key = %key, error = %err, "Failed to invalidate undecodable entry");
                    }
                }
            },
            Ok(None) => {}
            Err(err) => return self.degrade(&key, err, compute).await,
        }

        self.fill_or_wait(key, ttl, compute).await
    }

    /// Miss path: acquire the in-flight marker and recompute, or wait for the
    /// marker holder to finish.
    async fn fill_or_wait<T, F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        compute: F,
    ) -> CacheResult<(T, Outcome)>
    where
        T: Payload,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let marker = key.marker();
        let deadline = Instant::now() + self.settings.stampede_timeout;
        let mut backoff = self.settings.initial_poll_interval;
        let mut compute = Some(compute);

        loop {
            // The marker TTL bounds the hold time: a holder that dies without
            // cleaning up blocks the key only until the marker expires.
            match self
                .store
                .set_if_absent(marker.as_str(), TOKEN, self.settings.marker_ttl)
                .await
            {
                Ok(true) => {
                    let compute = compute.take().expect("compute is consumed at most once");
                    let value = self.fill(key, marker, ttl, compute).await?;
                    return Ok((value, Outcome::Miss));
                }
                Ok(false) => {}
                Err(err) => {
                    let compute = compute.take().expect("compute is consumed at most once");
                    return self.degrade(&key, err, compute).await;
                }
            }

            // Another caller owns the recomputation; poll for its result.
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.settings.max_poll_interval);

            if Instant::now() >= deadline {
                metric!(counter("cache.stampede_timeout") += 1);
                return Err(CacheError::StampedeTimeout(self.settings.stampede_timeout));
            }

            match self.store.get(key.as_str()).await {
                Ok(Some(bytes)) => match T::decode(bytes) {
                    Ok(value) => return Ok((value, Outcome::Coalesced)),
                    Err(err) => {
                        metric!(counter("cache.decode_failure") += 1);
                        if let Err(err) = self.store.delete(key.as_str()).await {
                            tracing::debug!(key = %key, error = %err, "Failed to invalidate undecodable entry");
                        }
                        return Err(err.into());
                    }
                },
                // Nothing yet. If the holder died, its marker has expired or
                // been removed and the next iteration takes over.
                Ok(None) => {}
                Err(err) => {
                    let compute = compute.take().expect("compute is consumed at most once");
                    return self.degrade(&key, err, compute).await;
                }
            }
        }
    }

    /// Runs the recomputation as the marker holder and populates the cache.
    ///
    /// The computation runs in a detached task: a client disconnect must not
    /// cancel work that other waiters depend on.
    async fn fill<T, F, Fut>(
        &self,
        key: CacheKey,
        marker: CacheKey,
        ttl: Duration,
        compute: F,
    ) -> CacheResult<T>
    where
        T: Payload,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(async move {
            let result = compute().await;

            if let Ok(value) = &result {
                match value.encode() {
                    Ok(bytes) => {
                        if let Err(err) = store.set(key.as_str(), &bytes, ttl).await {
                            tracing::warn!(key = %key, error = %err, "Failed to populate cache entry");
                            metric!(counter("cache.write_failure") += 1);
                        }
                    }
                    Err(err) => {
                        tracing::error!(key = %key, error = %err, "Failed to encode computed value");
                        metric!(counter("cache.encode_failure") += 1);
                    }
                }
            }

            // Release the marker on success and failure alike, so waiters can
            // retry promptly instead of sitting out the marker TTL.
            if let Err(err) = store.delete(marker.as_str()).await {
                tracing::debug!(key = %marker, error = %err, "Failed to remove in-flight marker");
            }

            result
        });

        match task.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CacheError::Compute(err)),
            Err(err) => Err(CacheError::Compute(anyhow::Error::new(err))),
        }
    }

    /// Store outage path: bypass the cache and serve from the origin.
    async fn degrade<T, F, Fut>(
        &self,
        key: &CacheKey,
        err: StoreError,
        compute: F,
    ) -> CacheResult<(T, Outcome)>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        tracing::warn!(key = %key, error = %err, "Store unavailable, bypassing cache");
        metric!(counter("cache.degraded") += 1);
        match compute().await {
            Ok(value) => Ok((value, Outcome::Degraded)),
            Err(err) => Err(CacheError::Compute(err)),
        }
    }

    /// Removes the entry for `logical` from the cache.
    pub async fn invalidate(&self, logical: &str) -> CacheResult<()> {
        let key = self.key(logical);
        self.store.delete(key.as_str()).await?;
        Ok(())
    }

    /// First-writer-wins check on an event key.
    ///
    /// Returns `true` iff this call was the first to record `event` within
    /// the TTL window. Event keys live in their own reserved key space, so
    /// they can never collide with cached values. Store failures propagate;
    /// there is no meaningful way to dedup without the store.
    pub async fn dedup_once(&self, event: &str, ttl: Duration) -> CacheResult<bool> {
        let key = CacheKey::dedup(&self.namespace, event);
        let created = self.store.set_if_absent(key.as_str(), TOKEN, ttl).await?;
        Ok(created)
    }
}
