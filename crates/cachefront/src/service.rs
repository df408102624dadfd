use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::Url;

use cachefront_service::caching::CacheManager;
use cachefront_service::config::Config;
use cachefront_service::lifecycle::ServiceState;

/// Shared state of all request handlers.
///
/// Wraps the [`ServiceState`] with the HTTP client used for origin fetches.
/// Cloning is cheap; one instance is shared across the whole router.
#[derive(Debug, Clone)]
pub struct RequestService {
    state: ServiceState,
    origin: reqwest::Client,
}

impl RequestService {
    /// Creates the full service state, bringing up the store connection pool.
    pub async fn create(config: Config) -> Result<Self> {
        let state = ServiceState::create(config).await?;
        Self::new(state)
    }

    /// Assembles the handler state around existing service state.
    pub fn new(state: ServiceState) -> Result<Self> {
        let origin = reqwest::Client::builder()
            .timeout(state.config().origin_timeout)
            .build()
            .context("failed to create the origin HTTP client")?;

        Ok(RequestService { state, origin })
    }

    pub fn config(&self) -> &Config {
        self.state.config()
    }

    pub fn cache(&self) -> &CacheManager {
        self.state.cache()
    }

    pub async fn shutdown(&self) {
        self.state.shutdown().await;
    }

    /// Resolves a cache key to the origin URL it is fetched from.
    pub fn origin_url(&self, key: &str) -> Result<Url> {
        self.config()
            .origin_url
            .join(key)
            .with_context(|| format!("key {key:?} does not map to a valid origin URL"))
    }

    /// Fetches a key from the origin, treating any non-2xx response as failure.
    ///
    /// This is the compute step of the read-through cache. It is deliberately
    /// detached from `self` so it can run in a spawned task after the client
    /// that triggered it went away.
    pub fn origin_fetch(
        &self,
        url: Url,
    ) -> impl std::future::Future<Output = Result<Bytes>> + Send + use<> {
        let client = self.origin.clone();
        async move {
            let response = client
                .get(url.clone())
                .send()
                .await
                .with_context(|| format!("origin unreachable at {url}"))?;

            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("origin responded with {status} for {url}");
            }

            response
                .bytes()
                .await
                .with_context(|| format!("failed to read origin response body from {url}"))
        }
    }
}

/// Bounds a handler-supplied TTL override to something the store accepts.
pub fn effective_ttl(requested: Option<Duration>, default: Duration) -> Duration {
    match requested {
        Some(ttl) if !ttl.is_zero() => ttl,
        _ => default,
    }
}
