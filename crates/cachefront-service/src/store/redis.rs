use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use deadpool_redis::redis::{AsyncCommands, cmd};
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime};
use tokio::sync::Notify;

use crate::config::StoreSettings;

use super::{Store, StoreError};

/// The production [`Store`] backed by a Redis connection pool.
///
/// Connections are leased exclusively per operation and returned on every
/// exit path. Leasing is bounded by the configured wait timeout, each remote
/// operation by the configured operation deadline.
pub struct RedisStore {
    pool: Pool,
    op_timeout: Duration,
    closing: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedisStore {
    /// Creates the connection pool. Connections themselves are established
    /// lazily; a store that is down at this point does not fail creation.
    pub fn create(url: &str, settings: &StoreSettings) -> Result<Self> {
        let mut config = deadpool_redis::Config::from_url(url);
        let mut pool = PoolConfig::new(settings.pool_size);
        pool.timeouts.wait = Some(settings.lease_timeout);
        pool.timeouts.create = Some(settings.connect_timeout);
        pool.timeouts.recycle = Some(settings.connect_timeout);
        config.pool = Some(pool);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .context("failed to create store connection pool")?;

        Ok(Self {
            pool,
            op_timeout: settings.op_timeout,
            closing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        })
    }

    /// Registers an in-flight operation, refusing new work during shutdown.
    fn track(&self) -> Result<OpGuard<'_>, StoreError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("store is shutting down".into()));
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(OpGuard { store: self })
    }

    async fn lease(&self) -> Result<Connection, StoreError> {
        self.pool.get().await.map_err(|err| match err {
            PoolError::Timeout(_) => {
                StoreError::Unavailable("timed out waiting for a pool connection".into())
            }
            other => StoreError::Unavailable(other.to_string()),
        })
    }

    /// Applies the operation deadline and maps the redis result.
    async fn deadline<T>(
        &self,
        op: impl std::future::Future<Output = deadpool_redis::redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::Unavailable(err.to_string())),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

struct OpGuard<'a> {
    store: &'a RedisStore,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        let previous = self.store.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.store.drained.notify_waiters();
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.track()?;
        let mut conn = self.lease().await?;
        self.deadline(conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let _guard = self.track()?;
        let mut conn = self.lease().await?;
        let seconds = ttl.as_secs().max(1);
        self.deadline(conn.set_ex(key, value, seconds)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.track()?;
        let mut conn = self.lease().await?;
        let _removed: i64 = self.deadline(conn.del(key)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let _guard = self.track()?;
        let mut conn = self.lease().await?;
        let seconds = ttl.as_secs().max(1);
        // SET NX EX answers with OK when the key was created and nil otherwise.
        let reply: Option<String> = self
            .deadline(
                cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(seconds)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _guard = self.track()?;
        let mut conn = self.lease().await?;
        let _pong: String = self.deadline(cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }

    async fn close(&self, grace: Duration) {
        self.closing.store(true, Ordering::Release);

        let drain = async {
            loop {
                let notified = self.drained.notified();
                if self.in_flight.load(Ordering::Acquire) == 0 {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            tracing::warn!(
                in_flight = self.in_flight.load(Ordering::Relaxed),
                "Store operations still in flight after grace period, closing anyway"
            );
        }

        self.pool.close();
        tracing::info!("Store connection pool closed");
    }
}
