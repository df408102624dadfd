//! The remote key-value store client.
//!
//! All shared state lives in a Redis-compatible store reached through a
//! connection pool. The [`Store`] trait is the seam between the cache layer
//! and the physical client, so tests can substitute an in-memory store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod redis;

pub use self::redis::RedisStore;

/// Errors surfaced by store operations.
///
/// Transient by construction: the caller is expected to recover, typically by
/// degrading to a direct origin fetch.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No connection could be leased, the connection failed, or the client
    /// is shutting down.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The remote operation did not complete within its deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Operations against the remote key-value store.
///
/// Every operation carries an explicit deadline and leases a pool connection
/// exclusively for its duration. `None` returned from [`get`](Store::get) is
/// the explicit absent marker, distinct from an empty value.
#[async_trait]
pub trait Store: fmt::Debug + Send + Sync + 'static {
    /// Fetches the raw bytes stored at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` at `key` with the given time-to-live.
    ///
    /// Returns only once the store has acknowledged the write.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Removes the entry at `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically stores `value` at `key` only if the key is absent.
    ///
    /// Returns `true` iff this call created the entry. This is the primitive
    /// underlying both the single-flight marker and dedup.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Verifies connectivity to the store.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Drains in-flight operations up to `grace`, then closes all connections.
    ///
    /// Operations issued after this call fail with [`StoreError::Unavailable`].
    async fn close(&self, _grace: Duration) {}
}
