use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the cache layer.
///
/// Transient store failures do not normally appear here: `get_or_compute`
/// absorbs them by degrading to a direct origin fetch. Compute failures are
/// never absorbed.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Too many concurrent waiters on one key; the wait for the in-flight
    /// recomputation elapsed. Retriable by the caller.
    #[error("timed out after {0:?} waiting for an in-flight recomputation")]
    StampedeTimeout(Duration),

    /// The origin/compute step failed. Propagated verbatim.
    #[error(transparent)]
    Compute(anyhow::Error),

    /// The encode/decode contract was violated for an entry.
    #[error("serialization failed: {0}")]
    Serialization(#[from] super::PayloadError),

    /// A store failure on an operation that has no degradation path,
    /// such as an explicit invalidation or a dedup check.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CacheResult<T> = Result<T, CacheError>;
