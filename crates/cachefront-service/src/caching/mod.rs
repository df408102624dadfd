//! The cache policy layer.
//!
//! Wraps the [`Store`](crate::store::Store) with key namespacing,
//! serialization, TTL assignment and a single-flight guarantee: concurrent
//! requests for the same missing key trigger at most one recomputation
//! across all processes sharing the store.

mod error;
mod key;
mod manager;
mod payload;

pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
pub use manager::{CacheManager, Outcome};
pub use payload::{Json, Payload, PayloadError};
