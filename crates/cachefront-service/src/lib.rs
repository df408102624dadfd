//! Core service layer of cachefront.
//!
//! This crate contains everything except the HTTP surface: configuration,
//! the remote store client, the cache manager with its single-flight
//! coordination, and the process lifecycle that ties them together.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
