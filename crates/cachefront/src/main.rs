//! Cachefront.
//!
//! Cachefront is a standalone web service that sits in front of a slow origin and serves its
//! responses through a shared Redis-compatible cache. Concurrent misses for the same key are
//! coalesced into a single origin fetch, and a store outage degrades the service to a plain
//! pass-through proxy instead of taking it down. It also exposes a first-writer-wins dedup
//! check for exactly-once event processing across service replicas.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;
mod service;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
