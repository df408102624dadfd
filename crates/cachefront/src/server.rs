use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use cachefront_service::config::Config;
use cachefront_service::metric;

use crate::endpoints;
use crate::service::RequestService;

/// Starts the HTTP server based on the loaded config and blocks until shutdown.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("cachefront-web")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let service = RequestService::create(config.clone())
            .await
            .context("failed to create service state")?;

        let socket = config.bind.parse::<SocketAddr>()?;
        let handle = axum_server::Handle::new();
        tokio::spawn(wait_for_shutdown(handle.clone(), config.shutdown_grace));

        tracing::info!("Starting HTTP server on {}", socket);
        axum_server::bind(socket)
            .handle(handle)
            .serve(endpoints::create_app(service.clone()).into_make_service())
            .await
            .context("failed to run the HTTP server")?;

        // The listener is closed and in-flight requests have completed.
        // Drain outstanding store operations before exiting.
        service.shutdown().await;
        tracing::info!("System shutdown complete");

        Ok(())
    })
}

/// Completes once the process receives SIGINT or SIGTERM.
///
/// Container runtimes stop services with SIGTERM, so both have to trigger
/// the drain.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to install the SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install the SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

/// Turns the process shutdown signal into a graceful server shutdown.
///
/// Connections get `grace` to finish; whatever is still running afterwards
/// is aborted.
async fn wait_for_shutdown(handle: axum_server::Handle, grace: Duration) {
    shutdown_signal().await;

    tracing::info!("Shutdown signal received, draining requests");
    handle.graceful_shutdown(Some(grace));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_resolves_shutdown_signal() {
        let signal = tokio::spawn(shutdown_signal());
        // Let the handlers install before raising.
        tokio::time::sleep(Duration::from_millis(50)).await;

        unsafe { libc::raise(libc::SIGTERM) };

        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .expect("SIGTERM did not resolve the shutdown signal")
            .unwrap();
    }
}
