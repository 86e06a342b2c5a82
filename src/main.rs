//! Stampede Cache - process entry point
//!
//! Builds the configured cache instances and keeps them alive until a
//! shutdown signal arrives.

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stampede_cache::{BackendKind, CacheRegistry, Config};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Register the in-process `default` cache
/// 4. Register the networked `shared` cache when `REDIS_URL` is set
/// 5. Wait for SIGINT/SIGTERM, then close every cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stampede_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stampede Cache");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_entries={}, default_ttl={}s, cleanup_interval={}s, lock_ttl={}ms",
        config.max_entries, config.default_ttl, config.cleanup_interval, config.lock_ttl_ms
    );

    let registry = CacheRegistry::new();
    registry
        .create("default", BackendKind::Memory, config.cache_options())
        .await?;

    match &config.redis_url {
        Some(url) => {
            registry
                .create(
                    "shared",
                    BackendKind::Redis { url: url.clone() },
                    config.cache_options(),
                )
                .await?;
        }
        None => info!("REDIS_URL not set, networked cache disabled"),
    }

    info!("Caches ready: {:?}", registry.names().await);

    shutdown_signal().await;

    registry.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
