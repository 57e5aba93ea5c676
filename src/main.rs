//! Cache Proxy - A caching, rate-limiting HTTP reverse proxy
//!
//! Binary entry point: configuration, wiring and graceful shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use cache_proxy::{
    cache::{Cache, MemoryCache},
    config::LogFormat,
    create_metrics_router, create_router,
    metrics::ProxyMetrics,
    ratelimit::TokenBucketLimiter,
    upstream::HttpUpstream,
    AppState, Config, StatsState,
};
use tokio::{net::TcpListener, signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Caching, rate-limiting HTTP reverse proxy
#[derive(Parser)]
#[command(name = "cache_proxy")]
#[command(version, about)]
struct Cli {
    /// Path to a YAML or JSON config file, overriding PROXY_CONFIG_FILE
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Main entry point for the proxy.
///
/// # Startup Sequence
/// 1. Parse arguments, load configuration from file and environment
/// 2. Initialize tracing subscriber for logging
/// 3. Build cache, rate limiter, metrics and upstream client
/// 4. Start the metrics listener when enabled
/// 5. Serve the proxy router with peer addresses attached
/// 6. On SIGINT/SIGTERM drain within the shutdown timeout, then stop
///    the limiter's reclamation task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config);

    info!(
        upstream = %config.upstream.url,
        cache_enabled = config.cache.enabled,
        rate_limit_enabled = config.rate_limit.enabled,
        metrics_enabled = config.metrics.enabled,
        "Configuration loaded"
    );

    let upstream = HttpUpstream::new(&config.upstream).context("failed to build upstream client")?;
    let mut state = AppState::new(Arc::new(upstream));

    let cache: Option<Arc<dyn Cache>> = config.cache.enabled.then(|| {
        info!(max_size = config.cache.max_size, "Response cache initialized");
        Arc::new(MemoryCache::new(config.cache.max_size)) as Arc<dyn Cache>
    });
    if let Some(cache) = &cache {
        state = state.with_cache(cache.clone(), &config.cache);
    }

    let limiter = config.rate_limit.enabled.then(|| {
        TokenBucketLimiter::start(config.rate_limit.requests_per_second, config.rate_limit.burst)
    });
    if let Some(limiter) = &limiter {
        let extractor = config
            .rate_limit
            .key_strategy
            .extractor(&config.rate_limit.api_key_header);
        state = state.with_rate_limit(limiter.clone(), extractor);
        info!(
            rate = config.rate_limit.requests_per_second,
            burst = config.rate_limit.burst,
            strategy = ?config.rate_limit.key_strategy,
            "Rate limiter started"
        );
    }

    let shutdown = CancellationToken::new();

    let metrics_server = if config.metrics.enabled {
        let metrics = Arc::new(ProxyMetrics::new().context("failed to register metrics")?);
        state = state.with_metrics(metrics.clone());
        Some(
            spawn_metrics_server(&config, StatsState { metrics, cache }, shutdown.clone())
                .await?,
        )
    } else {
        None
    };

    let addr = format!("{}:{}", config.server.address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Proxy listening on http://{}", addr);

    let app = create_router(state);
    let token = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(token.cancelled_owned())
        .await
    });

    tokio::select! {
        result = &mut server => {
            result.context("proxy server task failed")??;
        }
        _ = shutdown_signal() => {
            shutdown.cancel();
            let drain = Duration::from_secs(config.server.shutdown_timeout);
            match tokio::time::timeout(drain, &mut server).await {
                Ok(result) => result.context("proxy server task failed")??,
                Err(_) => {
                    warn!(timeout_secs = drain.as_secs(), "Shutdown timed out, aborting open connections");
                    server.abort();
                }
            }
        }
    }

    shutdown.cancel();
    if let Some(limiter) = limiter {
        limiter.stop();
    }
    if let Some(handle) = metrics_server {
        if let Err(err) = handle.await {
            warn!(error = %err, "Metrics server task failed");
        }
    }

    info!("Proxy shutdown complete");
    Ok(())
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let (json, console) = match config.logging.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Console => (None, Some(tracing_subscriber::fmt::layer())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(console)
        .init();
}

/// Binds the metrics listener and serves the exposition until `shutdown`.
async fn spawn_metrics_server(
    config: &Config,
    state: StatsState,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let addr = format!("{}:{}", config.server.address, config.metrics.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    info!("Metrics listening on http://{}{}", addr, config.metrics.path);

    let app = create_metrics_router(&config.metrics.path, state);
    Ok(tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!(error = %err, "Metrics server failed");
        }
    }))
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
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
                error!(error = %err, "Failed to install SIGTERM handler");
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
