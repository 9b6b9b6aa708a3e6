//! Mirror Redirector Server
//!
//! Loads the configuration, publishes the initial topology and serves
//! redirects. `SIGHUP` re-reads the configuration like `/reload` does.

use anyhow::{Context, Result};
use mirror_redirector::{
    GeoLocator, MaxMindLocator, MetricsEndpoint, RedirectEngine, RedirectServer,
    RedirectSettings, RedirectorConfig, RedirectorMetrics, ReloadHandler, StaticLocator,
    TopologyController,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Main entry point for the redirector
///
/// # Usage
/// ```bash
/// # Start with default config (redirector.yaml)
/// mirror-redirector
///
/// # Start with custom config
/// mirror-redirector /etc/redirector/redirector.yaml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Mirror Redirector");

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "redirector.yaml".to_string());

    info!("Loading configuration from: {}", config_path);

    let config = RedirectorConfig::from_file(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    info!("Configuration loaded successfully");
    info!("  - Bind address: {}", config.bind_address);
    info!("  - Mirrors: {}", config.topology.mirrors.len());
    info!("  - Regions: {}", config.topology.regions.len());
    info!("  - Default scheme: {}", config.default_scheme);
    info!("  - GeoIP database: {:?}", config.geodb_path);
    info!("  - Remap source: {:?}", config.remap.as_ref().map(|r| &r.path));

    let locator: Arc<dyn GeoLocator> = match &config.geodb_path {
        Some(path) => Arc::new(MaxMindLocator::open(path)?),
        None => {
            warn!("No GeoIP database configured, every client resolves to the fallback coordinate");
            Arc::new(StaticLocator::new())
        }
    };

    let metrics = RedirectorMetrics::new().context("failed to register metrics")?;

    let controller = Arc::new(TopologyController::empty());
    let reload = Arc::new(
        ReloadHandler::new(Arc::clone(&controller), &config_path)
            .with_auth(config.reload_token.clone())
            .with_metrics(metrics.clone()),
    );

    if config.reload_token.is_none() {
        warn!("No reload_token configured, /reload will refuse every request");
    }

    // Initial load goes through the same path as every later reload
    let report = reload.spawn_reload().await.context("failed to build initial topology")?;
    info!(
        "Serving {} mirrors ({} available)",
        report.mirrors, report.available_mirrors
    );

    if let Some(endpoint) = config.metrics_endpoint.as_ref().filter(|e| e.enabled) {
        let addr: SocketAddr = endpoint
            .address
            .parse()
            .with_context(|| format!("invalid metrics address {}", endpoint.address))?;
        let metrics_endpoint = MetricsEndpoint::new(metrics.clone(), addr);
        tokio::spawn(async move {
            if let Err(e) = metrics_endpoint.start().await {
                error!("Metrics endpoint stopped: {}", e);
            }
        });
    }

    spawn_reload_on_hangup(Arc::clone(&reload));

    let engine = Arc::new(RedirectEngine::new(
        controller,
        locator,
        metrics,
        RedirectSettings::from_config(&config),
    ));

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address))?;

    let server = Arc::new(RedirectServer::new(engine, reload));
    server.start(addr).await?;

    Ok(())
}

#[cfg(unix)]
fn spawn_reload_on_hangup(reload: Arc<ReloadHandler>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading {}", reload.config_path().display());
            if let Err(e) = reload.spawn_reload().await {
                debug!("SIGHUP reload left the live topology in place: {}", e);
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_reload: Arc<ReloadHandler>) {}
