use anyhow::Result;
use discovery_consul::ConsulRegistry;
use discovery_resolver::DiscoveryClient;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting service-discovery daemon...");

    let config = DaemonConfig::from_env()?;
    let client = Arc::new(DiscoveryClient::new(config.discovery.clone())?);

    // Serve /health before registering so the first registry check passes
    let listener = TcpListener::bind(config.listen).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(server::serve(listener, client.clone(), shutdown_rx));

    let consul = ConsulRegistry::new(config.consul_addr.clone())?;
    info!("Using Consul agent at {}", consul.base_url());
    let service_id = client
        .init(Arc::new(consul), config.registration.clone())
        .await?;

    if config.discovery.services.is_empty() {
        warn!("DISCOVERY_SERVICES is empty, background refresh not started");
    } else {
        client.start_configured_refresh().await?;
    }

    wait_for_signal().await?;
    info!("Shutdown signal received, deregistering {}", service_id);

    if let Err(e) = client.shutdown().await {
        error!("Deregister service failed: {}", e);
    }

    // Err only means the server already exited
    let _ = shutdown_tx.send(true);
    server.await?;

    info!("service-discovery stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
