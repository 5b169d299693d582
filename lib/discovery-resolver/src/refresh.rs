//! Background refresh of the status table

use crate::{LoadBalancingStrategy, Resolver};
use discovery_core::{DiscoveryError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handle to a running refresh loop
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Spawn a loop that re-resolves `names` every `interval`, bypassing the
    /// cache. The first pass runs immediately.
    pub fn spawn(
        resolver: Arc<Resolver>,
        names: Vec<String>,
        strategy: LoadBalancingStrategy,
        interval: Duration,
    ) -> Result<Self> {
        if names.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "service names cannot be empty".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(DiscoveryError::InvalidArgument(
                "interval must be greater than 0".to_string(),
            ));
        }
        resolver.registry()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(resolver, names, strategy, interval, shutdown_rx));

        Ok(Self { shutdown, task })
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A pass already in flight completes; no pass starts afterwards.
    pub async fn stop(self) {
        // Err only means the loop already exited
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Refresh task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run(
    resolver: Arc<Resolver>,
    names: Vec<String>,
    strategy: LoadBalancingStrategy,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(services = ?names, %strategy, ?interval, "Service refresh started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                debug!(services = ?names, "Refreshing services");
                resolver.metrics().refresh_passes_total.inc();
                if let Err(e) = resolver.refresh(&names, &strategy).await {
                    warn!("Service refresh failed: {}", e);
                }
            }
        }
    }

    info!("Service refresh stopped");
}
