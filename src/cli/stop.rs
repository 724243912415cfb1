//! Stop command - shut down the Tor service

use crate::config::Config;
use crate::service::ServiceManager;
use anyhow::{Context, Result};
use tracing::info;

/// Stop the Tor daemon via the service manager
pub async fn run_stop(config: &Config) -> Result<()> {
    let service = ServiceManager::new(config.service.clone());

    if !service.is_running().await {
        info!("Tor is not running");
        return Ok(());
    }

    service
        .stop()
        .await
        .with_context(|| format!("Failed to stop {}", config.service.name))?;

    println!("Tor service stopped");
    Ok(())
}
