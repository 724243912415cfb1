//! Status command - check the Tor control port
//!
//! Displays:
//! - Authentication method that worked
//! - Tor version
//! - Bootstrap progress
//! - Whether a circuit is established

use super::StatusArgs;
use crate::config::Config;
use crate::tor::TorControlClient;
use anyhow::{Context, Result};

/// Run the status command
pub async fn run_status(config: &Config, args: &StatusArgs) -> Result<()> {
    let client = TorControlClient::new(config.tor.clone());
    let mut tor = client
        .connect()
        .await
        .with_context(|| format!("Cannot use Tor control port {}", config.tor.control_addr()))?;

    let version = tor.version().await.context("GETINFO version failed")?;
    let progress = tor
        .bootstrap_progress()
        .await
        .context("GETINFO status/bootstrap-phase failed")?;
    let circuit = tor
        .circuit_established()
        .await
        .context("GETINFO status/circuit-established failed")?;
    tor.close().await;

    if args.format == "json" {
        let status = serde_json::json!({
            "control_addr": config.tor.control_addr(),
            "version": version,
            "bootstrap_progress": progress,
            "circuit_established": circuit,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Tor control port: {}", config.tor.control_addr());
        println!("  Version:              {}", version);
        println!("  Bootstrap:            {}%", progress);
        println!(
            "  Circuit established:  {}",
            if circuit { "yes" } else { "no" }
        );
    }

    Ok(())
}
