//! IP command - show the current exit address

use super::IpArgs;
use crate::config::Config;
use crate::ip::IpReporter;
use anyhow::{Context, Result};

/// Print the current public IP, through Tor unless `--direct`
pub async fn run_ip(config: &Config, args: &IpArgs) -> Result<()> {
    let reporter = if args.direct {
        IpReporter::direct(config.ip_check.clone())?
    } else {
        IpReporter::new(config.ip_check.clone(), &config.tor)?
    };

    let observation = reporter.fetch().await.with_context(|| {
        if args.direct {
            "Could not determine the public IP".to_string()
        } else {
            format!(
                "Could not reach the IP service through Tor ({}). Is Tor running?",
                config.tor.socks_url()
            )
        }
    })?;

    println!("{}", observation);
    Ok(())
}
