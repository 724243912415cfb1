//! Command-line interface for tornet
//!
//! Provides main commands:
//! - `run` - Rotate the exit IP on a schedule
//! - `ip` - Show the current exit IP and location
//! - `status` - Check the Tor control port
//! - `stop` - Stop the Tor service

mod ip;
mod status;
mod stop;

pub use ip::run_ip;
pub use status::run_status;
pub use stop::run_stop;

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tornet - Rotate your Tor exit IP on a schedule
#[derive(Parser, Debug)]
#[command(name = "tornet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (debug logs and per-cycle error details)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rotate the exit IP repeatedly
    Run(RunArgs),

    /// Show the current public IP and its location
    Ip(IpArgs),

    /// Check the Tor control port connection
    Status(StatusArgs),

    /// Stop the Tor service
    Stop,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Seconds between IP changes
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Number of IP changes (0 = until interrupted)
    #[arg(short = 'n', long)]
    pub count: Option<u64>,
}

/// Arguments for ip command
#[derive(Parser, Debug)]
pub struct IpArgs {
    /// Query without Tor (shows the host's real address)
    #[arg(long, default_value_t = false)]
    pub direct: bool,
}

/// Arguments for status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(long, default_value = "text")]
    pub format: String,
}

impl RunArgs {
    /// Apply command line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config, verbose: bool) {
        if let Some(interval) = self.interval {
            config.rotation.interval_secs = interval;
        }
        if let Some(count) = self.count {
            config.rotation.count = count;
        }
        if verbose {
            config.rotation.verbose = true;
        }
    }
}

/// Parse command line arguments
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from(["tornet", "-v", "run", "--interval", "30", "-n", "0"]).unwrap();
        let Commands::Run(args) = &cli.command else {
            panic!("expected run command");
        };

        let mut config = Config::default();
        args.apply(&mut config, cli.verbose);

        assert_eq!(config.rotation.interval_secs, 30);
        assert_eq!(config.rotation.count, 0);
        assert!(config.rotation.verbose);
    }

    #[test]
    fn test_run_without_flags_keeps_config() {
        let cli = Cli::try_parse_from(["tornet", "run"]).unwrap();
        let Commands::Run(args) = &cli.command else {
            panic!("expected run command");
        };

        let mut config = Config::default();
        config.rotation.interval_secs = 90;
        args.apply(&mut config, cli.verbose);

        assert_eq!(config.rotation.interval_secs, 90);
        assert_eq!(config.rotation.count, 10);
        assert!(!config.rotation.verbose);
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["tornet", "ip", "--direct", "--config", "/tmp/t.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.toml")));
        assert!(matches!(cli.command, Commands::Ip(IpArgs { direct: true })));
    }
}
