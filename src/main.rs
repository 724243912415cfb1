//! tornet - change your Tor exit IP on a schedule
//!
//! Every cycle asks Tor for a new identity over the control port (or
//! restarts the Tor service when the control port is unusable), waits for
//! new circuits and checks the exit IP through the SOCKS proxy.
//!
//! # Usage
//!
//! ```bash
//! # Change IP 10 times, once a minute
//! tornet run
//!
//! # Every 30 seconds until Ctrl-C
//! tornet run --interval 30 --count 0
//!
//! # Show current exit IP
//! tornet ip
//!
//! # Check the control port
//! tornet status
//! ```

use anyhow::Result;
use tornet::cli::{self, Commands};
use tornet::{config, logging, scheduler};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Commands::Run(args) = &cli.command {
        args.apply(&mut config, cli.verbose);
        config::validate(&config)?;
    }

    let verbose = cli.verbose || config.rotation.verbose;
    logging::init(verbose, config.logging.file.as_deref())?;

    match &cli.command {
        Commands::Run(_) => {
            info!("tornet v{} starting", tornet::VERSION);
            let summary = scheduler::run(config).await?;
            println!("Done: {}", summary);
        },
        Commands::Ip(args) => {
            cli::run_ip(&config, args).await?;
        },
        Commands::Status(args) => {
            cli::run_status(&config, args).await?;
        },
        Commands::Stop => {
            cli::run_stop(&config).await?;
        },
    }

    Ok(())
}
