//! Main scheduler loop

use crate::config::Config;
use crate::ip::IpReporter;
use crate::rotation::RotationController;
use crate::service::ServiceManager;
use crate::state::RunSummary;
use crate::tor::TorControlClient;
use anyhow::{bail, Result};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to wait for the SOCKS port after starting Tor ourselves
const STARTUP_WAIT: Duration = Duration::from_secs(60);

/// Upper bound for a single connection attempt while waiting
const CONNECT_ATTEMPT: Duration = Duration::from_secs(3);

/// Exit status after a second stop request (128 + SIGINT)
const FORCED_EXIT: i32 = 130;

/// Run the rotation loop until done, cancelled, or failed too often
pub async fn run(config: Config) -> Result<RunSummary> {
    prepare_tor(&config).await?;

    let control = TorControlClient::new(config.tor.clone());
    let service = ServiceManager::new(config.service.clone());
    let reporter = IpReporter::new(config.ip_check.clone(), &config.tor)?;
    let mut controller =
        RotationController::new(config.rotation.clone(), control, service, reporter);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let signal_handle = tokio::spawn(async move {
        watch_signals(watcher, shutdown_signal).await;
        warn!("Second stop request, exiting immediately");
        std::process::exit(FORCED_EXIT);
    });

    let result = controller.run(&cancel).await;
    signal_handle.abort();

    Ok(result?)
}

/// One-time setup before the first cycle: make sure Tor is up
///
/// Failing to start Tor is not fatal; the first cycles will fail and the
/// failure bound decides.
pub async fn prepare_tor(config: &Config) -> Result<()> {
    if !config.service.autostart {
        return Ok(());
    }

    let service = ServiceManager::new(config.service.clone());
    if service.is_running().await {
        debug!("Tor already running");
        return Ok(());
    }

    info!("Tor is not running, starting {}", config.service.name);
    if let Err(e) = service.start().await {
        warn!("Could not start Tor: {}", e);
        return Ok(());
    }

    let socks_addr = format!("{}:{}", config.tor.socks_host, config.tor.socks_port);
    wait_for_port(&socks_addr, STARTUP_WAIT).await?;
    info!("Tor SOCKS port {} is accepting connections", socks_addr);
    Ok(())
}

async fn wait_for_port(addr: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let attempt = CONNECT_ATTEMPT.min(remaining).max(Duration::from_millis(100));
        if let Ok(Ok(_)) = tokio::time::timeout(attempt, TcpStream::connect(addr)).await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("Tor did not open {} within {}s", addr, timeout.as_secs());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Cancel the token on the first stop request; returns on the second
async fn watch_signals<F, Fut>(cancel: CancellationToken, mut next_signal: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    next_signal().await;
    info!("Stop requested, finishing the current cycle (repeat to exit now)");
    cancel.cancel();

    next_signal().await;
}

/// Wait for Ctrl-C (or SIGTERM on Unix)
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        },
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        },
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_port_succeeds_when_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        assert!(wait_for_port(&addr, Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_port_gives_up_at_deadline() {
        // Non-routable address: connects hang rather than fail
        let started = Instant::now();
        assert!(wait_for_port("10.255.255.1:9050", Duration::from_secs(5)).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_second_signal_ends_watcher() {
        use std::sync::Arc;
        use tokio::sync::Notify;

        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let signals = Arc::clone(&notify);
        let watcher = tokio::spawn(watch_signals(cancel.clone(), move || {
            let signals = Arc::clone(&signals);
            async move { signals.notified().await }
        }));

        notify.notify_one();
        tokio::time::timeout(Duration::from_secs(2), cancel.cancelled())
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert!(!watcher.is_finished());

        notify.notify_one();
        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_autostart_disabled_is_noop() {
        let mut config = Config::default();
        config.service.autostart = false;
        assert!(prepare_tor(&config).await.is_ok());
    }
}
