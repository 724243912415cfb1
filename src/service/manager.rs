//! Tor service control through the OS service manager

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::rotation::ServiceRestart;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Service action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
        }
    }
}

/// Host platform, as far as service management is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            _ => Platform::Other,
        }
    }
}

/// Builds the command lines for one service action, in the order they are tried
pub fn command_lines(
    platform: Platform,
    service: &str,
    action: Action,
    use_sudo: bool,
) -> Vec<Vec<String>> {
    let verb = action.as_str();
    let lines: Vec<Vec<&str>> = match platform {
        Platform::Linux => vec![
            vec!["systemctl", verb, service],
            vec!["service", service, verb],
        ],
        Platform::MacOs => vec![vec!["brew", "services", verb, service]],
        Platform::Other => vec![],
    };

    lines
        .into_iter()
        .map(|line| {
            let sudo = use_sudo && line[0] != "brew";
            sudo.then_some("sudo")
                .into_iter()
                .chain(line)
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// Start, stop and restart the Tor daemon
pub struct ServiceManager {
    config: ServiceConfig,
    platform: Platform,
}

impl ServiceManager {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            platform: Platform::current(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    pub async fn start(&self) -> Result<(), ServiceError> {
        self.run_action(Action::Start).await
    }

    pub async fn stop(&self) -> Result<(), ServiceError> {
        self.run_action(Action::Stop).await
    }

    /// Restart the Tor daemon, relaunching the bare process if no manager works
    pub async fn restart(&self) -> Result<(), ServiceError> {
        match self.run_action(Action::Restart).await {
            Err(ServiceError::ManagerUnavailable) if self.platform == Platform::Linux => {
                warn!("No service manager found, relaunching the tor process directly");
                self.relaunch_process().await
            },
            other => other,
        }
    }

    async fn run_action(&self, action: Action) -> Result<(), ServiceError> {
        let lines = command_lines(self.platform, &self.config.name, action, self.config.use_sudo);
        if lines.is_empty() {
            return Err(ServiceError::Unsupported(std::env::consts::OS.to_string()));
        }

        let mut last_failure = ServiceError::ManagerUnavailable;
        for line in lines {
            match self.run(&line).await {
                Ok(()) => {
                    info!("Tor {} via {}", action.as_str(), line.join(" "));
                    return Ok(());
                },
                // Missing binary: try the next manager
                Err(ServiceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{} not available", line[0]);
                },
                Err(e) => {
                    error!("{}", e);
                    last_failure = e;
                },
            }
        }

        Err(last_failure)
    }

    /// Run one command to completion under the configured timeout
    async fn run(&self, line: &[String]) -> Result<(), ServiceError> {
        let command = line.join(" ");
        let (program, args) = line.split_first().ok_or(ServiceError::ManagerUnavailable)?;
        debug!("Running `{}`", command);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout(), output)
            .await
            .map_err(|_| ServiceError::Timeout(command.clone()))??;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(command, output.status, &stderr))
    }

    /// Kill the tor process and start a new daemonized one
    async fn relaunch_process(&self) -> Result<(), ServiceError> {
        // pkill exits 1 when nothing matched, which is fine here
        let _ = Command::new("pkill")
            .args(["-x", "tor"])
            .status()
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let line = vec![
            "tor".to_string(),
            "--RunAsDaemon".to_string(),
            "1".to_string(),
        ];
        match self.run(&line).await {
            Err(ServiceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ServiceError::ManagerUnavailable)
            },
            other => other,
        }
    }

    /// Check if Tor is running
    pub async fn is_running(&self) -> bool {
        let result = Command::new("pgrep")
            .args(["-x", "tor"])
            .stdout(Stdio::null())
            .status()
            .await;

        matches!(result, Ok(status) if status.success())
    }
}

fn classify_failure(command: String, status: ExitStatus, stderr: &str) -> ServiceError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("access denied")
        || lowered.contains("permission denied")
        || lowered.contains("interactive authentication required")
        || lowered.contains("must be root")
    {
        return ServiceError::PermissionDenied(command);
    }

    let detail = stderr.trim();
    let status = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, detail)
    };
    ServiceError::CommandFailed { command, status }
}

impl ServiceRestart for ServiceManager {
    async fn restart(&self) -> Result<(), ServiceError> {
        ServiceManager::restart(self).await
    }
}
