//! Configuration loading and validation
//!
//! Handles TOML configuration parsing with strict validation.
//! No runtime mutation - configuration is immutable after load.

#![allow(unused_imports)] // Re-exports for public API

pub mod file;
mod validation;

pub use file::{load_config, load_from_path};
pub use validation::validate;

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rotation: RotationConfig,
    pub tor: TorConfig,
    pub ip_check: IpCheckConfig,
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
}

/// Rotation cadence and failure policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Seconds between the start of consecutive cycles
    pub interval_secs: u64,
    /// Number of cycles to run (0 = until cancelled)
    pub count: u64,
    /// Surface per-cycle error details
    pub verbose: bool,
    /// Consecutive failed cycles before the run is aborted
    pub max_consecutive_failures: u32,
    /// Wait after NEWNYM before verifying
    pub control_settle_secs: u64,
    /// Wait after a service restart before verifying
    pub fallback_settle_secs: u64,
    /// How long to poll for an established circuit after NEWNYM
    pub circuit_wait_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            count: 10,
            verbose: false,
            max_consecutive_failures: 5,
            control_settle_secs: 5,
            fallback_settle_secs: 30,
            circuit_wait_secs: 10,
            backoff_base_secs: 2,
            backoff_max_secs: 60,
        }
    }
}

impl RotationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn control_settle(&self) -> Duration {
        Duration::from_secs(self.control_settle_secs)
    }

    pub fn fallback_settle(&self) -> Duration {
        Duration::from_secs(self.fallback_settle_secs)
    }

    pub fn circuit_wait(&self) -> Duration {
        Duration::from_secs(self.circuit_wait_secs)
    }

    /// True when the run has no cycle bound
    pub fn is_unbounded(&self) -> bool {
        self.count == 0
    }
}

/// Tor daemon connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    pub control_host: String,
    pub control_port: u16,
    pub socks_host: String,
    pub socks_port: u16,
    pub control_password: Option<String>,
    /// Explicit cookie file; otherwise taken from PROTOCOLINFO or well-known paths
    pub cookie_path: Option<PathBuf>,
    /// Timeout for connect and for each control reply
    pub command_timeout_secs: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            control_host: "127.0.0.1".to_string(),
            control_port: 9051,
            socks_host: "127.0.0.1".to_string(),
            socks_port: 9050,
            control_password: None,
            cookie_path: None,
            command_timeout_secs: 10,
        }
    }
}

impl TorConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.control_host, self.control_port)
    }

    /// SOCKS proxy URL with remote DNS resolution
    pub fn socks_url(&self) -> String {
        format!("socks5h://{}:{}", self.socks_host, self.socks_port)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// External IP-echo service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpCheckConfig {
    pub url: String,
    /// Geolocation lookup, `{ip}` is replaced by the observed address.
    /// An empty string turns the lookup off.
    pub geo_url: Option<String>,
    pub attempts: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl IpCheckConfig {
    /// Geolocation URL template, unless disabled
    pub fn geo_lookup_url(&self) -> Option<&str> {
        self.geo_url.as_deref().filter(|url| !url.is_empty())
    }
}

impl Default for IpCheckConfig {
    fn default() -> Self {
        Self {
            url: "https://api.ipify.org?format=json".to_string(),
            geo_url: Some("https://ipapi.co/{ip}/json/".to_string()),
            attempts: 3,
            retry_delay_secs: 2,
            timeout_secs: 30,
        }
    }
}

/// OS service manager settings for the restart fallback
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service unit name
    pub name: String,
    /// Prefix service commands with sudo
    pub use_sudo: bool,
    /// Start Tor before the first cycle if it is not running
    pub autostart: bool,
    pub command_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "tor".to_string(),
            use_sudo: false,
            autostart: true,
            command_timeout_secs: 60,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also append logs to this file
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.rotation.interval_secs, 60);
        assert_eq!(config.rotation.count, 10);
        assert!(!config.rotation.verbose);
        assert_eq!(config.tor.control_port, 9051);
        assert_eq!(config.tor.socks_port, 9050);
        assert_eq!(config.service.name, "tor");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rotation]
            interval_secs = 15
            count = 0

            [tor]
            control_password = "hunter2"
            "#,
        )
        .unwrap();

        assert_eq!(config.rotation.interval(), Duration::from_secs(15));
        assert!(config.rotation.is_unbounded());
        assert_eq!(config.rotation.max_consecutive_failures, 5);
        assert_eq!(config.tor.control_password.as_deref(), Some("hunter2"));
        assert_eq!(config.tor.control_addr(), "127.0.0.1:9051");
        assert_eq!(config.tor.socks_url(), "socks5h://127.0.0.1:9050");
    }

    #[test]
    fn test_empty_geo_url_disables_lookup() {
        let config: Config = toml::from_str("[ip_check]\ngeo_url = \"\"").unwrap();
        assert_eq!(config.ip_check.geo_lookup_url(), None);

        let defaults = Config::default();
        assert_eq!(
            defaults.ip_check.geo_lookup_url(),
            Some("https://ipapi.co/{ip}/json/")
        );
    }
}
