//! Configuration validation
//!
//! Fail-fast validation of configuration invariants.

use super::Config;
use anyhow::{bail, Result};

/// Validate configuration invariants
pub fn validate(config: &Config) -> Result<()> {
    validate_rotation(config)?;
    validate_tor(config)?;
    validate_ip_check(config)?;
    validate_service(config)?;
    Ok(())
}

fn validate_rotation(config: &Config) -> Result<()> {
    let rotation = &config.rotation;
    if rotation.interval_secs == 0 {
        bail!("rotation.interval_secs must be at least 1");
    }
    if rotation.max_consecutive_failures == 0 {
        bail!("rotation.max_consecutive_failures must be at least 1");
    }
    if rotation.backoff_base_secs > rotation.backoff_max_secs {
        bail!(
            "rotation.backoff_base_secs ({}) must not exceed backoff_max_secs ({})",
            rotation.backoff_base_secs,
            rotation.backoff_max_secs
        );
    }
    Ok(())
}

fn validate_tor(config: &Config) -> Result<()> {
    if config.tor.control_port == 0 {
        bail!("tor.control_port cannot be 0");
    }
    if config.tor.socks_port == 0 {
        bail!("tor.socks_port cannot be 0");
    }
    if config.tor.control_host.is_empty() || config.tor.socks_host.is_empty() {
        bail!("tor.control_host and tor.socks_host cannot be empty");
    }
    if config.tor.command_timeout_secs == 0 {
        bail!("tor.command_timeout_secs must be at least 1");
    }
    Ok(())
}

fn validate_ip_check(config: &Config) -> Result<()> {
    let ip_check = &config.ip_check;
    if !is_http_url(&ip_check.url) {
        bail!("ip_check.url must be an http(s) URL: {}", ip_check.url);
    }
    if let Some(geo_url) = ip_check.geo_lookup_url() {
        if !is_http_url(geo_url) {
            bail!("ip_check.geo_url must be an http(s) URL: {}", geo_url);
        }
        if !geo_url.contains("{ip}") {
            bail!("ip_check.geo_url must contain an {{ip}} placeholder");
        }
    }
    if ip_check.attempts == 0 {
        bail!("ip_check.attempts must be at least 1");
    }
    if ip_check.timeout_secs == 0 {
        bail!("ip_check.timeout_secs must be at least 1");
    }
    Ok(())
}

fn validate_service(config: &Config) -> Result<()> {
    if config.service.name.is_empty() {
        bail!("service.name cannot be empty");
    }
    if config.service.name.contains(char::is_whitespace) {
        bail!("service.name cannot contain whitespace");
    }
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.rotation.interval_secs = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_zero_count_is_allowed() {
        let mut config = Config::default();
        config.rotation.count = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_backoff_bounds() {
        let mut config = Config::default();
        config.rotation.backoff_base_secs = 120;
        config.rotation.backoff_max_secs = 60;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_geo_url_needs_placeholder() {
        let mut config = Config::default();
        config.ip_check.geo_url = Some("https://ipapi.co/json/".to_string());
        assert!(validate(&config).is_err());

        config.ip_check.geo_url = None;
        assert!(validate(&config).is_ok());

        config.ip_check.geo_url = Some(String::new());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut config = Config::default();
        config.ip_check.url = "ftp://example.com".to_string();
        assert!(validate(&config).is_err());
    }
}
