//! Public IP lookup through the Tor SOCKS proxy

use crate::config::{IpCheckConfig, TorConfig};
use crate::error::ReporterError;
use crate::rotation::IpSource;
use crate::util::rand::isolation_token;
use serde_json::Value;
use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// One observation of the apparent public IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpObservation {
    pub address: IpAddr,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub fetched_at: SystemTime,
}

impl IpObservation {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            country_code: None,
            city: None,
            fetched_at: SystemTime::now(),
        }
    }

    /// "DE, Berlin" style location, if anything is known
    pub fn location(&self) -> Option<String> {
        match (&self.country_code, &self.city) {
            (Some(country), Some(city)) => Some(format!("{}, {}", country, city)),
            (Some(country), None) => Some(country.clone()),
            (None, Some(city)) => Some(city.clone()),
            (None, None) => None,
        }
    }
}

impl fmt::Display for IpObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(location) => write!(f, "{} ({})", self.address, location),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Parse an IP-echo response: plain text address or a JSON object
pub fn parse_response(body: &str) -> Result<IpObservation, ReporterError> {
    let body = body.trim();

    if body.starts_with('{') {
        let json: Value = serde_json::from_str(body)
            .map_err(|e| ReporterError::Parse(format!("invalid JSON: {}", e)))?;

        let address = ["ip", "query", "address"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_str))
            .ok_or_else(|| ReporterError::Parse("JSON response has no IP field".to_string()))?;

        let mut observation = IpObservation::new(parse_address(address)?);
        let (country_code, city) = parse_geo(&json);
        observation.country_code = country_code;
        observation.city = city;
        return Ok(observation);
    }

    Ok(IpObservation::new(parse_address(body)?))
}

fn parse_address(text: &str) -> Result<IpAddr, ReporterError> {
    text.trim()
        .parse()
        .map_err(|_| ReporterError::Parse(format!("not an IP address: {:?}", truncate(text, 64))))
}

/// Country code and city from a geolocation JSON object
fn parse_geo(json: &Value) -> (Option<String>, Option<String>) {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| json.get(*key).and_then(Value::as_str))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    (
        text(&["country_code", "countryCode", "country"]),
        text(&["city"]),
    )
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Queries an external IP-echo service
///
/// Every fetch gets its own HTTP client and, through Tor, its own SOCKS
/// credentials. Tor only moves new streams to fresh circuits after NEWNYM,
/// so a pooled connection would keep reporting the old exit.
pub struct IpReporter {
    config: IpCheckConfig,
    /// `host:port` of the Tor SOCKS port, `None` for direct lookups
    socks_addr: Option<String>,
}

impl IpReporter {
    /// Reporter whose requests leave through Tor
    pub fn new(config: IpCheckConfig, tor: &TorConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let socks_url = tor.socks_url();
        reqwest::Proxy::all(&socks_url).context("Failed to configure SOCKS proxy")?;

        debug!("IP reporter using {} via {}", config.url, socks_url);
        Ok(Self {
            config,
            socks_addr: Some(format!("{}:{}", tor.socks_host, tor.socks_port)),
        })
    }

    /// Reporter that bypasses Tor (shows the host's real address)
    pub fn direct(config: IpCheckConfig) -> anyhow::Result<Self> {
        Ok(Self {
            config,
            socks_addr: None,
        })
    }

    /// Fresh client without idle connections, isolated by SOCKS credentials
    fn client(&self) -> Result<reqwest::Client, ReporterError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(0);

        let builder = match &self.socks_addr {
            Some(addr) => {
                // Tor isolates streams by SOCKS username (IsolateSOCKSAuth)
                let url = format!("socks5h://{}:tornet@{}", isolation_token(), addr);
                let proxy = reqwest::Proxy::all(&url)
                    .map_err(|e| ReporterError::Network(format!("invalid SOCKS proxy: {}", e)))?;
                builder.proxy(proxy)
            },
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| ReporterError::Network(format!("cannot build HTTP client: {}", e)))
    }

    /// Current public IP, with location when available
    pub async fn fetch(&self) -> Result<IpObservation, ReporterError> {
        let client = self.client()?;
        let mut observation = self.fetch_echo(&client).await?;

        if observation.country_code.is_none() {
            if let Some(template) = self.config.geo_lookup_url() {
                let url = template.replace("{ip}", &observation.address.to_string());
                match get_text(&client, &url).await {
                    Ok(body) => match serde_json::from_str::<Value>(&body) {
                        Ok(json) => {
                            let (country_code, city) = parse_geo(&json);
                            observation.country_code = country_code;
                            observation.city = city;
                        },
                        Err(e) => debug!("Geolocation response not JSON: {}", e),
                    },
                    Err(e) => debug!("Geolocation lookup failed: {}", e),
                }
            }
        }

        Ok(observation)
    }

    /// Echo request with bounded retries on network errors
    async fn fetch_echo(&self, client: &reqwest::Client) -> Result<IpObservation, ReporterError> {
        let attempts = self.config.attempts.max(1);
        let mut last_error = ReporterError::Network("no attempt made".to_string());

        for attempt in 1..=attempts {
            match get_text(client, &self.config.url)
                .await
                .and_then(|body| parse_response(&body))
            {
                Ok(observation) => return Ok(observation),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("IP check attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                },
            }

            if attempt < attempts {
                let delay = Duration::from_secs(self.config.retry_delay_secs * attempt as u64);
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, ReporterError> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| ReporterError::Network(e.to_string()))?;

    response
        .text()
        .await
        .map_err(|e| ReporterError::Network(e.to_string()))
}

impl IpSource for IpReporter {
    async fn fetch(&self) -> Result<IpObservation, ReporterError> {
        IpReporter::fetch(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_response() {
        let observation = parse_response("185.220.101.4\n").unwrap();
        assert_eq!(observation.address, "185.220.101.4".parse::<IpAddr>().unwrap());
        assert!(observation.location().is_none());
        assert_eq!(observation.to_string(), "185.220.101.4");
    }

    #[test]
    fn test_json_response_with_geolocation() {
        let body = r#"{"ip":"2001:db8::1","country_code":"NL","city":"Amsterdam"}"#;
        let observation = parse_response(body).unwrap();
        assert!(observation.address.is_ipv6());
        assert_eq!(observation.location().as_deref(), Some("NL, Amsterdam"));
        assert_eq!(observation.to_string(), "2001:db8::1 (NL, Amsterdam)");
    }

    #[test]
    fn test_ip_api_style_fields() {
        let body = r#"{"status":"success","query":"5.6.7.8","countryCode":"DE","city":""}"#;
        let observation = parse_response(body).unwrap();
        assert_eq!(observation.country_code.as_deref(), Some("DE"));
        assert_eq!(observation.city, None);
    }

    #[test]
    fn test_malformed_responses_are_parse_errors() {
        assert!(matches!(
            parse_response("<html>blocked</html>"),
            Err(ReporterError::Parse(_))
        ));
        assert!(matches!(
            parse_response(r#"{"origin":"1.2.3.4"}"#),
            Err(ReporterError::Parse(_))
        ));
        assert!(matches!(parse_response("{not json"), Err(ReporterError::Parse(_))));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("äöü", 2), "äö");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
