use anyhow::{bail, Context};
use std::env;
use std::time::Duration;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_API_HOST: &str = "http://api.wunderground.com";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// MQTT broker location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

/// Weather provider access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_host: String,
    pub timeout: Duration,
}

/// Static process configuration, built once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub broker: BrokerConfig,
    pub provider: ProviderConfig,
    pub station: String,
    pub interval: Duration,
    pub debug: bool,
    pub verbose: bool,
}

impl Config {
    /// Reads the `MQWEATHER_*` environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("MQWEATHER_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            bail!("MQWEATHER_API_KEY must be set");
        }
        let station = lookup("MQWEATHER_STATION").unwrap_or_default();
        if station.trim().is_empty() {
            bail!("MQWEATHER_STATION must be set");
        }

        let port = match lookup("MQWEATHER_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("Invalid MQWEATHER_PORT `{raw}`"))?,
            None => DEFAULT_BROKER_PORT,
        };

        let interval = parse_positive_secs(&lookup, "MQWEATHER_INTERVAL", DEFAULT_INTERVAL_SECS)?;
        let timeout = parse_positive_secs(
            &lookup,
            "MQWEATHER_HTTP_TIMEOUT",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?;

        Ok(Self {
            broker: BrokerConfig {
                host: lookup("MQWEATHER_HOST")
                    .map(|host| host.trim().to_string())
                    .filter(|host| !host.is_empty())
                    .unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string()),
                port,
            },
            provider: ProviderConfig {
                api_key,
                api_host: lookup("MQWEATHER_API_HOST")
                    .filter(|host| !host.is_empty())
                    .map(|host| host.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
                timeout,
            },
            station,
            interval,
            debug: parse_bool_safe(lookup("MQWEATHER_DEBUG")),
            verbose: parse_bool_safe(lookup("MQWEATHER_VERBOSE")),
        })
    }

    /// Client id presented to the broker
    pub fn client_id(&self) -> String {
        format!("mqweather-{}", self.station)
    }
}

fn parse_positive_secs<F>(lookup: &F, name: &str, default: u64) -> anyhow::Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("Invalid {name} `{raw}`"))?,
        None => default,
    };
    if secs == 0 {
        bail!("{name} must be a positive number of seconds");
    }
    Ok(Duration::from_secs(secs))
}

/// Safely parses a boolean from an optional string, defaulting to false
fn parse_bool_safe(val: Option<String>) -> bool {
    val.unwrap_or_default()
        .to_ascii_lowercase()
        .parse()
        .unwrap_or_default()
}
