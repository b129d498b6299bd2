//! Weather Underground current-conditions client.

use crate::config::ProviderConfig;
use crate::reading::Reading;
use async_trait::async_trait;
use serde_derive::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

/// Reasons a reading could not be obtained
#[derive(Debug, Error)]
pub enum FetchError {
    /// A request parameter was empty
    #[error("{0} must not be empty")]
    MissingParameter(&'static str),

    /// The provider could not be reached or answered with a non-success status
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] reqwest::Error),

    /// The provider answered with something other than the expected JSON
    #[error("Parse failure: {0}")]
    ParseFailure(#[from] serde_json::Error),

    /// The provider answered well-formed JSON carrying an error
    #[error("Provider rejected request ({kind}): {description}")]
    ProviderRejected { kind: String, description: String },
}

impl FetchError {
    /// True for conditions that recur every cycle until configuration changes
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            FetchError::MissingParameter(_) | FetchError::ProviderRejected { .. }
        )
    }
}

/// Source of current-conditions readings
#[async_trait]
pub trait ReadingFetcher: Send + Sync {
    async fn fetch(&self, station: &str) -> Result<Reading, FetchError>;
}

#[async_trait]
impl<T: ReadingFetcher + ?Sized> ReadingFetcher for Arc<T> {
    async fn fetch(&self, station: &str) -> Result<Reading, FetchError> {
        (**self).fetch(station).await
    }
}

#[derive(Debug, Deserialize)]
struct ConditionsResponse {
    #[serde(default)]
    response: ResponseMeta,
    current_observation: Option<CurrentObservation>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMeta {
    error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct CurrentObservation {
    temp_c: f64,
    dewpoint_c: f64,
    wind_kph: f64,
    pressure_mb: String,
    relative_humidity: String,
}

impl From<CurrentObservation> for Reading {
    fn from(obs: CurrentObservation) -> Self {
        Reading {
            temperature_c: obs.temp_c,
            dewpoint_c: obs.dewpoint_c,
            wind_speed_kph: obs.wind_kph,
            pressure_mb: obs.pressure_mb,
            relative_humidity: obs.relative_humidity,
        }
    }
}

pub struct WundergroundClient {
    api_host: String,
    api_key: String,
    client: reqwest::Client,
}

impl WundergroundClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, FetchError> {
        if config.api_key.is_empty() {
            return Err(FetchError::MissingParameter("API key"));
        }
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_host: config.api_host.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn conditions_url(&self, station: &str) -> String {
        format!(
            "{}/api/{}/conditions/q/{}.json",
            self.api_host, self.api_key, station
        )
    }
}

#[async_trait]
impl ReadingFetcher for WundergroundClient {
    #[instrument(skip(self))]
    async fn fetch(&self, station: &str) -> Result<Reading, FetchError> {
        if station.is_empty() {
            return Err(FetchError::MissingParameter("station"));
        }

        let body = self
            .client
            .get(self.conditions_url(station))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(bytes = body.len(), "received conditions response");

        parse_conditions(&body)
    }
}

fn parse_conditions(body: &str) -> Result<Reading, FetchError> {
    let conditions: ConditionsResponse = serde_json::from_str(body)?;

    if let Some(err) = conditions.response.error {
        return Err(FetchError::ProviderRejected {
            kind: err.kind,
            description: err.description,
        });
    }

    conditions
        .current_observation
        .map(Reading::from)
        .ok_or_else(|| FetchError::ProviderRejected {
            kind: "no_observation".to_string(),
            description: "response carried no current observation".to_string(),
        })
}
