//! Reverse geocoding collaborators

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Default Google Maps API origin
pub const DEFAULT_GEOCODER_BASE_URL: &str = "https://maps.googleapis.com";

/// One reverse geocoding result
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeocodeCandidate {
    pub postal_code: Option<String>,
    pub formatted_address: Option<String>,
}

/// Coordinates to candidate addresses
///
/// An empty list means the point did not resolve. Only the first candidate
/// is used by the enricher.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn lookup(&self, latitude: f64, longitude: f64) -> PipelineResult<Vec<GeocodeCandidate>>;
}

/// Google Geocoding API client
pub struct GoogleGeocoder {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GoogleGeocoder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

/// Drop the request URL, which carries the API key and the coordinates
fn redact(err: reqwest::Error) -> PipelineError {
    PipelineError::Http(err.without_url())
}

#[async_trait]
impl ReverseGeocoder for GoogleGeocoder {
    async fn lookup(&self, latitude: f64, longitude: f64) -> PipelineResult<Vec<GeocodeCandidate>> {
        let url = format!("{}/maps/api/geocode/json", self.base_url);
        let response: GeocodeResponse = self
            .client
            .get(&url)
            .query(&[
                ("latlng", format!("{},{}", latitude, longitude)),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(redact)?
            .json()
            .await
            .map_err(redact)?;

        match response.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(Vec::new()),
            other => {
                return Err(PipelineError::Geocoder(format!(
                    "status {}{}",
                    other,
                    response
                        .error_message
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                )))
            }
        }

        debug!(candidates = response.results.len(), "reverse geocode resolved");

        Ok(response
            .results
            .into_iter()
            .map(|result| GeocodeCandidate {
                postal_code: result
                    .address_components
                    .into_iter()
                    .find(|c| c.types.iter().any(|t| t == "postal_code"))
                    .map(|c| c.long_name),
                formatted_address: result.formatted_address,
            })
            .collect())
    }
}
