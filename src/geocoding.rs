use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geo::LatLng;

const USER_AGENT: &str = concat!("placefeed/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Best match for a free-text address, or `None` on any failure.
    async fn geocode(&self, address: &str) -> Option<LatLng>;
}

#[derive(Clone)]
pub struct GeocodingService {
    inner: Arc<dyn Geocoder>,
}

impl GeocodingService {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client =
            NominatimClient::new(&config.geocoder_endpoint, config.geocoder_api_key.clone())?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    pub fn from_geocoder(geocoder: Arc<dyn Geocoder>) -> Self {
        Self { inner: geocoder }
    }

    pub async fn geocode(&self, address: &str) -> Option<LatLng> {
        self.inner.geocode(address).await
    }
}

/// Client for Nominatim-compatible `/search` endpoints.
pub struct NominatimClient {
    http: Client,
    endpoint: Url,
    api_key: Option<SecretString>,
}

impl NominatimClient {
    pub fn new(endpoint: &str, api_key: Option<SecretString>) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint).map_err(|err| {
            AppError::Config(format!("invalid geocoder endpoint {endpoint}: {err}"))
        })?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    async fn search(&self, address: &str) -> AppResult<Option<LatLng>> {
        let mut request = self.http.get(self.endpoint.clone()).query(&[
            ("format", "json"),
            ("q", address),
            ("addressdetails", "0"),
            ("limit", "1"),
        ]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.expose_secret())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!(target: "geocoder", %status, address, "geocoder rejected request");
            return Ok(None);
        }

        let body = response.text().await?;
        let parsed = match serde_json::from_str::<Value>(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(
                    target: "geocoder",
                    error = %err,
                    address,
                    "geocoder returned non-JSON body"
                );
                return Ok(None);
            }
        };

        let point = first_match(&parsed);
        if point.is_none() {
            debug!(target: "geocoder", address, "geocoder returned no usable match");
        }
        Ok(point)
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn geocode(&self, address: &str) -> Option<LatLng> {
        if address.trim().is_empty() {
            return None;
        }
        trace!(target: "geocoder", address, "geocoding address");
        match self.search(address).await {
            Ok(point) => point,
            Err(err) => {
                warn!(target: "geocoder", error = %err, address, "geocoding request failed");
                None
            }
        }
    }
}

fn first_match(body: &Value) -> Option<LatLng> {
    let first = body.as_array()?.first()?;
    let lat = coordinate_value(first.get("lat")?)?;
    let lng = coordinate_value(first.get("lon")?)?;
    Some(LatLng::new(lat, lng))
}

fn coordinate_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}
