//! HTTP client for a FreeGeoIP-compatible lookup service.

use crate::model::GeoLocation;
use crate::traits::{GeoLookup, LookupError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Response body of `GET /json/{ip}`.
#[derive(Debug, Deserialize)]
struct GeoIpPayload {
    ip: String,
    country_code: String,
    country_name: String,
    time_zone: String,
    latitude: f64,
    longitude: f64,
}

impl From<GeoIpPayload> for GeoLocation {
    fn from(payload: GeoIpPayload) -> Self {
        Self {
            ip: payload.ip,
            country_code: payload.country_code,
            country_name: payload.country_name,
            time_zone: payload.time_zone,
            latitude: payload.latitude,
            longitude: payload.longitude,
        }
    }
}

pub struct FreeGeoIpClient {
    client: reqwest::Client,
    base_url: String,
}

impl FreeGeoIpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("geo-batch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn endpoint(&self, address: &str) -> String {
        format!("{}/json/{}", self.base_url.trim_end_matches('/'), address)
    }
}

/// Decodes a lookup body, rejecting anything that is not a full location.
fn parse_payload(body: &[u8]) -> Result<GeoLocation, LookupError> {
    serde_json::from_slice::<GeoIpPayload>(body)
        .map(GeoLocation::from)
        .map_err(|e| LookupError::Malformed(e.to_string()))
}

#[async_trait]
impl GeoLookup for FreeGeoIpClient {
    fn provider(&self) -> &str {
        "freegeoip"
    }

    async fn lookup(&self, address: &str) -> Result<GeoLocation, LookupError> {
        let url = self.endpoint(address);
        debug!(%url, "Requesting geolocation");

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        parse_payload(&body)
    }
}
