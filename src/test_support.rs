//! Lookup doubles shared by unit tests.

use crate::model::GeoLocation;
use crate::traits::{GeoLookup, LookupError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn location_for(address: &str) -> GeoLocation {
    GeoLocation {
        ip: address.to_string(),
        country_code: "US".to_string(),
        country_name: "United States".to_string(),
        time_zone: "America/Chicago".to_string(),
        latitude: 37.751,
        longitude: -97.822,
    }
}

/// Resolves every address to the same location.
pub struct StaticLookup;

#[async_trait]
impl GeoLookup for StaticLookup {
    fn provider(&self) -> &str {
        "static"
    }

    async fn lookup(&self, address: &str) -> Result<GeoLocation, LookupError> {
        Ok(location_for(address))
    }
}

/// Always answers as a rate-limited service would.
pub struct FailingLookup;

#[async_trait]
impl GeoLookup for FailingLookup {
    fn provider(&self) -> &str {
        "failing"
    }

    async fn lookup(&self, _address: &str) -> Result<GeoLocation, LookupError> {
        Err(LookupError::Status(503))
    }
}

pub struct PanickingLookup;

#[async_trait]
impl GeoLookup for PanickingLookup {
    fn provider(&self) -> &str {
        "panicking"
    }

    async fn lookup(&self, _address: &str) -> Result<GeoLocation, LookupError> {
        panic!("geo service exploded")
    }
}

/// Succeeds after the given delay.
pub struct SlowLookup(pub Duration);

#[async_trait]
impl GeoLookup for SlowLookup {
    fn provider(&self) -> &str {
        "slow"
    }

    async fn lookup(&self, address: &str) -> Result<GeoLocation, LookupError> {
        tokio::time::sleep(self.0).await;
        Ok(location_for(address))
    }
}

/// Records the highest number of lookups running at once.
#[derive(Default)]
pub struct CountingLookup {
    pub delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingLookup {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoLookup for CountingLookup {
    fn provider(&self) -> &str {
        "counting"
    }

    async fn lookup(&self, address: &str) -> Result<GeoLocation, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(location_for(address))
    }
}
