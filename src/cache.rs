//! Time-boxed read-through telemetry cache.
//!
//! On-demand reads (API-style queries) go through here so bursts of requests
//! do not turn into bursts of BMC commands. The control and metrics loops
//! never use this path; they always read live.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::controller::ServerController;
use crate::store::Store;

/// Maximum age for a cached temperature reading.
pub const TEMPERATURE_TTL_SECS: i64 = 30;
/// Maximum age for a cached fan speed reading.
pub const FAN_SPEED_TTL_SECS: i64 = 60;

/// Answers "latest value no older than the TTL" from the persisted sample
/// store, else signals a miss.
pub struct SampleCache {
    store: Arc<dyn Store>,
}

impl SampleCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn temperature(&self, server_id: Uuid) -> Option<f64> {
        let cutoff = Utc::now() - Duration::seconds(TEMPERATURE_TTL_SECS);
        match self.store.latest_temperature_since(server_id, cutoff).await {
            Ok(sample) => sample.map(|s| s.temperature),
            Err(e) => {
                debug!("Temperature cache lookup failed for {}: {:#}", server_id, e);
                None
            }
        }
    }

    pub async fn fan_speed(&self, server_id: Uuid) -> Option<u32> {
        let cutoff = Utc::now() - Duration::seconds(FAN_SPEED_TTL_SECS);
        match self.store.latest_fan_speed_since(server_id, cutoff).await {
            Ok(sample) => sample.map(|s| s.rpm),
            Err(e) => {
                debug!("Fan speed cache lookup failed for {}: {:#}", server_id, e);
                None
            }
        }
    }
}

/// Cached-read path over one server's controller: a cache hit wins, a miss
/// falls back to a live read.
///
/// Cache fills are never persisted here; the metrics loop is the only sample
/// writer, so on-demand reads cannot race it with duplicate history rows.
pub struct CachedReader<'a> {
    cache: &'a SampleCache,
    controller: &'a dyn ServerController,
    server_id: Uuid,
}

impl<'a> CachedReader<'a> {
    pub fn new(
        cache: &'a SampleCache,
        controller: &'a dyn ServerController,
        server_id: Uuid,
    ) -> Self {
        Self {
            cache,
            controller,
            server_id,
        }
    }

    pub async fn temperature(&self) -> Option<f64> {
        if let Some(temperature) = self.cache.temperature(self.server_id).await {
            debug!("Temperature cache hit for {}", self.server_id);
            return Some(temperature);
        }
        self.controller.read_temperature().await
    }

    pub async fn fan_speed(&self) -> Option<u32> {
        if let Some(rpm) = self.cache.fan_speed(self.server_id).await {
            debug!("Fan speed cache hit for {}", self.server_id);
            return Some(rpm);
        }
        self.controller.read_fan_speed().await
    }
}
