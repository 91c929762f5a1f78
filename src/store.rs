//! Persistence collaborator interface and an in-memory implementation.
//!
//! The core only ever talks to the [`Store`] trait; real deployments put a
//! database behind it. Sample retention (the bounded per-server history) is
//! this collaborator's policy, not the scheduler's.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{FanCurve, FanSpeedSample, Server, TemperatureSample};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_server(&self, id: Uuid) -> Result<Option<Server>>;
    async fn list_servers(&self) -> Result<Vec<Server>>;
    async fn upsert_server(&self, server: Server) -> Result<()>;
    /// Removes the server together with its curve and history. Callers must
    /// tear down any running loops first.
    async fn delete_server(&self, id: Uuid) -> Result<()>;

    async fn get_fan_curve(&self, server_id: Uuid) -> Result<Option<FanCurve>>;
    /// Full replace of the server's curve.
    async fn set_fan_curve(&self, server_id: Uuid, curve: FanCurve) -> Result<()>;

    async fn append_temperature(&self, server_id: Uuid, temperature: f64) -> Result<()>;
    async fn append_fan_speed(&self, server_id: Uuid, rpm: u32) -> Result<()>;

    /// Most recent temperature sample taken at or after `cutoff`, for the
    /// TTL cache bridge.
    async fn latest_temperature_since(
        &self,
        server_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<TemperatureSample>>;
    async fn latest_fan_speed_since(
        &self,
        server_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<FanSpeedSample>>;

    /// Most recent `limit` samples, newest first.
    async fn recent_temperatures(
        &self,
        server_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TemperatureSample>>;
    async fn recent_fan_speeds(
        &self,
        server_id: Uuid,
        limit: usize,
    ) -> Result<Vec<FanSpeedSample>>;
}

/// Oldest samples are evicted past this per-server cap (24h at the 30s
/// metrics interval).
const MAX_SAMPLES_PER_SERVER: usize = 2880;

#[derive(Default)]
struct MemoryState {
    servers: HashMap<Uuid, Server>,
    curves: HashMap<Uuid, FanCurve>,
    temperatures: HashMap<Uuid, Vec<TemperatureSample>>,
    fan_speeds: HashMap<Uuid, Vec<FanSpeedSample>>,
}

/// In-memory [`Store`] used by the daemon binary and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn evict<T>(samples: &mut Vec<T>) {
    while samples.len() > MAX_SAMPLES_PER_SERVER {
        samples.remove(0);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_server(&self, id: Uuid) -> Result<Option<Server>> {
        Ok(self.state.lock().await.servers.get(&id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        let state = self.state.lock().await;
        let mut servers: Vec<Server> = state.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    async fn upsert_server(&self, server: Server) -> Result<()> {
        self.state.lock().await.servers.insert(server.id, server);
        Ok(())
    }

    async fn delete_server(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.servers.remove(&id);
        state.curves.remove(&id);
        state.temperatures.remove(&id);
        state.fan_speeds.remove(&id);
        Ok(())
    }

    async fn get_fan_curve(&self, server_id: Uuid) -> Result<Option<FanCurve>> {
        Ok(self.state.lock().await.curves.get(&server_id).cloned())
    }

    async fn set_fan_curve(&self, server_id: Uuid, curve: FanCurve) -> Result<()> {
        self.state.lock().await.curves.insert(server_id, curve);
        Ok(())
    }

    async fn append_temperature(&self, server_id: Uuid, temperature: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        let samples = state.temperatures.entry(server_id).or_default();
        samples.push(TemperatureSample {
            temperature,
            timestamp: Utc::now(),
        });
        evict(samples);
        Ok(())
    }

    async fn append_fan_speed(&self, server_id: Uuid, rpm: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        let samples = state.fan_speeds.entry(server_id).or_default();
        samples.push(FanSpeedSample {
            rpm,
            timestamp: Utc::now(),
        });
        evict(samples);
        Ok(())
    }

    async fn latest_temperature_since(
        &self,
        server_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<TemperatureSample>> {
        let state = self.state.lock().await;
        Ok(state
            .temperatures
            .get(&server_id)
            .and_then(|samples| samples.iter().rev().find(|s| s.timestamp >= cutoff))
            .copied())
    }

    async fn latest_fan_speed_since(
        &self,
        server_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<FanSpeedSample>> {
        let state = self.state.lock().await;
        Ok(state
            .fan_speeds
            .get(&server_id)
            .and_then(|samples| samples.iter().rev().find(|s| s.timestamp >= cutoff))
            .copied())
    }

    async fn recent_temperatures(
        &self,
        server_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TemperatureSample>> {
        let state = self.state.lock().await;
        Ok(state
            .temperatures
            .get(&server_id)
            .map(|samples| samples.iter().rev().take(limit).copied().collect())
            .unwrap_or_default())
    }

    async fn recent_fan_speeds(
        &self,
        server_id: Uuid,
        limit: usize,
    ) -> Result<Vec<FanSpeedSample>> {
        let state = self.state.lock().await;
        Ok(state
            .fan_speeds
            .get(&server_id)
            .map(|samples| samples.iter().rev().take(limit).copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn latest_since_respects_cutoff() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        // Inject one stale and one fresh sample directly.
        {
            let mut state = store.state.lock().await;
            let samples = state.temperatures.entry(id).or_default();
            samples.push(TemperatureSample {
                temperature: 40.0,
                timestamp: Utc::now() - Duration::seconds(120),
            });
            samples.push(TemperatureSample {
                temperature: 45.0,
                timestamp: Utc::now() - Duration::seconds(5),
            });
        }

        let cutoff = Utc::now() - Duration::seconds(30);
        let sample = store.latest_temperature_since(id, cutoff).await.unwrap();
        assert_eq!(sample.map(|s| s.temperature), Some(45.0));

        // With everything older than the cutoff the lookup signals a miss.
        let cutoff = Utc::now() + Duration::seconds(1);
        assert!(store
            .latest_temperature_since(id, cutoff)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn retention_evicts_oldest_samples() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        for i in 0..(MAX_SAMPLES_PER_SERVER + 10) {
            store.append_temperature(id, i as f64).await.unwrap();
        }

        let state = store.state.lock().await;
        let samples = &state.temperatures[&id];
        assert_eq!(samples.len(), MAX_SAMPLES_PER_SERVER);
        assert_eq!(samples[0].temperature, 10.0);
    }

    #[tokio::test]
    async fn recent_samples_are_newest_first() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        for rpm in [1000u32, 2000, 3000] {
            store.append_fan_speed(id, rpm).await.unwrap();
        }

        let recent = store.recent_fan_speeds(id, 2).await.unwrap();
        assert_eq!(recent.iter().map(|s| s.rpm).collect::<Vec<_>>(), [3000, 2000]);
    }

    #[tokio::test]
    async fn delete_server_drops_history() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.append_temperature(id, 50.0).await.unwrap();
        store.delete_server(id).await.unwrap();
        assert!(store.recent_temperatures(id, 10).await.unwrap().is_empty());
    }
}
