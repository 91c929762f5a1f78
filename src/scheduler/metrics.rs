//! Metrics loop: periodically samples one server's telemetry into the store.
//!
//! Reads are always live (the cache path is for on-demand queries only) and
//! each metric is persisted independently: an unreadable fan speed must not
//! cost the cycle its temperature sample. The loop only ever terminates by
//! explicit cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{METRICS_ERROR_BACKOFF, METRICS_INTERVAL};
use crate::controller::ServerController;
use crate::model::Server;
use crate::store::Store;

/// One sampling pass: read both metrics live, persist whichever are available.
pub(crate) async fn record_once(
    server: &Server,
    controller: &dyn ServerController,
    store: &dyn Store,
) -> anyhow::Result<()> {
    let temperature = controller.read_temperature().await;
    let fan_speed = controller.read_fan_speed().await;

    if let Some(temperature) = temperature {
        store.append_temperature(server.id, temperature).await?;
    }
    if let Some(rpm) = fan_speed {
        store.append_fan_speed(server.id, rpm).await?;
    }

    debug!(
        "Recorded metrics for {}: temperature={:?} fan_rpm={:?}",
        server.name, temperature, fan_speed
    );
    Ok(())
}

pub(crate) async fn run(
    server: Server,
    controller: Box<dyn ServerController>,
    store: Arc<dyn Store>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        "Starting metrics loop for server {} ({})",
        server.name, server.id
    );

    loop {
        let delay = tokio::select! {
            result = record_once(&server, controller.as_ref(), store.as_ref()) => {
                match result {
                    Ok(()) => METRICS_INTERVAL,
                    Err(e) => {
                        error!("Metrics loop error for server {}: {:#}", server.name, e);
                        METRICS_ERROR_BACKOFF
                    }
                }
            }
            _ = shutdown.changed() => break,
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("Metrics loop for server {} stopped", server.name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BmcCredentials, ControlMode};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct HalfBlindController;

    #[async_trait]
    impl ServerController for HalfBlindController {
        async fn read_temperature(&self) -> Option<f64> {
            Some(58.0)
        }
        async fn read_fan_speed(&self) -> Option<u32> {
            None
        }
        async fn set_fan_speed(&self, _percent: u8) {}
        async fn take_over_control(&self) {}
        async fn return_control_to_system(&self) {}
    }

    fn server() -> Server {
        Server {
            id: Uuid::new_v4(),
            name: "rack-07".to_string(),
            model: "r4900g3".to_string(),
            bmc: BmcCredentials {
                host: "10.0.0.30".to_string(),
                username: "admin".to_string(),
                password: "admin".to_string(),
            },
            control_mode: ControlMode::Manual,
            manual_fan_speed: Some(35),
        }
    }

    #[tokio::test]
    async fn unavailable_metric_skips_only_its_own_sample() {
        let store = MemoryStore::new();
        let server = server();

        record_once(&server, &HalfBlindController, &store)
            .await
            .unwrap();

        let temps = store.recent_temperatures(server.id, 10).await.unwrap();
        let fans = store.recent_fan_speeds(server.id, 10).await.unwrap();
        assert_eq!(temps.len(), 1);
        assert_eq!(temps[0].temperature, 58.0);
        assert!(fans.is_empty());
    }
}
