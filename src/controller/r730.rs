//! Dell R730 controller: whole-table sensor reads, broadcast fan commands.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{run_logged, ServerController};
use crate::driver::ManagementDriver;
use crate::model::Server;

pub struct R730Controller {
    server: Server,
    driver: Arc<dyn ManagementDriver>,
}

impl R730Controller {
    pub fn new(server: Server, driver: Arc<dyn ManagementDriver>) -> Self {
        Self { server, driver }
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        run_logged(self.driver.as_ref(), &self.server, args).await
    }
}

#[async_trait]
impl ServerController for R730Controller {
    /// Decision temperature: the maximum across the per-socket "Temp" rows of
    /// the sensor table. Inlet/Exhaust chassis sensors are excluded; on a
    /// dual-socket R730 the hottest CPU drives the fans.
    async fn read_temperature(&self) -> Option<f64> {
        let table = self.run(&["sensor"]).await?;

        let max = table
            .lines()
            .filter(|line| {
                line.contains("Temp")
                    && line.contains("degrees C")
                    && !line.contains("Inlet Temp")
                    && !line.contains("Exhaust Temp")
            })
            .filter_map(|line| line.split('|').nth(1)?.trim().parse::<f64>().ok())
            .fold(None, |acc: Option<f64>, t| {
                Some(acc.map_or(t, |m| m.max(t)))
            });

        if max.is_none() {
            warn!(
                "No valid CPU temperature rows for server {}",
                self.server.name
            );
        }
        max
    }

    /// Average RPM across the chassis "Fan" rows of the sensor table.
    async fn read_fan_speed(&self) -> Option<u32> {
        let table = self.run(&["sensor"]).await?;

        let rpms: Vec<f64> = table
            .lines()
            .filter(|line| line.contains("Fan") && line.contains("RPM"))
            .filter_map(|line| line.split('|').nth(1)?.trim().parse::<f64>().ok())
            .collect();

        if rpms.is_empty() {
            debug!("No fan RPM rows for server {}", self.server.name);
            return None;
        }
        Some((rpms.iter().sum::<f64>() / rpms.len() as f64) as u32)
    }

    async fn set_fan_speed(&self, percent: u8) {
        if percent > 100 {
            warn!(
                "Invalid fan speed {}% for server {}: must be 0-100",
                percent, self.server.name
            );
            return;
        }

        let hex = format!("0x{:02x}", percent);
        if self
            .run(&["raw", "0x30", "0x30", "0x02", "0xff", hex.as_str()])
            .await
            .is_some()
        {
            info!(
                "Set fan speed to {}% for server {}",
                percent, self.server.name
            );
        }
    }

    async fn take_over_control(&self) {
        if self
            .run(&["raw", "0x30", "0x30", "0x01", "0x00"])
            .await
            .is_some()
        {
            info!("Fan control set to MANUAL for server {}", self.server.name);
        }
    }

    async fn return_control_to_system(&self) {
        if self
            .run(&["raw", "0x30", "0x30", "0x01", "0x01"])
            .await
            .is_some()
        {
            info!("Fan control returned to BMC for server {}", self.server.name);
        }
    }
}
