//! H3C R4900 G3 controller: per-sensor temperature gets, per-fan speed writes.
//!
//! This BMC does not report fan RPM; speed control is write-only, and each of
//! the six fans needs its own raw command.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{run_logged, ServerController};
use crate::driver::ManagementDriver;
use crate::model::Server;

/// Fan ids 0..FAN_COUNT each take their own set-speed command.
const FAN_COUNT: u8 = 6;

pub struct R4900G3Controller {
    server: Server,
    driver: Arc<dyn ManagementDriver>,
}

impl R4900G3Controller {
    pub fn new(server: Server, driver: Arc<dyn ManagementDriver>) -> Self {
        Self { server, driver }
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        run_logged(self.driver.as_ref(), &self.server, args).await
    }

    /// Read one named sensor via `sensor get` and parse its "Sensor Reading" line.
    async fn sensor_temperature(&self, sensor: &str) -> Option<f64> {
        let output = self.run(&["sensor", "get", sensor]).await?;

        output
            .lines()
            .find(|line| line.contains("Sensor Reading"))
            .and_then(|line| line.split(':').nth(1))
            .and_then(|value| value.split_whitespace().next())
            .and_then(|value| value.parse().ok())
    }
}

#[async_trait]
impl ServerController for R4900G3Controller {
    /// Decision temperature: the maximum of the CPU1_Temp and CPU2_Temp
    /// sensors, each read individually.
    async fn read_temperature(&self) -> Option<f64> {
        let cpu1 = self.sensor_temperature("CPU1_Temp").await;
        let cpu2 = self.sensor_temperature("CPU2_Temp").await;

        let max = match (cpu1, cpu2) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(t), None) | (None, Some(t)) => Some(t),
            (None, None) => None,
        };

        if max.is_none() {
            warn!(
                "No valid CPU temperature reading for server {}",
                self.server.name
            );
        }
        max
    }

    /// Fan RPM is not readable on this model.
    async fn read_fan_speed(&self) -> Option<u32> {
        debug!(
            "Fan speed is write-only on R4900 G3, no reading for server {}",
            self.server.name
        );
        None
    }

    /// Issues one command per physical fan, sequentially. A failure on any
    /// fan is reported as a single logical failure once all fans were tried.
    async fn set_fan_speed(&self, percent: u8) {
        if percent > 100 {
            warn!(
                "Invalid fan speed {}% for server {}: must be 0-100",
                percent, self.server.name
            );
            return;
        }

        // Percentage scales onto the BMC's 0x00-0xff speed byte.
        let speed_byte = ((percent as f64 / 100.0) * 255.0) as u8;
        let speed_hex = format!("0x{:02x}", speed_byte);

        let mut failed = 0u8;
        for fan_id in 0..FAN_COUNT {
            let fan_hex = format!("0x{:02x}", fan_id);
            let args = [
                "raw",
                "0x36",
                "0x03",
                "0x20",
                "0x14",
                "0x00",
                "0x01",
                fan_hex.as_str(),
                "0x01",
                speed_hex.as_str(),
            ];
            if self.run(&args).await.is_none() {
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(
                "Failed to set speed on {}/{} fans for server {}",
                failed, FAN_COUNT, self.server.name
            );
        } else {
            info!(
                "Set all {} fans to {}% ({}) for server {}",
                FAN_COUNT, percent, speed_hex, self.server.name
            );
        }
    }

    /// No BMC-side mode switch is needed: the system fan profile tolerates
    /// direct per-fan overrides.
    async fn take_over_control(&self) {
        debug!(
            "No take-over command needed for server {} (R4900 G3)",
            self.server.name
        );
    }

    async fn return_control_to_system(&self) {
        debug!(
            "No return-control command needed for server {} (R4900 G3)",
            self.server.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BmcCredentials, ControlMode};
    use anyhow::bail;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Maps the requested sensor name to a canned `sensor get` output; records
    /// every command.
    struct SensorDriver {
        cpu1: Option<f64>,
        cpu2: Option<f64>,
        commands: Mutex<Vec<Vec<String>>>,
    }

    impl SensorDriver {
        fn new(cpu1: Option<f64>, cpu2: Option<f64>) -> Self {
            Self {
                cpu1,
                cpu2,
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ManagementDriver for SensorDriver {
        async fn execute(
            &self,
            _bmc: &BmcCredentials,
            args: &[&str],
        ) -> anyhow::Result<String> {
            self.commands
                .lock()
                .unwrap()
                .push(args.iter().map(|a| a.to_string()).collect());

            let reading = match args {
                ["sensor", "get", "CPU1_Temp"] => self.cpu1,
                ["sensor", "get", "CPU2_Temp"] => self.cpu2,
                _ => return Ok(String::new()),
            };
            match reading {
                Some(t) => Ok(format!(
                    "Sensor ID              : {}\nSensor Reading        : {} (+/- 0) degrees C",
                    args[2], t
                )),
                None => bail!("sensor not present"),
            }
        }
    }

    fn server() -> Server {
        Server {
            id: Uuid::new_v4(),
            name: "r4900-01".to_string(),
            model: "r4900g3".to_string(),
            bmc: BmcCredentials {
                host: "10.0.0.20".to_string(),
                username: "admin".to_string(),
                password: "admin".to_string(),
            },
            control_mode: ControlMode::Auto,
            manual_fan_speed: None,
        }
    }

    #[tokio::test]
    async fn temperature_is_max_of_both_sockets() {
        let driver = Arc::new(SensorDriver::new(Some(48.0), Some(55.0)));
        let controller = R4900G3Controller::new(server(), driver);
        assert_eq!(controller.read_temperature().await, Some(55.0));
    }

    #[tokio::test]
    async fn one_dead_socket_still_yields_a_temperature() {
        let driver = Arc::new(SensorDriver::new(None, Some(47.0)));
        let controller = R4900G3Controller::new(server(), driver);
        assert_eq!(controller.read_temperature().await, Some(47.0));
    }

    #[tokio::test]
    async fn both_sockets_dead_is_unavailable() {
        let driver = Arc::new(SensorDriver::new(None, None));
        let controller = R4900G3Controller::new(server(), driver);
        assert_eq!(controller.read_temperature().await, None);
    }

    #[tokio::test]
    async fn fan_speed_is_never_readable() {
        let driver = Arc::new(SensorDriver::new(Some(40.0), Some(40.0)));
        let controller = R4900G3Controller::new(server(), driver);
        assert_eq!(controller.read_fan_speed().await, None);
    }

    #[tokio::test]
    async fn set_fan_speed_issues_one_command_per_fan() {
        let driver = Arc::new(SensorDriver::new(None, None));
        let controller =
            R4900G3Controller::new(server(), Arc::clone(&driver) as Arc<dyn ManagementDriver>);
        controller.set_fan_speed(50).await;

        let commands = driver.commands.lock().unwrap();
        assert_eq!(commands.len(), FAN_COUNT as usize);
        // 50% of 255 truncates to 127 = 0x7f.
        for (fan_id, command) in commands.iter().enumerate() {
            assert_eq!(command[0], "raw");
            assert_eq!(command[7], format!("0x{:02x}", fan_id));
            assert_eq!(command[9], "0x7f");
        }
    }
}
