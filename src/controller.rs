//! Per-model hardware controllers: semantic fan/thermal operations on top of
//! the raw management driver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::driver::ManagementDriver;
use crate::error::Error;
use crate::model::Server;

pub mod r4900g3;
pub mod r730;

pub use r4900g3::R4900G3Controller;
pub use r730::R730Controller;

/// Semantic operations one server model exposes.
///
/// Every operation is individually fallible and absorbs its own failures:
/// reads resolve to `None`, writes to a logged no-op. One unreadable sensor
/// must never take down a loop or another server.
#[async_trait]
pub trait ServerController: Send + Sync {
    /// A single representative decision temperature. Each variant documents
    /// its aggregation rule (typically max across CPU sockets).
    async fn read_temperature(&self) -> Option<f64>;

    /// Average RPM across the fan sensors, or `None` on models where fan
    /// speed is write-only.
    async fn read_fan_speed(&self) -> Option<u32>;

    /// Apply a target speed percentage (0-100). Out of range is a logged no-op.
    async fn set_fan_speed(&self, percent: u8);

    /// Put the BMC into a state where [`set_fan_speed`](Self::set_fan_speed)
    /// has effect.
    async fn take_over_control(&self);

    /// Give fan authority back to the BMC. Best-effort: invoked on every
    /// control-loop exit, failures are logged and never fatal.
    async fn return_control_to_system(&self);
}

/// Select the controller variant for a server's model discriminator.
pub fn controller_for(
    server: &Server,
    driver: Arc<dyn ManagementDriver>,
) -> Result<Box<dyn ServerController>, Error> {
    match server.model.to_lowercase().as_str() {
        "r730" => Ok(Box::new(R730Controller::new(server.clone(), driver))),
        "r4900g3" => Ok(Box::new(R4900G3Controller::new(server.clone(), driver))),
        _ => Err(Error::UnsupportedModel(server.model.clone())),
    }
}

/// Run one driver command, converting any failure into the `None` sentinel
/// plus a log record.
pub(crate) async fn run_logged(
    driver: &dyn ManagementDriver,
    server: &Server,
    args: &[&str],
) -> Option<String> {
    match driver.execute(&server.bmc, args).await {
        Ok(output) => Some(output),
        Err(e) => {
            warn!("IPMI command failed for server {}: {:#}", server.name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BmcCredentials, ControlMode};
    use anyhow::bail;
    use uuid::Uuid;

    struct DeadDriver;

    #[async_trait]
    impl ManagementDriver for DeadDriver {
        async fn execute(&self, _bmc: &BmcCredentials, _args: &[&str]) -> anyhow::Result<String> {
            bail!("bmc unreachable")
        }
    }

    fn server(model: &str) -> Server {
        Server {
            id: Uuid::new_v4(),
            name: "rack-01".to_string(),
            model: model.to_string(),
            bmc: BmcCredentials {
                host: "10.0.0.10".to_string(),
                username: "admin".to_string(),
                password: "secret".to_string(),
            },
            control_mode: ControlMode::Auto,
            manual_fan_speed: None,
        }
    }

    #[test]
    fn factory_selects_known_models() {
        let driver: Arc<dyn ManagementDriver> = Arc::new(DeadDriver);
        assert!(controller_for(&server("r730"), Arc::clone(&driver)).is_ok());
        assert!(controller_for(&server("R730"), Arc::clone(&driver)).is_ok());
        assert!(controller_for(&server("r4900g3"), driver).is_ok());
    }

    #[test]
    fn factory_rejects_unknown_models() {
        let driver: Arc<dyn ManagementDriver> = Arc::new(DeadDriver);
        let err = controller_for(&server("r999"), driver).err().unwrap();
        assert!(matches!(err, Error::UnsupportedModel(m) if m == "r999"));
    }

    #[tokio::test]
    async fn driver_failure_resolves_to_sentinel() {
        let driver: Arc<dyn ManagementDriver> = Arc::new(DeadDriver);
        let controller = controller_for(&server("r730"), driver).unwrap();
        assert_eq!(controller.read_temperature().await, None);
        assert_eq!(controller.read_fan_speed().await, None);
        // Writes must not panic either; failures are logged no-ops.
        controller.set_fan_speed(50).await;
        controller.take_over_control().await;
        controller.return_control_to_system().await;
    }
}
