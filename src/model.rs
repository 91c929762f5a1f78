//! Server, fan curve, and telemetry sample records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who drives the fans: the application (from a curve) or the operator (fixed speed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Auto,
    Manual,
}

/// BMC connection credentials. Opaque to the core; only the driver reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BmcCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    /// Model discriminator selecting the controller variant, e.g. "r730" or
    /// "r4900g3". Unknown values are rejected by the factory, never defaulted.
    pub model: String,
    pub bmc: BmcCredentials,
    pub control_mode: ControlMode,
    /// Fixed speed percentage; meaningful only in manual mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_fan_speed: Option<u8>,
}

/// One point on a temperature→speed curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Temperature in degrees Celsius.
    pub temp: f64,
    /// Fan speed percentage (0-100).
    pub speed: u8,
}

/// A server's fan curve. Replacing a curve is a full replace, not a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanCurve {
    pub points: Vec<CurvePoint>,
}

impl FanCurve {
    /// Points are sorted ascending by temperature on construction; the
    /// interpolation engine relies on that ordering.
    pub fn new(mut points: Vec<CurvePoint>) -> Self {
        points.sort_by(|a, b| {
            a.temp
                .partial_cmp(&b.temp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { points }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FanSpeedSample {
    /// Average RPM across the chassis fan sensors.
    pub rpm: u32,
    pub timestamp: DateTime<Utc>,
}
