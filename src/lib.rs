//! rackfan: curve-driven BMC fan control for rack servers.
//!
//! Core pieces: a per-server [task registry](scheduler::TaskRegistry) running
//! independent control and metrics loops, a [polymorphic hardware
//! controller](controller::ServerController) per server model on top of an
//! ipmitool-style [management driver](driver::ManagementDriver), a pure
//! [fan-curve engine](curve::target_speed), and a [TTL telemetry
//! cache](cache::SampleCache) for on-demand reads.

pub mod app;
pub mod cache;
pub mod config;
pub mod controller;
pub mod curve;
pub mod driver;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;

pub use error::Error;
pub use scheduler::TaskRegistry;
