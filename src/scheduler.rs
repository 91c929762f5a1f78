//! Per-server task registry: owns the control and metrics loops.
//!
//! Every managed server gets two independent, cancellable tasks. The
//! registry's start/stop idempotency is the sole serialization preventing two
//! control loops from driving one server's fans: `start_*` always cancels and
//! awaits any existing loop of that kind before spawning a new one, and
//! `stop_*` returns only after the loop's teardown (including the control
//! loop's return of fan authority) has completed.

mod control;
mod metrics;

pub use control::{ControlLoop, ControlState, Tick};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::controller::controller_for;
use crate::driver::ManagementDriver;
use crate::error::Error;
use crate::model::{ControlMode, Server};
use crate::store::Store;

/// Interval between control decisions.
pub const CONTROL_INTERVAL: Duration = Duration::from_secs(10);
/// Retry delay when the decision temperature is unreadable.
pub const NO_TEMPERATURE_BACKOFF: Duration = Duration::from_secs(10);
/// Retry delay when no usable curve is configured.
pub const NO_CURVE_BACKOFF: Duration = Duration::from_secs(30);
/// Delay after an unexpected control-loop error.
pub const CONTROL_ERROR_BACKOFF: Duration = Duration::from_secs(30);
/// Interval between telemetry samples.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(30);
/// Delay after an unexpected metrics-loop error.
pub const METRICS_ERROR_BACKOFF: Duration = Duration::from_secs(60);

pub(crate) struct LoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub(crate) type HandleMap = Arc<Mutex<HashMap<Uuid, LoopHandle>>>;

pub struct TaskRegistry {
    store: Arc<dyn Store>,
    driver: Arc<dyn ManagementDriver>,
    control: HandleMap,
    metrics: HandleMap,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn Store>, driver: Arc<dyn ManagementDriver>) -> Self {
        Self {
            store,
            driver,
            control: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start (or restart) the metrics loop for a server.
    pub async fn start_metrics_loop(&self, server: &Server) -> Result<(), Error> {
        // The map lock is held across the whole stop-then-start so concurrent
        // calls for the same server cannot interleave.
        let mut handles = self.metrics.lock().await;
        if let Some(old) = handles.remove(&server.id) {
            stop_handle(old, "metrics", server.id).await;
        }

        let controller = controller_for(server, Arc::clone(&self.driver))?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(metrics::run(
            server.clone(),
            controller,
            Arc::clone(&self.store),
            shutdown_rx,
        ));
        handles.insert(server.id, LoopHandle { shutdown, task });

        info!(
            "Started metrics loop for server {} ({})",
            server.name, server.id
        );
        Ok(())
    }

    /// Cancel the metrics loop and wait for it to terminate. Stopping a loop
    /// that is not running is a no-op.
    pub async fn stop_metrics_loop(&self, id: Uuid) {
        let mut handles = self.metrics.lock().await;
        match handles.remove(&id) {
            Some(handle) => stop_handle(handle, "metrics", id).await,
            None => debug!("No metrics loop running for server {}", id),
        }
    }

    /// Start (or restart) the control loop for a server. Returns without
    /// spawning when the server is not in auto mode, so callers can invoke it
    /// unconditionally after a configuration change.
    pub async fn start_control_loop(&self, server: &Server) -> Result<(), Error> {
        let mut handles = self.control.lock().await;
        if let Some(old) = handles.remove(&server.id) {
            stop_handle(old, "control", server.id).await;
        }

        if server.control_mode != ControlMode::Auto {
            debug!(
                "Server {} is not in auto mode, control loop not started",
                server.name
            );
            return Ok(());
        }

        let controller = controller_for(server, Arc::clone(&self.driver))?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(control::run(
            server.clone(),
            controller,
            Arc::clone(&self.store),
            shutdown_rx,
            Arc::clone(&self.control),
        ));
        handles.insert(server.id, LoopHandle { shutdown, task });

        info!(
            "Started control loop for server {} ({})",
            server.name, server.id
        );
        Ok(())
    }

    /// Cancel the control loop and wait for it to drain (fan authority handed
    /// back to the BMC) before returning.
    pub async fn stop_control_loop(&self, id: Uuid) {
        let mut handles = self.control.lock().await;
        match handles.remove(&id) {
            Some(handle) => stop_handle(handle, "control", id).await,
            None => debug!("No control loop running for server {}", id),
        }
    }

    /// Start loops for every stored server: metrics always, control when the
    /// server is in auto mode. Per-server failures (unsupported models) are
    /// logged and skipped so one bad record cannot block the rest of the
    /// fleet.
    pub async fn start_all(&self) {
        let servers = match self.store.list_servers().await {
            Ok(servers) => servers,
            Err(e) => {
                error!("Cannot list servers, no loops started: {:#}", e);
                return;
            }
        };

        info!("Starting loops for {} server(s)", servers.len());
        for server in &servers {
            if let Err(e) = self.start_metrics_loop(server).await {
                error!("Metrics loop not started for {}: {}", server.name, e);
                continue;
            }
            if server.control_mode == ControlMode::Auto {
                if let Err(e) = self.start_control_loop(server).await {
                    error!("Control loop not started for {}: {}", server.name, e);
                }
            }
        }
    }

    /// Stop every running loop, awaiting full teardown of each.
    pub async fn shutdown(&self) {
        info!("Stopping all server loops");

        let control: Vec<(Uuid, LoopHandle)> =
            self.control.lock().await.drain().collect();
        for (id, handle) in control {
            stop_handle(handle, "control", id).await;
        }

        let metrics: Vec<(Uuid, LoopHandle)> =
            self.metrics.lock().await.drain().collect();
        for (id, handle) in metrics {
            stop_handle(handle, "metrics", id).await;
        }

        info!("All server loops stopped");
    }
}

/// Signal a loop and wait for its task to finish. The join completes only
/// after the loop has run its teardown path, so callers observe a fully
/// stopped loop.
async fn stop_handle(handle: LoopHandle, kind: &str, id: Uuid) {
    let _ = handle.shutdown.send(true);
    match handle.task.await {
        Ok(()) => info!("Stopped {} loop for server {}", kind, id),
        Err(e) if e.is_cancelled() => debug!("{} loop task for server {} was aborted", kind, id),
        Err(e) => error!("{} loop task for server {} panicked: {}", kind, id, e),
    }
}
