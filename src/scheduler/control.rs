//! Control loop: drives one server's fans toward the curve target.
//!
//! Explicit state machine, `Starting -> Running -> Draining -> Stopped`, so
//! the transitions can be tested by stepping [`ControlLoop`] directly instead
//! of waiting on real timers. The async runner around it only adds sleeps and
//! cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    HandleMap, CONTROL_ERROR_BACKOFF, CONTROL_INTERVAL, NO_CURVE_BACKOFF, NO_TEMPERATURE_BACKOFF,
};
use crate::controller::ServerController;
use crate::curve;
use crate::model::{ControlMode, Server};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Take over fan authority (best-effort), then run.
    Starting,
    /// Normal operation: observe config, read temperature, apply the curve.
    Running,
    /// Hand fan authority back to the BMC, then stop.
    Draining,
    Stopped,
}

/// What the runner should do after one step of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Step again immediately.
    Continue,
    /// Sleep, then step again.
    Sleep(Duration),
    /// Teardown is complete.
    Done,
}

pub struct ControlLoop {
    server_id: Uuid,
    name: String,
    controller: Box<dyn ServerController>,
    store: Arc<dyn Store>,
    state: ControlState,
}

impl ControlLoop {
    pub fn new(
        server_id: Uuid,
        name: String,
        controller: Box<dyn ServerController>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            server_id,
            name,
            controller,
            store,
            state: ControlState::Starting,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Request teardown. Takes effect on the next step; the drain still runs,
    /// so fan authority is always handed back.
    pub fn cancel(&mut self) {
        if !matches!(self.state, ControlState::Draining | ControlState::Stopped) {
            self.state = ControlState::Draining;
        }
    }

    /// Advance the state machine by one step.
    pub async fn step(&mut self) -> Tick {
        match self.state {
            ControlState::Starting => {
                // Best-effort: a failed take-over is logged by the controller
                // and must not abort startup.
                self.controller.take_over_control().await;
                self.state = ControlState::Running;
                Tick::Continue
            }
            ControlState::Running => match self.run_iteration().await {
                Ok(tick) => tick,
                Err(e) => {
                    error!("Control loop error for server {}: {:#}", self.name, e);
                    Tick::Sleep(CONTROL_ERROR_BACKOFF)
                }
            },
            ControlState::Draining => {
                self.controller.return_control_to_system().await;
                self.state = ControlState::Stopped;
                Tick::Done
            }
            ControlState::Stopped => Tick::Done,
        }
    }

    /// One control decision. The server record is re-fetched every iteration:
    /// configuration changes arrive asynchronously, and a mode flip away from
    /// auto must be observed within one control interval without an explicit
    /// restart signal.
    async fn run_iteration(&mut self) -> anyhow::Result<Tick> {
        let server = self.store.get_server(self.server_id).await?;

        let still_auto = matches!(
            &server,
            Some(Server {
                control_mode: ControlMode::Auto,
                ..
            })
        );
        if !still_auto {
            info!(
                "Server {} is no longer in auto mode, stopping control loop",
                self.name
            );
            self.state = ControlState::Draining;
            return Ok(Tick::Continue);
        }

        let Some(temperature) = self.controller.read_temperature().await else {
            warn!(
                "No usable temperature for server {}, holding fan speed",
                self.name
            );
            return Ok(Tick::Sleep(NO_TEMPERATURE_BACKOFF));
        };

        let points = self
            .store
            .get_fan_curve(self.server_id)
            .await?
            .map(|curve| curve.points)
            .unwrap_or_default();
        if points.is_empty() {
            // No operator intent, no control action: fans stay where they are.
            warn!(
                "No fan curve defined for server {}, holding fan speed",
                self.name
            );
            return Ok(Tick::Sleep(NO_CURVE_BACKOFF));
        }

        let target = curve::target_speed(temperature, &points);
        info!(
            "Auto control for server {}: {:.1}°C -> {}%",
            self.name, temperature, target
        );
        self.controller.set_fan_speed(target).await;

        Ok(Tick::Sleep(CONTROL_INTERVAL))
    }
}

/// Async runner: steps the state machine, sleeping between ticks and folding
/// the shutdown signal into a cancel at either suspension point.
pub(crate) async fn run(
    server: Server,
    controller: Box<dyn ServerController>,
    store: Arc<dyn Store>,
    mut shutdown: watch::Receiver<bool>,
    handles: HandleMap,
) {
    info!(
        "Starting control loop for server {} ({})",
        server.name, server.id
    );

    let id = server.id;
    let mut looper = ControlLoop::new(id, server.name.clone(), controller, store);
    let mut cancelled = false;

    loop {
        let tick = if cancelled {
            looper.step().await
        } else {
            tokio::select! {
                tick = looper.step() => tick,
                _ = shutdown.changed() => {
                    info!("Control loop for server {} cancelled", server.name);
                    looper.cancel();
                    cancelled = true;
                    continue;
                }
            }
        };

        match tick {
            Tick::Continue => {}
            Tick::Done => break,
            Tick::Sleep(duration) => {
                if cancelled {
                    continue;
                }
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = shutdown.changed() => {
                        info!("Control loop for server {} cancelled", server.name);
                        looper.cancel();
                        cancelled = true;
                    }
                }
            }
        }
    }

    // Natural exit (mode flip or deletion): drop our own registry entry. When
    // a concurrent stop call owns the lock it also owns the removal, so a
    // failed try_lock is left alone.
    if let Ok(mut handles) = handles.try_lock() {
        handles.remove(&id);
    }

    info!("Control loop for server {} stopped", server.name);
}
