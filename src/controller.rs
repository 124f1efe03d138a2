//! ==============================================================================
//! controller.rs - the single owner of all mutable state
//! ==============================================================================
//!
//! purpose:
//!     every sample, route request and display request goes through one
//!     command channel and is handled here, one at a time, on the main task.
//!     nothing else touches the route, the edge states or the lcd.
//!
//!     ┌──────────────┐  Reading                ┌────────────────────────────┐
//!     │ sampler task │ ──────────┐             │ controller (this file)     │
//!     └──────────────┘           ├───> mpsc ──>│  edge.rs     EdgeDetector  │
//!     ┌──────────────┐  LoadRoute│             │  route.rs    RouteReplay   │
//!     │ web server   │ ──────────┘             │  workflow.rs FinishLine    │
//!     └──────────────┘  ResetRoute, Display    │  display     interpreter   │
//!                                              └────────────────────────────┘
//!
//! ==============================================================================

use crate::display::{ScriptError, StepInterpreter};
use crate::domain::{EdgeEvent, SensorCatalog, SensorReading, VehicleId};
use crate::edge::EdgeDetector;
use crate::route::{ReplayError, Route, RouteReplay};
use crate::transport::Telemetry;
use crate::workflow::{FinishLine, FinishOutcome};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// summary of the active route returned to http clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    pub vehicle_id: VehicleId,
    pub cursor: usize,
    pub points: usize,
}

impl From<&Route> for RouteStatus {
    fn from(r: &Route) -> Self {
        Self { vehicle_id: r.vehicle_id().clone(), cursor: r.cursor(), points: r.points().len() }
    }
}

#[derive(Error, Debug)]
pub enum DisplayCommandError {
    #[error("no display configured")]
    NoDisplay,
    #[error(transparent)]
    Script(#[from] ScriptError),
}

pub enum Command {
    Reading(SensorReading),
    LoadRoute { route: Route, reply: oneshot::Sender<RouteStatus> },
    ResetRoute { reply: oneshot::Sender<Option<RouteStatus>> },
    RouteStatus { reply: oneshot::Sender<Option<RouteStatus>> },
    Display { script: Value, reply: oneshot::Sender<Result<(), DisplayCommandError>> },
}

pub struct Controller {
    catalog: SensorCatalog,
    edges: EdgeDetector,
    replay: RouteReplay,
    finish: FinishLine,
    telemetry: Box<dyn Telemetry>,
    interpreter: Option<StepInterpreter>,
}

impl Controller {
    pub fn new(
        catalog: SensorCatalog,
        edges: EdgeDetector,
        finish: FinishLine,
        telemetry: Box<dyn Telemetry>,
        interpreter: Option<StepInterpreter>,
    ) -> Self {
        Self { catalog, edges, replay: RouteReplay::new(), finish, telemetry, interpreter }
    }

    /// process commands until every sender is gone
    pub async fn run(&mut self, commands: &mut mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        info!("command channel closed");
    }

    pub async fn handle(&mut self, command: Command) {
        match command {
            Command::Reading(reading) => self.on_reading(reading).await,
            Command::LoadRoute { route, reply } => {
                let status = RouteStatus::from(self.replay.load(route));
                let _ = reply.send(status);
            }
            Command::ResetRoute { reply } => {
                let cleared = self.replay.clear();
                if let Some(route) = &cleared {
                    info!(vehicle = %route.vehicle_id(), "route reset");
                }
                let _ = reply.send(cleared.as_ref().map(RouteStatus::from));
            }
            Command::RouteStatus { reply } => {
                let _ = reply.send(self.replay.active().map(RouteStatus::from));
            }
            Command::Display { script, reply } => {
                let result = match self.interpreter.as_mut() {
                    Some(interp) => interp.execute_json(&script).await.map_err(Into::into),
                    None => Err(DisplayCommandError::NoDisplay),
                };
                let _ = reply.send(result);
            }
        }
    }

    /// turn the lcd off before exit
    pub fn shutdown(&mut self) {
        if let Some(interp) = self.interpreter.as_mut() {
            let d = interp.display_mut();
            if let Err(e) = d.set_color(0, 0, 0).and_then(|_| d.power_off()) {
                warn!(error = %e, "failed to switch display off");
            }
        }
    }

    async fn on_reading(&mut self, reading: SensorReading) {
        trace!(sensor = %reading.sensor, distance = reading.distance, "sample");
        let Some(edge) = self.edges.handle_reading(&reading).into_edge() else {
            return;
        };
        self.react(&edge).await;
        // the sensor stays busy for the whole reaction, whatever its outcome
        self.edges.release(&edge.sensor, Instant::now());
    }

    async fn react(&mut self, edge: &EdgeEvent) {
        let Some(sensor) = self.catalog.get(&edge.sensor) else {
            warn!(sensor = %edge.sensor, "edge from unknown sensor");
            return;
        };
        debug!(sensor = %edge.sensor, finish_line = sensor.finish_line, "edge detected");

        if sensor.finish_line {
            let result = self
                .finish
                .run(edge, &mut self.replay, self.telemetry.as_ref(), self.interpreter.as_mut())
                .await;
            match result {
                Ok(FinishOutcome::Completed { vehicle }) => {
                    info!(%vehicle, "finish-line workflow completed")
                }
                Ok(FinishOutcome::Unidentified { vehicle, .. }) => {
                    info!(%vehicle, "finish-line workflow ended without identification")
                }
                Err(e) => warn!(sensor = %edge.sensor, error = %e, "finish-line workflow aborted"),
            }
        } else {
            match self.replay.on_edge(self.telemetry.as_ref()).await {
                Ok(point) => info!(
                    sensor = %edge.sensor,
                    lat = point.latitude,
                    lon = point.longitude,
                    "waypoint sent"
                ),
                Err(ReplayError::NoRouteLoaded) => {
                    warn!(sensor = %edge.sensor, "no route loaded; edge ignored")
                }
                Err(e) => warn!(sensor = %edge.sensor, error = %e, "waypoint dispatch failed"),
            }
        }
    }
}
