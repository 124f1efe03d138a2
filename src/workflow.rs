//! ==============================================================================
//! workflow.rs - finish-line workflow
//! ==============================================================================
//!
//! purpose:
//!     what happens when a truck reaches the finish-line sensor:
//!
//!     1. precondition     a route must be loaded         (hard failure)
//!     2. stop actuator    halt the truck                 (hard failure)
//!     3. obtain code      countdown on the lcd, then ask the reader
//!     4. send alert       ─┐
//!     5. reset position    ├ only when the code matches the route's truck
//!     6. cleanup          ─┘
//!
//!     hard failures end the workflow with an error; an unidentified truck
//!     is a normal outcome that leaves the route loaded.
//!
//! relationships:
//!     - used by: controller.rs (finish-line edges)
//!     - uses: route.rs, services.rs, transport, display
//!
//! ==============================================================================

use crate::display::{DisplayStep, Rgb, StepInterpreter, WriteStep};
use crate::domain::{Coordinate, EdgeEvent, Fields, VehicleId};
use crate::route::RouteReplay;
use crate::services::{Actuator, CaptureResult, Reader, ServiceError};
use crate::transport::{Telemetry, TransportError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("no route loaded")]
    NoRouteLoaded,
    #[error("actuator stop failed: {0}")]
    ActuatorStopFailed(#[source] ServiceError),
}

/// result of asking the reader for the truck's code
#[derive(Debug, Clone, PartialEq)]
pub enum Identification {
    Matched,
    Mismatched { code: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinishOutcome {
    /// alert sent, position reset, route cleared
    Completed { vehicle: VehicleId },
    /// truck stopped but not identified; route kept
    Unidentified { vehicle: VehicleId, identification: Identification },
}

pub struct FinishLine {
    actuator: Box<dyn Actuator>,
    reader: Box<dyn Reader>,
    alert_urn: String,
    countdown: Vec<DisplayStep>,
}

impl FinishLine {
    pub fn new(
        actuator: Box<dyn Actuator>,
        reader: Box<dyn Reader>,
        alert_urn: impl Into<String>,
    ) -> Self {
        Self { actuator, reader, alert_urn: alert_urn.into(), countdown: Vec::new() }
    }

    /// steps shown on the lcd right before the capture
    pub fn with_countdown(mut self, countdown: Vec<DisplayStep>) -> Self {
        self.countdown = countdown;
        self
    }

    pub async fn run(
        &self,
        edge: &EdgeEvent,
        replay: &mut RouteReplay,
        telemetry: &dyn Telemetry,
        mut display: Option<&mut StepInterpreter>,
    ) -> Result<FinishOutcome, WorkflowError> {
        // 1. precondition
        let vehicle = replay
            .active()
            .map(|r| r.vehicle_id().clone())
            .ok_or(WorkflowError::NoRouteLoaded)?;
        info!(sensor = %edge.sensor, %vehicle, "finish line reached");

        // 2. stop actuator
        self.actuator.stop().await.map_err(WorkflowError::ActuatorStopFailed)?;
        info!(%vehicle, "actuator stopped");

        // 3. obtain code
        if let Some(interp) = display.as_deref_mut() {
            show(interp, &self.countdown).await;
        }
        let identification = self.identify(&vehicle).await;
        if let Some(interp) = display.as_deref_mut() {
            show(interp, &result_screen(&vehicle, &identification)).await;
        }
        if identification != Identification::Matched {
            warn!(%vehicle, ?identification, "truck not identified; no alert sent");
            return Ok(FinishOutcome::Unidentified { vehicle, identification });
        }

        // 4. send alert
        let mut fields = Fields::new();
        fields.insert("truckId".into(), vehicle.0.clone().into());
        fields.insert("sensorId".into(), edge.sensor.0.clone().into());
        match telemetry.raise_alert(&vehicle, &self.alert_urn, fields).await {
            Ok(()) => info!(%vehicle, urn = %self.alert_urn, "alert sent"),
            Err(TransportError::UnknownVehicle(_)) => {
                warn!(%vehicle, "no alert target for vehicle")
            }
            Err(e) => warn!(%vehicle, error = %e, "alert dispatch failed"),
        }

        // 5. reset position
        if let Err(e) = telemetry.update_telemetry(&vehicle, Coordinate::ORIGIN.to_fields()).await {
            warn!(%vehicle, error = %e, "position reset failed");
        }

        // 6. cleanup
        replay.clear();
        info!(%vehicle, "route cleared");
        Ok(FinishOutcome::Completed { vehicle })
    }

    async fn identify(&self, vehicle: &VehicleId) -> Identification {
        match self.reader.capture().await {
            Ok(resp) if resp.result == CaptureResult::Success => match resp.code {
                Some(code) if code == vehicle.0 => Identification::Matched,
                Some(code) => Identification::Mismatched { code },
                None => Identification::Failed { reason: "no code returned".into() },
            },
            Ok(resp) => Identification::Failed {
                reason: resp.message.unwrap_or_else(|| "reader reported failure".into()),
            },
            Err(e) => Identification::Failed { reason: e.to_string() },
        }
    }
}

/// lcd feedback never affects the workflow
async fn show(interp: &mut StepInterpreter, steps: &[DisplayStep]) {
    if steps.is_empty() {
        return;
    }
    if let Err(e) = interp.execute(steps).await {
        warn!(error = %e, "display feedback failed");
    }
}

fn result_screen(vehicle: &VehicleId, identification: &Identification) -> Vec<DisplayStep> {
    let (color, text) = match identification {
        Identification::Matched => (Rgb(0, 255, 0), format!("Welcome\n{vehicle}")),
        Identification::Mismatched { code } => (Rgb(255, 0, 0), format!("Unknown truck\n{code}")),
        Identification::Failed { .. } => (Rgb(255, 0, 0), "Not identified".to_string()),
    };
    vec![DisplayStep::Write(WriteStep {
        text: Some(text),
        clear: true,
        color: Some(color),
        ..WriteStep::default()
    })]
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeActuator, FakeReader};
    use super::*;
    use crate::display::interpreter::testing::{Op, RecordingDisplay};
    use crate::route::Route;
    use crate::transport::testing::{Call, RecordingTelemetry};
    use crate::transport::FINISH_ALERT_URN;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::time::Instant;

    fn edge() -> EdgeEvent {
        EdgeEvent { sensor: "finish".into() }
    }

    fn loaded(vehicle: &str) -> RouteReplay {
        let mut replay = RouteReplay::new();
        replay.load(Route::new(vehicle.into(), vec![Coordinate::new(1.0, 2.0)]).unwrap());
        replay
    }

    fn finish(actuator: &FakeActuator, reader: &FakeReader) -> FinishLine {
        FinishLine::new(Box::new(actuator.clone()), Box::new(reader.clone()), FINISH_ALERT_URN)
    }

    #[tokio::test]
    async fn test_no_route_loaded() {
        let actuator = FakeActuator::default();
        let reader = FakeReader::code("T1");
        let telemetry = RecordingTelemetry::default();
        let mut replay = RouteReplay::new();

        let err = finish(&actuator, &reader)
            .run(&edge(), &mut replay, &telemetry, None)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::NoRouteLoaded));
        assert_eq!(actuator.stops.load(Ordering::SeqCst), 0);
        assert!(reader.captures().is_empty());
        assert!(telemetry.calls().is_empty());
        assert!(replay.active().is_none());
    }

    #[tokio::test]
    async fn test_matching_code_alerts_resets_and_clears() {
        let actuator = FakeActuator::default();
        let reader = FakeReader::code("T1");
        let telemetry = RecordingTelemetry::default();
        let mut replay = loaded("T1");

        let outcome = finish(&actuator, &reader)
            .run(&edge(), &mut replay, &telemetry, None)
            .await
            .unwrap();

        assert_eq!(outcome, FinishOutcome::Completed { vehicle: "T1".into() });
        assert_eq!(actuator.stops.load(Ordering::SeqCst), 1);
        let calls = telemetry.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(
            &calls[0],
            Call::Alert { vehicle, urn, .. } if vehicle.0 == "T1" && urn == FINISH_ALERT_URN
        ));
        assert_eq!(
            calls[1],
            Call::Update { vehicle: "T1".into(), fields: Coordinate::ORIGIN.to_fields() }
        );
        assert!(replay.active().is_none());
    }

    #[tokio::test]
    async fn test_reader_failure_keeps_route() {
        for reader in [FakeReader::failure(), FakeReader::erroring()] {
            let telemetry = RecordingTelemetry::default();
            let mut replay = loaded("T1");
            let outcome = finish(&FakeActuator::default(), &reader)
                .run(&edge(), &mut replay, &telemetry, None)
                .await
                .unwrap();

            assert!(matches!(
                outcome,
                FinishOutcome::Unidentified { identification: Identification::Failed { .. }, .. }
            ));
            assert!(telemetry.calls().is_empty());
            assert!(replay.active().is_some());
        }
    }

    #[tokio::test]
    async fn test_mismatched_code_is_not_an_identification() {
        let telemetry = RecordingTelemetry::default();
        let mut replay = loaded("T1");
        let outcome = finish(&FakeActuator::default(), &FakeReader::code("T2"))
            .run(&edge(), &mut replay, &telemetry, None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FinishOutcome::Unidentified {
                vehicle: "T1".into(),
                identification: Identification::Mismatched { code: "T2".into() },
            }
        );
        assert!(telemetry.calls().is_empty());
        assert!(replay.active().is_some());
    }

    #[tokio::test]
    async fn test_actuator_failure_aborts_before_capture() {
        let actuator = FakeActuator { fail: true, ..FakeActuator::default() };
        let reader = FakeReader::code("T1");
        let telemetry = RecordingTelemetry::default();
        let mut replay = loaded("T1");

        let err = finish(&actuator, &reader)
            .run(&edge(), &mut replay, &telemetry, None)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::ActuatorStopFailed(_)));
        assert!(reader.captures().is_empty());
        assert!(telemetry.calls().is_empty());
        assert!(replay.active().is_some());
    }

    #[tokio::test]
    async fn test_transport_failures_do_not_stop_cleanup() {
        let telemetry = RecordingTelemetry::failing();
        let mut replay = loaded("T1");
        let outcome = finish(&FakeActuator::default(), &FakeReader::code("T1"))
            .run(&edge(), &mut replay, &telemetry, None)
            .await
            .unwrap();

        assert_eq!(outcome, FinishOutcome::Completed { vehicle: "T1".into() });
        assert_eq!(telemetry.calls().len(), 2);
        assert!(replay.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_runs_before_capture() {
        let reader = FakeReader::code("T1");
        let display = RecordingDisplay::default();
        let mut interp = StepInterpreter::new(Box::new(display.clone()));
        let workflow = finish(&FakeActuator::default(), &reader).with_countdown(vec![
            DisplayStep::text("Smile!"),
            DisplayStep::Wait(Duration::from_secs(1)),
        ]);
        let started = Instant::now();
        let mut replay = loaded("T1");

        workflow
            .run(&edge(), &mut replay, &RecordingTelemetry::default(), Some(&mut interp))
            .await
            .unwrap();

        assert!(reader.captures()[0] - started >= Duration::from_secs(1));
        let ops = display.ops();
        assert_eq!(ops[0], Op::Text("Smile!".into()));
        assert_eq!(ops.last(), Some(&Op::Text("Welcome\nT1".into())));
    }

    #[tokio::test]
    async fn test_display_failure_is_not_fatal() {
        let display = RecordingDisplay { fail: true, ..RecordingDisplay::default() };
        let mut interp = StepInterpreter::new(Box::new(display));
        let workflow = finish(&FakeActuator::default(), &FakeReader::code("T1"))
            .with_countdown(vec![DisplayStep::On]);
        let mut replay = loaded("T1");

        let outcome = workflow
            .run(&edge(), &mut replay, &RecordingTelemetry::default(), Some(&mut interp))
            .await
            .unwrap();
        assert!(matches!(outcome, FinishOutcome::Completed { .. }));
    }
}
