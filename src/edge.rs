//! ==============================================================================
//! edge.rs - rising edge detector for proximity sensors
//! ==============================================================================
//!
//! purpose:
//!     turns a noisy stream of distance samples into one event per arrival
//!     of an object in front of a sensor. the output is an EDGE, not a level:
//!     a truck parked in front of the sensor produces exactly one event.
//!
//! per-sensor state machine:
//!
//!     ┌──────┐  fresh sample, no rising edge   ┌──────┐
//!     │ Idle │ ──────────────────────────────> │ Idle │
//!     └──┬───┘                                 └──────┘
//!        │ fresh sample, flag false -> true
//!        ▼
//!     ┌────────────┐   release(now)   ┌──────────────────────┐
//!     │ Processing │ ───────────────> │ Idle (resumed = now) │
//!     └────────────┘                  └──────────────────────┘
//!
//!     samples seen while Processing, or taken before the sensor resumed,
//!     are dropped and never count toward the previous flag.
//!
//! relationships:
//!     - used by: controller.rs (owns one detector for the whole catalog)
//!
//! ==============================================================================

use crate::domain::{EdgeEvent, SensorId, SensorReading};
use std::collections::HashMap;
use tokio::time::Instant;

/// default "object present" distance (grove ultrasonic ranger, cm)
pub const DEFAULT_THRESHOLD: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// ready for the next sample
    Idle {
        /// end of the last processing window, if any
        resumed_at: Option<Instant>,
    },
    /// a reaction to an edge is still in flight
    Processing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeState {
    pub previous: bool,
    pub phase: Phase,
}

impl Default for EdgeState {
    fn default() -> Self {
        Self { previous: false, phase: Phase::Idle { resumed_at: None } }
    }
}

/// what happened to one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    /// sensor busy or sample is stale
    Dropped,
    /// thresholded flag did not change
    Unchanged,
    /// object left the sensor range
    Falling,
    /// object entered the sensor range; sensor stays Processing until released
    Rising(EdgeEvent),
}

impl SampleOutcome {
    pub fn into_edge(self) -> Option<EdgeEvent> {
        match self {
            SampleOutcome::Rising(edge) => Some(edge),
            _ => None,
        }
    }
}

pub struct EdgeDetector {
    threshold: f32,
    states: HashMap<SensorId, EdgeState>,
}

impl EdgeDetector {
    pub fn new(threshold: f32) -> Self {
        Self { threshold, states: HashMap::new() }
    }

    #[cfg(test)]
    pub fn state(&self, sensor: &SensorId) -> EdgeState {
        self.states.get(sensor).copied().unwrap_or_default()
    }

    /// classify one sample and advance the sensor's state machine
    pub fn handle_reading(&mut self, reading: &SensorReading) -> SampleOutcome {
        let threshold = self.threshold;
        let state = self.states.entry(reading.sensor.clone()).or_default();

        let resumed_at = match state.phase {
            Phase::Processing => return SampleOutcome::Dropped,
            Phase::Idle { resumed_at } => {
                if resumed_at.is_some_and(|resumed| reading.taken_at < resumed) {
                    return SampleOutcome::Dropped;
                }
                resumed_at
            }
        };
        state.phase = Phase::Processing;

        let flag = reading.distance <= threshold;
        let outcome = if flag == state.previous {
            SampleOutcome::Unchanged
        } else {
            state.previous = flag;
            if flag {
                SampleOutcome::Rising(EdgeEvent { sensor: reading.sensor.clone() })
            } else {
                SampleOutcome::Falling
            }
        };

        if !matches!(outcome, SampleOutcome::Rising(_)) {
            state.phase = Phase::Idle { resumed_at };
        }
        outcome
    }

    /// end the processing window opened by a rising edge
    pub fn release(&mut self, sensor: &SensorId, now: Instant) {
        if let Some(state) = self.states.get_mut(sensor) {
            state.phase = Phase::Idle { resumed_at: Some(now) };
        }
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
