//! ==============================================================================
//! transport - telemetry and alert dispatch
//! ==============================================================================
//!
//! purpose:
//!     one interface, two backends, picked once at startup:
//!
//!     ┌───────────────────────┐        ┌──────────────────────────────────┐
//!     │ route.rs / workflow.rs│ ─────> │ dyn Telemetry                    │
//!     └───────────────────────┘        │  ├─ DirectTransport (direct.rs)  │
//!                                      │  └─ PubSubTransport (pubsub.rs)  │
//!                                      └──────────────────────────────────┘
//!
//!     direct: vehicle -> device handle -> virtual device for the model urn
//!     pubsub: vehicle -> {topic, device id} -> publish to "topic/device"
//!
//! ==============================================================================

pub mod direct;
pub mod pubsub;

use crate::domain::{Fields, VehicleId};
use async_trait::async_trait;
use thiserror::Error;

pub use direct::{DirectTransport, IotcsRegistry};
pub use pubsub::{MqttBroker, PubSubTarget, PubSubTransport};

/// device model all truck telemetry is reported against
pub const CAR_MODEL_URN: &str = "urn:oracle:iot:device:model:car";
/// alert raised when a truck is identified at the finish line
pub const FINISH_ALERT_URN: &str = "urn:oracle:iot:device:model:car:finishline";

#[derive(Error, Debug)]
pub enum TransportError {
    /// no alert target (device handle or topic) for this vehicle
    #[error("no alert target registered for vehicle {0}")]
    UnknownVehicle(VehicleId),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected message: {status}")]
    Rejected { status: u16 },
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("payload serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// where positions and alerts for a vehicle go
#[async_trait]
pub trait Telemetry: Send + Sync {
    async fn update_telemetry(
        &self,
        vehicle: &VehicleId,
        fields: Fields,
    ) -> Result<(), TransportError>;
    async fn raise_alert(
        &self,
        vehicle: &VehicleId,
        urn: &str,
        fields: Fields,
    ) -> Result<(), TransportError>;
}
