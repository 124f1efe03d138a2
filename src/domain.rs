use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

/// identifier of a proximity sensor in the catalog (e.g. "1" or "finish")
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(pub String);

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// identifier of a truck; also the code the reader service returns for it
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// one distance sample taken from a sensor
#[derive(Clone, Debug)]
pub struct SensorReading {
    pub sensor: SensorId,
    /// distance in sensor units (cm for the grove ultrasonic ranger)
    pub distance: f32,
    /// when the sample was taken; used to discard samples taken mid-processing
    pub taken_at: Instant,
}

impl SensorReading {
    #[cfg(test)]
    pub fn new(sensor: SensorId, distance: f32) -> Self {
        Self { sensor, distance, taken_at: Instant::now() }
    }
}

/// static description of one sensor
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SensorConfig {
    pub id: SensorId,
    /// grovepi digital port
    pub port: u8,
    #[serde(default)]
    pub finish_line: bool,
}

/// the addressable set of sensors, fixed at startup
#[derive(Clone, Debug, Default)]
pub struct SensorCatalog {
    sensors: HashMap<SensorId, SensorConfig>,
}

impl SensorCatalog {
    pub fn new(sensors: impl IntoIterator<Item = SensorConfig>) -> Self {
        Self {
            sensors: sensors.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn get(&self, id: &SensorId) -> Option<&SensorConfig> {
        self.sensors.get(id)
    }
}

/// a geographic waypoint
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: f64,
}

impl Coordinate {
    /// the logical "returned to origin" position
    pub const ORIGIN: Coordinate = Coordinate::new(0.0, 0.0);

    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// telemetry fields for this position
    pub fn to_fields(self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("latitude".into(), self.latitude.into());
        fields.insert("longitude".into(), self.longitude.into());
        fields
    }
}

/// a rising edge seen on one sensor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub sensor: SensorId,
}

/// generic telemetry / alert payload
/// examples:
/// - {"latitude": 37.79, "longitude": -122.39}
/// - {"truckId": "T1", "code": "T1"}
pub type Fields = serde_json::Map<String, serde_json::Value>;
