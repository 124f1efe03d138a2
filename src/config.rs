//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `finishline.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - PollingConfig: How often each sensor is sampled.
//!     - DetectorConfig: "object present" distance threshold.
//!     - sensors: the sensor catalog (id, grovepi port, finish line flag).
//!     - ServerConfig: route-load REST server.
//!     - ActuatorConfig / ReaderConfig: finish-line services.
//!     - TransportConfig: direct (iot cloud rest) or pub/sub (mqtt).
//!     - DisplayConfig: lcd countdown shown before the reader capture.
//!
//! ==============================================================================

use crate::display::DisplayStep;
use crate::domain::{SensorConfig, VehicleId};
use crate::edge::DEFAULT_THRESHOLD;
use crate::transport::{PubSubTarget, CAR_MODEL_URN, FINISH_ALERT_URN};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    pub actuator: ActuatorConfig,
    pub reader: ReaderConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    pub threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".to_string(), port: 8888 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActuatorConfig {
    pub stop_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaderConfig {
    pub capture_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Direct,
    PubSub,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    pub mode: TransportMode,
    #[serde(default = "default_model_urn")]
    pub model_urn: String,
    #[serde(default = "default_alert_urn")]
    pub alert_urn: String,
    #[serde(default)]
    pub direct: Option<DirectConfig>,
    #[serde(default)]
    pub pubsub: Option<PubSubConfig>,
}

/// iot cloud server and the device endpoint registered for each truck
#[derive(Debug, Deserialize, Clone)]
pub struct DirectConfig {
    pub server_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub devices: HashMap<VehicleId, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PubSubConfig {
    pub broker_host: String,
    #[serde(default = "default_mqtt_port")]
    pub broker_port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// fetch the vehicle table from here instead of `devices`
    #[serde(default)]
    pub settings_url: Option<String>,
    #[serde(default)]
    pub devices: HashMap<VehicleId, PubSubTarget>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    pub enabled: bool,
    /// script shown before the capture; raw json steps, bad ones are skipped
    #[serde(default = "default_countdown")]
    pub countdown: Vec<serde_json::Value>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { enabled: false, countdown: default_countdown() }
    }
}

impl DisplayConfig {
    pub fn countdown_steps(&self) -> Vec<DisplayStep> {
        self.countdown
            .iter()
            .enumerate()
            .filter_map(|(index, raw)| match DisplayStep::from_value(raw) {
                Ok(step) => Some(step),
                Err(e) => {
                    warn!(index, error = %e, "ignoring countdown step");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: false }
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "finishline-host".to_string()
}

fn default_model_urn() -> String {
    CAR_MODEL_URN.to_string()
}

fn default_alert_urn() -> String {
    FINISH_ALERT_URN.to_string()
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig { id: "1".into(), port: 6, finish_line: false },
        SensorConfig { id: "finish".into(), port: 7, finish_line: true },
    ]
}

fn default_countdown() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({"action": "on"}),
        serde_json::json!({"action": "write", "clear": true, "color": [0, 0, 255], "text": "Smile!"}),
        serde_json::json!({"action": "wait", "time": 1000}),
        serde_json::json!({"action": "loop", "param": {
            "loops": 3, "interval": 1000, "reversed": true,
            "action": "write", "clear": true, "text": "%d..."
        }}),
    ]
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: HostConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, else the usual places, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit {
            let config = Self::load(path)?;
            info!(path = %path.display(), "config loaded");
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("finishline.toml"),
            PathBuf::from("..").join("config").join("finishline.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        info!(path = %path.display(), "config loaded");
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to load config");
                    }
                }
            }
        }

        warn!("no config file found - using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sensors.is_empty() {
            anyhow::bail!("no sensors configured");
        }
        if self.polling.interval_ms == 0 {
            anyhow::bail!("polling.interval_ms must be > 0");
        }
        match self.transport.mode {
            TransportMode::Direct if self.transport.direct.is_none() => {
                anyhow::bail!("transport.mode = \"direct\" needs a [transport.direct] section")
            }
            TransportMode::PubSub if self.transport.pubsub.is_none() => {
                anyhow::bail!("transport.mode = \"pubsub\" needs a [transport.pubsub] section")
            }
            _ => Ok(()),
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        let finish: Vec<&str> = self
            .sensors
            .iter()
            .filter(|s| s.finish_line)
            .map(|s| s.id.0.as_str())
            .collect();
        info!(
            sensors = self.sensors.len(),
            finish_line = ?finish,
            threshold = self.detector.threshold,
            poll_ms = self.polling.interval_ms,
            transport = ?self.transport.mode,
            port = self.server.port,
            display = self.display.enabled,
            "host configuration"
        );
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            detector: DetectorConfig::default(),
            sensors: default_sensors(),
            server: ServerConfig::default(),
            actuator: ActuatorConfig {
                stop_url: "http://localhost:8080/truck/stop".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            reader: ReaderConfig {
                capture_url: "http://localhost:8081/capture".to_string(),
                timeout_ms: default_timeout_ms(),
            },
            transport: TransportConfig {
                mode: TransportMode::PubSub,
                model_urn: default_model_urn(),
                alert_urn: default_alert_urn(),
                direct: None,
                pubsub: Some(PubSubConfig {
                    broker_host: "localhost".to_string(),
                    broker_port: default_mqtt_port(),
                    client_id: default_client_id(),
                    settings_url: None,
                    devices: HashMap::new(),
                }),
            },
            display: DisplayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [polling]
        interval_ms = 50

        [[sensors]]
        id = "1"
        port = 6

        [[sensors]]
        id = "finish"
        port = 5
        finish_line = true

        [actuator]
        stop_url = "http://car:8080/stop"

        [reader]
        capture_url = "http://camera:8081/capture"
        timeout_ms = 3000

        [transport]
        mode = "direct"

        [transport.direct]
        server_url = "https://iot.example.com"
        devices = { T1 = "EP-0001" }

        [display]
        enabled = true
        countdown = [
            { action = "write", text = "Ready" },
            { action = "dance" },
            { action = "wait", time = 500 },
        ]
    "#;

    #[test]
    fn test_parse_sample() {
        let config: HostConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.polling.interval_ms, 50);
        assert_eq!(config.detector.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.server.port, 8888);
        assert!(config.sensors[1].finish_line);
        assert!(!config.sensors[0].finish_line);
        assert_eq!(config.reader.timeout_ms, 3000);
        assert_eq!(config.actuator.timeout_ms, 1000);
        assert_eq!(config.transport.mode, TransportMode::Direct);
        assert_eq!(config.transport.model_urn, CAR_MODEL_URN);
        let direct = config.transport.direct.as_ref().unwrap();
        assert_eq!(direct.devices[&VehicleId::from("T1")], "EP-0001");
    }

    #[test]
    fn test_countdown_skips_bad_steps() {
        let config: HostConfig = toml::from_str(SAMPLE).unwrap();
        let steps = config.display.countdown_steps();
        assert_eq!(steps, vec![DisplayStep::text("Ready"), DisplayStep::Wait(millis(500))]);
    }

    #[test]
    fn test_default_countdown_parses() {
        assert_eq!(DisplayConfig::default().countdown_steps().len(), 4);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let broken = SAMPLE.replace("interval_ms = 50", "interval_ms = 0");
        let config: HostConfig = toml::from_str(&broken).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("polling.interval_ms"), "{err}");
    }

    #[test]
    fn test_mode_without_section_rejected() {
        let broken = SAMPLE.replace("mode = \"direct\"", "mode = \"pubsub\"");
        let config: HostConfig = toml::from_str(&broken).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pubsub_devices_table() {
        let config: HostConfig = toml::from_str(
            r#"
            [actuator]
            stop_url = "http://car/stop"
            [reader]
            capture_url = "http://camera/capture"
            [transport]
            mode = "pubsub"
            [transport.pubsub]
            broker_host = "broker"
            [transport.pubsub.devices.T1]
            topic = "trucks"
            deviceId = "dev-1"
            "#,
        )
        .unwrap();
        let pubsub = config.transport.pubsub.unwrap();
        assert_eq!(pubsub.broker_port, 1883);
        assert_eq!(pubsub.devices[&VehicleId::from("T1")].address(), "trucks/dev-1");
        assert_eq!(config.sensors.len(), 2);
    }
}
