//! direct transport: the host talks to the IoT cloud as the truck's device.
//!
//! every vehicle maps to a registered device endpoint; telemetry and alerts
//! are sent as messages from that endpoint against the car device model.

use super::{Telemetry, TransportError};
use crate::domain::{Fields, VehicleId};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// path the original gateway polled to decide the server is up
const SERVER_PROBE_PATH: &str = "/iot/api/v1/private/server";
const MESSAGES_PATH: &str = "/iot/api/v2/messages";

/// looks up the device registered for a vehicle
pub trait DeviceRegistry: Send + Sync {
    fn device_handle(&self, vehicle: &VehicleId) -> Option<Arc<dyn DeviceHandle>>;
}

/// a registered device; `urn` selects its virtual representation
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    async fn update(&self, urn: &str, fields: Fields) -> Result<(), TransportError>;
    async fn raise_alert(
        &self,
        urn: &str,
        alert_urn: &str,
        fields: Fields,
    ) -> Result<(), TransportError>;
}

pub struct DirectTransport {
    registry: Box<dyn DeviceRegistry>,
    model_urn: String,
}

impl DirectTransport {
    pub fn new(registry: Box<dyn DeviceRegistry>, model_urn: impl Into<String>) -> Self {
        Self { registry, model_urn: model_urn.into() }
    }

    fn target(&self, vehicle: &VehicleId) -> Result<Arc<dyn DeviceHandle>, TransportError> {
        self.registry
            .device_handle(vehicle)
            .ok_or_else(|| TransportError::UnknownVehicle(vehicle.clone()))
    }
}

#[async_trait]
impl Telemetry for DirectTransport {
    async fn update_telemetry(
        &self,
        vehicle: &VehicleId,
        fields: Fields,
    ) -> Result<(), TransportError> {
        self.target(vehicle)?.update(&self.model_urn, fields).await
    }

    async fn raise_alert(
        &self,
        vehicle: &VehicleId,
        urn: &str,
        fields: Fields,
    ) -> Result<(), TransportError> {
        self.target(vehicle)?.raise_alert(&self.model_urn, urn, fields).await
    }
}

// ==============================================================================
// iot cloud rest registry
// ==============================================================================

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Message {
    source: String,
    destination: String,
    priority: &'static str,
    reliability: &'static str,
    event_time: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    payload: MessagePayload,
}

#[derive(Debug, Serialize, PartialEq)]
struct MessagePayload {
    format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    data: Fields,
}

impl Message {
    fn data(endpoint: &str, urn: &str, fields: Fields, event_time: u64) -> Self {
        Self {
            source: endpoint.to_string(),
            destination: String::new(),
            priority: "LOW",
            reliability: "BEST_EFFORT",
            event_time,
            kind: "DATA",
            payload: MessagePayload {
                format: urn.to_string(),
                severity: None,
                description: None,
                data: fields,
            },
        }
    }

    fn alert(
        endpoint: &str,
        model_urn: &str,
        alert_urn: &str,
        fields: Fields,
        event_time: u64,
    ) -> Self {
        Self {
            source: endpoint.to_string(),
            destination: String::new(),
            priority: "HIGH",
            reliability: "GUARANTEED_DELIVERY",
            event_time,
            kind: "ALERT",
            payload: MessagePayload {
                format: alert_urn.to_string(),
                severity: Some("SIGNIFICANT"),
                description: Some(format!("alert raised by {model_urn}")),
                data: fields,
            },
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// registry backed by the cloud's message endpoint; the vehicle -> endpoint
/// table comes from configuration
pub struct IotcsRegistry {
    client: reqwest::Client,
    server_url: String,
    token: Option<String>,
    endpoints: HashMap<VehicleId, String>,
}

impl IotcsRegistry {
    pub fn new(
        server_url: impl Into<String>,
        token: Option<String>,
        endpoints: HashMap<VehicleId, String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            token,
            endpoints,
        })
    }

    /// block until the server answers. 401 and 404 still mean "up".
    pub async fn wait_until_reachable(&self, interval: Duration) {
        let url = format!("{}{}", self.server_url, SERVER_PROBE_PATH);
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            debug!(%url, attempt, "probing server");
            match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => break,
                Ok(resp) if matches!(resp.status().as_u16(), 401 | 404) => break,
                Ok(resp) => warn!(status = resp.status().as_u16(), attempt, "server not ready"),
                Err(e) => warn!(error = %e, attempt, "server not reachable"),
            }
            tokio::time::sleep(interval).await;
        }
        info!(server = %self.server_url, attempts = attempt, "server seems up & running");
    }
}

impl DeviceRegistry for IotcsRegistry {
    fn device_handle(&self, vehicle: &VehicleId) -> Option<Arc<dyn DeviceHandle>> {
        let endpoint = self.endpoints.get(vehicle)?;
        Some(Arc::new(IotcsDevice {
            client: self.client.clone(),
            messages_url: format!("{}{}", self.server_url, MESSAGES_PATH),
            token: self.token.clone(),
            endpoint: endpoint.clone(),
        }))
    }
}

struct IotcsDevice {
    client: reqwest::Client,
    messages_url: String,
    token: Option<String>,
    endpoint: String,
}

impl IotcsDevice {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let mut req = self.client.post(&self.messages_url).json(&[message]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Rejected { status: status.as_u16() });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceHandle for IotcsDevice {
    async fn update(&self, urn: &str, fields: Fields) -> Result<(), TransportError> {
        debug!(endpoint = %self.endpoint, urn, "sending data message");
        self.send(Message::data(&self.endpoint, urn, fields, now_ms())).await
    }

    async fn raise_alert(
        &self,
        urn: &str,
        alert_urn: &str,
        fields: Fields,
    ) -> Result<(), TransportError> {
        debug!(endpoint = %self.endpoint, alert_urn, "sending alert message");
        self.send(Message::alert(&self.endpoint, urn, alert_urn, fields, now_ms())).await
    }
}
