//! pub/sub transport: compact json messages published over mqtt.
//!
//! delivery is fire-and-forget. the broker event loop lives in its own task
//! and only logs what goes wrong; errors are never tied back to a dispatch.

use super::{Telemetry, TransportError};
use crate::domain::{Fields, VehicleId};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// minimal broker client contract
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// where one vehicle's messages are published
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubTarget {
    pub topic: String,
    pub device_id: String,
}

impl PubSubTarget {
    pub fn address(&self) -> String {
        format!("{}/{}", self.topic, self.device_id)
    }
}

/// one row of the settings table served by the backend
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRow {
    vehicle_id: VehicleId,
    #[serde(flatten)]
    target: PubSubTarget,
}

/// fetch the vehicle -> target table once at startup
pub async fn fetch_targets(
    url: &str,
    timeout: Duration,
) -> anyhow::Result<HashMap<VehicleId, PubSubTarget>> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let rows: Vec<SettingsRow> = client.get(url).send().await?.error_for_status()?.json().await?;
    info!(url, vehicles = rows.len(), "fetched pub/sub settings");
    Ok(rows.into_iter().map(|r| (r.vehicle_id, r.target)).collect())
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    urn: &'a str,
    payload: &'a Fields,
}

pub struct PubSubTransport {
    broker: Box<dyn MessageBroker>,
    targets: HashMap<VehicleId, PubSubTarget>,
    model_urn: String,
}

impl PubSubTransport {
    pub fn new(
        broker: Box<dyn MessageBroker>,
        targets: HashMap<VehicleId, PubSubTarget>,
        model_urn: impl Into<String>,
    ) -> Self {
        Self { broker, targets, model_urn: model_urn.into() }
    }

    async fn send(
        &self,
        vehicle: &VehicleId,
        kind: &'static str,
        urn: &str,
        fields: &Fields,
    ) -> Result<(), TransportError> {
        let target = self
            .targets
            .get(vehicle)
            .ok_or_else(|| TransportError::UnknownVehicle(vehicle.clone()))?;
        let payload = serde_json::to_vec(&Envelope { kind, urn, payload: fields })?;
        let topic = target.address();
        debug!(%topic, kind, bytes = payload.len(), "publishing");
        self.broker.publish(&topic, payload).await
    }
}

#[async_trait]
impl Telemetry for PubSubTransport {
    async fn update_telemetry(
        &self,
        vehicle: &VehicleId,
        fields: Fields,
    ) -> Result<(), TransportError> {
        self.send(vehicle, "data", &self.model_urn, &fields).await
    }

    async fn raise_alert(
        &self,
        vehicle: &VehicleId,
        urn: &str,
        fields: Fields,
    ) -> Result<(), TransportError> {
        self.send(vehicle, "alert", urn, &fields).await
    }
}

// ==============================================================================
// mqtt broker (rumqttc)
// ==============================================================================

pub struct MqttBroker {
    client: AsyncClient,
}

impl MqttBroker {
    /// create the client and spawn its event loop; must run inside a runtime
    pub fn connect(host: &str, port: u16, client_id: &str, keep_alive: Duration) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(keep_alive);
        let (client, mut eventloop) = AsyncClient::new(options, 32);

        let broker = format!("{host}:{port}");
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!(%broker, "mqtt connected"),
                    Ok(_) => {}
                    Err(e) => {
                        // the event loop reconnects on the next poll
                        warn!(%broker, error = %e, "mqtt connection error");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self { client }
    }
}

#[async_trait]
impl MessageBroker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}
