use crate::error::AgentError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::time::Duration;
use uuid::Uuid;

/// Outbound side of the message bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hand a payload to the bus for delivery on `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), AgentError>;
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_capture_token() -> String {
    String::from("capture")
}

/// Broker connection and the topics the agent uses.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq, Debug)]
pub struct BusConfig {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep alive interval in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_keep_alive")]
    pub keep_alive: Duration,
    /// Topic that carries capture requests, i.e. `farm/raspi-01/camera-command`.
    pub capture_topic: String,
    /// Exact payload that triggers a capture.
    #[serde(default = "default_capture_token")]
    pub capture_token: String,
    /// Wildcard filter for module control, i.e. `farm/raspi-01/#`.
    pub module_topic: String,
    /// Sensor telemetry is published here.
    pub sensor_topic: String,
    /// Storage reference of every uploaded photo is published here.
    pub photo_topic: String,
    /// Photo analysis results are published here.
    pub analysis_topic: String,
}

impl BusConfig {
    /// Filters the agent subscribes to, re-issued on every connection.
    pub fn subscriptions(&self) -> [&str; 2] {
        [&self.capture_topic, &self.module_topic]
    }
}

/// MQTT client for the farm broker. The event loop is returned separately
/// so the controller can own the receive side.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Create the client, every agent start uses a fresh client id.
    ///
    /// * `config`: `BusConfig`
    pub fn connect(config: &BusConfig) -> (Self, EventLoop) {
        let client_id = format!("datafarm-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        let (client, eventloop) = AsyncClient::new(options, 20);
        (Self { client }, eventloop)
    }

    /// Subscribe to every filter in the list.
    ///
    /// * `filters`: topic filters.
    pub async fn subscribe(&self, filters: &[&str]) -> Result<(), AgentError> {
        for filter in filters {
            self.client
                .subscribe(*filter, QoS::AtLeastOnce)
                .await
                .map_err(|e| AgentError::Publish {
                    topic: String::from(*filter),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Ask the broker to close the session.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::warn!("mqtt disconnect failed: {e}");
        }
    }
}

#[async_trait]
impl Publisher for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), AgentError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| AgentError::Publish {
                topic: String::from(topic),
                reason: e.to_string(),
            })
    }
}
