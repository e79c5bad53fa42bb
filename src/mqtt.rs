// src/mqtt.rs - Broker session: publisher handle and inbound event loop
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::pubsub::{InboundMessage, Publisher};
use crate::topics::{Qos, Topic};

const REQUEST_CAPACITY: usize = 100;
/// Webcam snapshots travel base64-encoded in a single publish.
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

fn to_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
    }
}

fn presence_payload(online: bool) -> Vec<u8> {
    let state = if online { "online" } else { "offline" };
    json!({ "server": state }).to_string().into_bytes()
}

pub fn client_id(config: &BridgeConfig) -> String {
    config
        .mqtt
        .client_id
        .clone()
        .unwrap_or_else(|| format!("c3p_{}", uuid::Uuid::new_v4().simple()))
}

/// Broker options with credentials and the retained offline last-will.
pub fn mqtt_options(config: &BridgeConfig) -> MqttOptions {
    let mqtt = &config.mqtt;
    let mut options = MqttOptions::new(client_id(config), mqtt.address.clone(), mqtt.port);
    options.set_keep_alive(Duration::from_secs(mqtt.keep_alive_secs));
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    if let Some(username) = &mqtt.username {
        options.set_credentials(username.clone(), mqtt.password.clone().unwrap_or_default());
    }
    options.set_last_will(LastWill::new(
        Topic::Will.resolve(&config.instance_name),
        presence_payload(false),
        QoS::AtLeastOnce,
        true,
    ));
    options
}

/// Creates the client handle and its event loop. Nothing touches the network
/// until [`MqttEventLoop::run`] polls.
pub fn connect(config: &BridgeConfig) -> (MqttPublisher, MqttEventLoop) {
    let (client, event_loop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
    tracing::info!("MQTT client configured for {}:{}", config.mqtt.address, config.mqtt.port);
    let publisher = MqttPublisher { client: client.clone() };
    let runner = MqttEventLoop {
        client,
        event_loop,
        command_topic: Topic::Command.resolve(&config.instance_name),
        will_topic: Topic::Will.resolve(&config.instance_name),
        reconnect_delay: config.sync.reconnect_delay(),
    };
    (publisher, runner)
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos, retain: bool) -> Result<(), BridgeError> {
        self.client
            .publish(topic, to_qos(qos), retain, payload)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

pub struct MqttEventLoop {
    client: AsyncClient,
    event_loop: EventLoop,
    command_topic: String,
    will_topic: String,
    reconnect_delay: Duration,
}

impl MqttEventLoop {
    /// Drives the broker session until shutdown. Subscriptions are renewed on
    /// every ConnAck, so a broker reconnect restores the command feed.
    pub async fn run(mut self, inbound: mpsc::Sender<InboundMessage>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("MQTT event loop received shutdown signal");
                    break;
                }
                event = self.event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        tracing::debug!(topic = %publish.topic, "MQTT message received ({} bytes)", publish.payload.len());
                        let message = InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if inbound.send(message).await.is_err() {
                            tracing::warn!("Inbound consumer gone, stopping MQTT event loop");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("MQTT connection error: {}", e);
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                },
            }
        }
        self.disconnect().await;
    }

    fn on_connected(&self) {
        tracing::info!("Connected to MQTT broker");
        if let Err(e) = self.client.try_subscribe(self.command_topic.as_str(), QoS::AtLeastOnce) {
            tracing::error!("Failed to subscribe to {}: {}", self.command_topic, e);
        } else {
            tracing::info!("Subscribed to {}", self.command_topic);
        }
        if let Err(e) = self
            .client
            .try_publish(self.will_topic.as_str(), QoS::AtLeastOnce, true, presence_payload(true))
        {
            tracing::error!("Failed to announce presence: {}", e);
        }
    }

    async fn disconnect(&mut self) {
        if self.client.try_disconnect().is_err() {
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            tracing::warn!("MQTT disconnect not acknowledged within {:?}", DISCONNECT_GRACE);
        }
        tracing::info!("MQTT session closed");
    }
}
