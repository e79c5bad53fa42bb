// src/pubsub.rs - Publish capability and the explicit bridge context
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::messages::{Envelope, JobStatusEvent, OutboundMethod, SnapshotReply, TransferProgress};
use crate::topics::{Qos, Topic, resolve_template};

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outbound half of the pub/sub transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos, retain: bool) -> Result<(), BridgeError>;
}

/// Shared state handed to every component at construction.
#[derive(Clone)]
pub struct BridgeContext {
    config: Arc<BridgeConfig>,
    publisher: Arc<dyn Publisher>,
}

impl BridgeContext {
    pub fn new(config: Arc<BridgeConfig>, publisher: Arc<dyn Publisher>) -> Self {
        Self { config, publisher }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn instance(&self) -> &str {
        &self.config.instance_name
    }

    /// Serializes `payload` as JSON and publishes it. Failures are logged, never propagated.
    pub async fn publish<T: Serialize + Sync>(&self, topic: Topic, payload: &T, qos: Qos, retain: bool) {
        let topic = resolve_template(topic.template(), self.instance());
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(topic = %topic, "Failed to encode MQTT payload: {}", e);
                return;
            }
        };
        match self.publisher.publish(&topic, body, qos, retain).await {
            Ok(()) => tracing::info!(topic = %topic, "Message published"),
            Err(e) => tracing::error!(topic = %topic, "Failed to publish MQTT message: {}", e),
        }
    }

    /// Job status goes to the status broadcast and to the requester's response topic.
    pub async fn publish_job_status(&self, event: &JobStatusEvent) {
        let envelope = Envelope::for_printer(OutboundMethod::PrintStatus, event, self.instance());
        self.publish(Topic::PrintStatus, &envelope, Qos::AtLeastOnce, false).await;
        self.publish(Topic::Response, &envelope, Qos::AtLeastOnce, false).await;
    }

    pub async fn publish_progress(&self, progress: &TransferProgress) {
        let envelope = Envelope::for_printer(OutboundMethod::PrintProgress, progress, self.instance());
        self.publish(Topic::Response, &envelope, Qos::AtLeastOnce, false).await;
    }

    pub async fn publish_snapshot_reply(&self, reply: &SnapshotReply) {
        let envelope = Envelope::new(OutboundMethod::WebcamSnapshot, reply);
        self.publish(Topic::Response, &envelope, Qos::AtMostOnce, false).await;
    }
}
