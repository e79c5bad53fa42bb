// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use c3p_bridge::control_plane::{ControlPlaneConnector, ControlPlaneLink};
use c3p_bridge::topics::Qos;
use c3p_bridge::{BridgeConfig, BridgeContext, BridgeError, MoonrakerClient, Publisher};

pub const INSTANCE: &str = "dev42";

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub payload: Value,
    pub qos: Qos,
    pub retain: bool,
}

/// Captures every publish instead of sending it to a broker.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.messages().into_iter().filter(|m| m.topic == topic).collect()
    }

    pub fn with_method(&self, method: &str) -> Vec<Published> {
        self.messages()
            .into_iter()
            .filter(|m| m.payload["method"] == method)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos, retain: bool) -> Result<(), BridgeError> {
        let payload = serde_json::from_slice(&payload)?;
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }
}

pub fn test_config(api_url: &str) -> BridgeConfig {
    let mut config = BridgeConfig {
        instance_name: INSTANCE.to_string(),
        ..Default::default()
    };
    config.printer.api_url = api_url.to_string();
    config.printer.request_timeout_secs = 5;
    config.printer.connect_timeout_secs = 2;
    config
}

pub fn context(config: BridgeConfig) -> (BridgeContext, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let ctx = BridgeContext::new(Arc::new(config), publisher.clone());
    (ctx, publisher)
}

pub fn printer(config: &BridgeConfig) -> MoonrakerClient {
    MoonrakerClient::new(&config.printer).unwrap()
}

/// Test-side end of a scripted control-plane connection.
pub struct PeerLink {
    /// Frames written by the bridge.
    pub from_bridge: mpsc::Receiver<String>,
    /// Frames delivered to the bridge. Dropping it closes the connection.
    pub to_bridge: mpsc::Sender<String>,
}

/// Hands out pre-queued links in order, then refuses connections.
#[derive(Default)]
pub struct ScriptedConnector {
    links: Mutex<VecDeque<ControlPlaneLink>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn push_link(&self) -> PeerLink {
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        self.links
            .lock()
            .unwrap()
            .push_back(ControlPlaneLink::new(outbound_tx, inbound_rx));
        PeerLink {
            from_bridge: outbound_rx,
            to_bridge: inbound_tx,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlPlaneConnector for ScriptedConnector {
    async fn connect(&self) -> Result<ControlPlaneLink, BridgeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BridgeError::ControlPlane("connection refused".to_string()))
    }
}

/// A JSON-RPC reply carrying a `result.status` object.
pub fn status_frame(webhooks_state: &str, print_state: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "eventtime": 1234.5,
            "status": {
                "webhooks": {"state": webhooks_state, "state_message": "Printer is ready"},
                "print_stats": {"state": print_state, "filename": ""}
            }
        }
    })
    .to_string()
}
