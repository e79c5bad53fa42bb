// src/control_plane.rs - Persistent connection to the printer's management service
use async_trait::async_trait;
use async_tungstenite::tungstenite::Message;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::BridgeError;

const OUTBOUND_BUFFER: usize = 32;
const INBOUND_BUFFER: usize = 256;

/// One live connection, seen as a pair of text-frame channels.
///
/// The inbound receiver yields `None` once the peer closes. Background tasks
/// registered with [`ControlPlaneLink::with_tasks`] are aborted when the
/// link's guard is dropped.
pub struct ControlPlaneLink {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
    guard: LinkGuard,
}

impl ControlPlaneLink {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            outbound,
            inbound,
            guard: LinkGuard { tasks: Vec::new() },
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<JoinHandle<()>>) -> Self {
        self.guard.tasks.extend(tasks);
        self
    }

    pub fn into_parts(self) -> (mpsc::Sender<String>, mpsc::Receiver<String>, LinkGuard) {
        (self.outbound, self.inbound, self.guard)
    }
}

/// Owns the I/O tasks of a link.
pub struct LinkGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
pub trait ControlPlaneConnector: Send + Sync {
    async fn connect(&self) -> Result<ControlPlaneLink, BridgeError>;
}

/// JSON-RPC `printer.objects.query` for the objects the synchronizer mirrors.
pub fn status_query(id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "printer.objects.query",
        "params": {
            "objects": {
                "webhooks": null,
                "print_stats": ["state", "filename"]
            }
        },
        "id": id
    })
}

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ControlPlaneConnector for WebSocketConnector {
    async fn connect(&self) -> Result<ControlPlaneLink, BridgeError> {
        tracing::info!("Connecting to control plane at {}", self.url);
        let (socket, _) = async_tungstenite::tokio::connect_async(self.url.as_str())
            .await
            .map_err(|e| BridgeError::ControlPlane(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                tracing::trace!("Control plane TX: {}", frame);
                if let Err(e) = sink.send(Message::text(frame)).await {
                    tracing::warn!("Control plane write error: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Control plane closed by remote");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Control plane read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(ControlPlaneLink::new(outbound_tx, inbound_rx).with_tasks(vec![writer, reader]))
    }
}
