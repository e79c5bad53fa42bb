// src/router.rs - Inbound command dispatch
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::messages::{Command, SnapshotReply};
use crate::pipeline::JobPipeline;
use crate::printer_api::MoonrakerClient;
use crate::pubsub::{BridgeContext, InboundMessage};
use crate::topics::Topic;

#[derive(Clone)]
pub struct Router {
    ctx: BridgeContext,
    printer: MoonrakerClient,
    pipeline: JobPipeline,
}

impl Router {
    pub fn new(ctx: BridgeContext, printer: MoonrakerClient) -> Self {
        let pipeline = JobPipeline::new(ctx.clone(), printer.clone());
        Self { ctx, printer, pipeline }
    }

    /// Decodes one payload and runs its handler to completion.
    pub async fn dispatch(&self, payload: &[u8]) {
        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!("Failed to decode inbound message: {}", e);
                return;
            }
        };
        tracing::debug!(method = command.method(), "Dispatching command");

        match command {
            Command::PrintNew(params) => {
                let event = self.pipeline.run(&params).await;
                tracing::info!(
                    job = event.job_uuid.as_deref().unwrap_or("-"),
                    "print.new finished with state {}",
                    event.state
                );
            }
            Command::WebcamSnapshot => self.reply_snapshot().await,
            Command::PrinterStatus => {}
            Command::Unknown(method) => tracing::warn!("Unknown method: {}", method),
        }
    }

    async fn reply_snapshot(&self) {
        let reply = match self.printer.webcam_snapshot().await {
            Ok(image) => SnapshotReply {
                status: "success".to_string(),
                value: Some(STANDARD.encode(image)),
            },
            Err(e) => {
                tracing::error!("Webcam snapshot failed: {}", e);
                SnapshotReply {
                    status: e.to_string(),
                    value: None,
                }
            }
        };
        self.ctx.publish_snapshot_reply(&reply).await;
    }

    /// Dispatches every inbound command on its own task until shutdown.
    /// Handlers still running at shutdown are aborted.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>, mut shutdown: broadcast::Receiver<()>) {
        let command_topic = Topic::Command.resolve(self.ctx.instance());
        let mut handlers = JoinSet::new();
        tracing::info!("Router listening on {}", command_topic);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Router received shutdown signal");
                    break;
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        tracing::warn!("Inbound channel closed");
                        break;
                    };
                    if message.topic != command_topic {
                        tracing::debug!(topic = %message.topic, "Ignoring message on unexpected topic");
                        continue;
                    }
                    let router = self.clone();
                    handlers.spawn(async move { router.dispatch(&message.payload).await });
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Command handler panicked: {}", e);
                    }
                }
            }
        }

        if !handlers.is_empty() {
            tracing::info!("Aborting {} in-flight command handlers", handlers.len());
        }
        handlers.shutdown().await;
    }
}
