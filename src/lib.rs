// src/lib.rs - Print-job bridge between an MQTT broker and a Moonraker-style printer API
pub mod config;
pub mod control_plane;
pub mod error;
pub mod matcher;
pub mod messages;
pub mod mqtt;
pub mod pipeline;
pub mod printer_api;
pub mod pubsub;
pub mod router;
pub mod status_sync;
pub mod topics;
pub mod transfer;

pub use crate::config::{BridgeConfig, ConfigError, load_config};
pub use crate::error::BridgeError;
pub use crate::pipeline::JobPipeline;
pub use crate::printer_api::MoonrakerClient;
pub use crate::pubsub::{BridgeContext, InboundMessage, Publisher};
pub use crate::router::Router;
pub use crate::status_sync::{FixedBackoff, StatusSynchronizer};
