// src/error.rs - Error taxonomy shared by the job pipeline and the status synchronizer
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("missing required parameters: {0}")]
    MissingParams(String),
    #[error("printer API returned status {status}: {message}")]
    PrinterApi { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("control plane error: {0}")]
    ControlPlane(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
