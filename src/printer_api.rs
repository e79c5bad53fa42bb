// src/printer_api.rs - HTTP client for the local print-control API
use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::PrinterApiConfig;
use crate::error::BridgeError;

/// Root of the printer's gcode file store.
pub const GCODE_ROOT: &str = "gcodes";

/// A file as listed by the printer's directory endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFileDescriptor {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    result: DirectoryResult,
}

#[derive(Debug, Default, Deserialize)]
struct DirectoryResult {
    #[serde(default)]
    files: Vec<RemoteFileDescriptor>,
}

#[derive(Debug, Clone)]
pub struct MoonrakerClient {
    client: Client,
    base_url: String,
}

impl MoonrakerClient {
    pub fn new(config: &PrinterApiConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(client, &config.api_url))
    }

    /// Create a client around an existing `reqwest::Client` (useful for testing).
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Still image from the camera endpoint.
    pub async fn webcam_snapshot(&self) -> Result<Vec<u8>, BridgeError> {
        let timestamp = chrono::Utc::now().timestamp();
        let response = self
            .client
            .get(self.url("/webcam/snapshot"))
            .query(&[("timestamp", timestamp)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn list_gcode_files(&self) -> Result<Vec<RemoteFileDescriptor>, BridgeError> {
        let response = self
            .client
            .get(self.url("/server/files/directory"))
            .query(&[("path", GCODE_ROOT)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: DirectoryResponse = response.json().await?;
        Ok(body.result.files)
    }

    pub async fn move_file(&self, source: &str, dest: &str) -> Result<(), BridgeError> {
        let body = json!({
            "source": gcode_path(source),
            "dest": gcode_path(dest),
        });
        let response = self
            .client
            .post(self.url("/server/files/move"))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn start_print(&self, filename: &str) -> Result<(), BridgeError> {
        let body = json!({ "filename": gcode_path(filename) });
        let response = self
            .client
            .post(self.url("/printer/print/start"))
            .json(&body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Posts a pre-encoded multipart body to the upload endpoint.
    pub async fn upload(&self, content_type: &str, body: Vec<u8>) -> Result<(), BridgeError> {
        let response = self
            .client
            .post(self.url("/server/files/upload"))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Current `print_stats.state`, or `"error"` when the printer omits it.
    pub async fn query_print_state(&self) -> Result<String, BridgeError> {
        let response = self
            .client
            .get(self.url("/printer/objects/query?print_stats"))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: Value = response.json().await?;
        Ok(body
            .pointer("/result/status/print_stats/state")
            .and_then(Value::as_str)
            .unwrap_or("error")
            .to_string())
    }
}

pub fn gcode_path(name: &str) -> String {
    format!("/{}/{}", GCODE_ROOT, name)
}

/// Turns non-2xx responses into [`BridgeError::PrinterApi`].
pub async fn ensure_success(response: Response) -> Result<Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(BridgeError::PrinterApi {
        status: status.as_u16(),
        message,
    })
}
