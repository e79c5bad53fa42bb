//! Wire types exchanged over the pub/sub channel.
//!
//! Every outbound payload is an [`Envelope`] `{method, params, printerUUID?}`
//! serialized as UTF-8 JSON. Inbound payloads decode into [`InboundEnvelope`]
//! and are classified into a closed [`Command`] set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::BridgeError;

/// Request parameter keys as sent by the remote monitor.
pub const PARAM_FILE_KEY: &str = "fileKey";
pub const PARAM_FILE_URL: &str = "fileUrl";
pub const PARAM_FILE_NAME: &str = "fileName";
pub const PARAM_JOB_UUID: &str = "printjobuuid";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<P> {
    pub method: String,
    pub params: P,
    #[serde(rename = "printerUUID", default, skip_serializing_if = "Option::is_none")]
    pub printer_uuid: Option<String>,
}

impl<P> Envelope<P> {
    pub fn new(method: OutboundMethod, params: P) -> Self {
        Self {
            method: method.as_str().to_string(),
            params,
            printer_uuid: None,
        }
    }

    pub fn for_printer(method: OutboundMethod, params: P, printer_uuid: &str) -> Self {
        Self {
            method: method.as_str().to_string(),
            params,
            printer_uuid: Some(printer_uuid.to_string()),
        }
    }
}

/// Methods this bridge emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMethod {
    WebcamSnapshot,
    PrintProgress,
    PrintStatus,
    PrinterStatus,
}

impl OutboundMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboundMethod::WebcamSnapshot => "webcam.snapshot",
            OutboundMethod::PrintProgress => "print.progress",
            OutboundMethod::PrintStatus => "print.status",
            OutboundMethod::PrinterStatus => "printer.status",
        }
    }
}

/// Raw inbound envelope. Missing fields decode to empty values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Commands recognized on the request topic.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PrintNew(Value),
    WebcamSnapshot,
    /// Device state is mirrored by the status synchronizer, never by request.
    PrinterStatus,
    Unknown(String),
}

impl Command {
    /// Decodes a UTF-8 JSON payload and classifies it by method name.
    pub fn decode(payload: &[u8]) -> Result<Self, BridgeError> {
        let envelope: InboundEnvelope = serde_json::from_slice(payload)?;
        Ok(Self::from_envelope(envelope))
    }

    pub fn from_envelope(envelope: InboundEnvelope) -> Self {
        match envelope.method.as_str() {
            "print.new" => Command::PrintNew(envelope.params),
            "webcam.snapshot" => Command::WebcamSnapshot,
            "printer.status" => Command::PrinterStatus,
            _ => Command::Unknown(envelope.method),
        }
    }

    pub fn method(&self) -> &str {
        match self {
            Command::PrintNew(_) => "print.new",
            Command::WebcamSnapshot => "webcam.snapshot",
            Command::PrinterStatus => "printer.status",
            Command::Unknown(method) => method,
        }
    }
}

/// A validated print request. All four fields are present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub file_key: String,
    pub file_url: String,
    pub file_name: String,
    pub job_uuid: String,
}

impl JobRequest {
    pub fn from_params(params: &Value) -> Result<Self, BridgeError> {
        let file_key = string_param(params, PARAM_FILE_KEY);
        let file_url = string_param(params, PARAM_FILE_URL);
        let file_name = string_param(params, PARAM_FILE_NAME);
        let job_uuid = string_param(params, PARAM_JOB_UUID);

        match (file_key, file_url, file_name, job_uuid) {
            (Some(file_key), Some(file_url), Some(file_name), Some(job_uuid)) => Ok(Self {
                file_key,
                file_url,
                file_name,
                job_uuid,
            }),
            _ => {
                let missing: Vec<&str> = [PARAM_FILE_KEY, PARAM_FILE_URL, PARAM_FILE_NAME, PARAM_JOB_UUID]
                    .into_iter()
                    .filter(|key| string_param(params, key).is_none())
                    .collect();
                Err(BridgeError::MissingParams(missing.join(", ")))
            }
        }
    }

    /// Best-effort job id for reporting a request that failed validation.
    pub fn job_uuid_hint(params: &Value) -> Option<String> {
        string_param(params, PARAM_JOB_UUID)
    }
}

fn string_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Printing,
    Error,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Printing => write!(f, "printing"),
            JobState::Error => write!(f, "error"),
        }
    }
}

/// Terminal job status. There is no `printer_id` field: the printer id is the
/// instance name, carried as `printerUUID` on the wrapping [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_uuid: Option<String>,
    pub state: JobState,
    pub message: String,
}

impl JobStatusEvent {
    pub fn printing(job_uuid: &str, message: impl Into<String>) -> Self {
        Self {
            job_uuid: Some(job_uuid.to_string()),
            state: JobState::Printing,
            message: message.into(),
        }
    }

    pub fn error(job_uuid: Option<String>, message: impl Into<String>) -> Self {
        Self {
            job_uuid,
            state: JobState::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub progress: u8,
    #[serde(rename = "uploaded")]
    pub uploaded_bytes: u64,
    #[serde(rename = "total")]
    pub total_bytes: u64,
    pub file_name: String,
    pub job_uuid: String,
}

/// Parameters of a `webcam.snapshot` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}
