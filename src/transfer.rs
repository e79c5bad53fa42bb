// src/transfer.rs - Staging files on the printer: rename, download, multipart upload
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::time::Instant;

use crate::config::TransferConfig;
use crate::error::BridgeError;
use crate::matcher::{StagedFile, staged_name};
use crate::messages::{JobRequest, TransferProgress};
use crate::printer_api::{MoonrakerClient, ensure_success};

pub const BOUNDARY_LEN: usize = 16;
/// Upper bound on the buffer reserved from an advertised `content-length`.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;
const CRLF: &[u8] = b"\r\n";

/// `floor(downloaded / total * 100)`, capped at 100. Unknown totals report 0.
pub fn progress_percent(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    (downloaded.saturating_mul(100) / total).min(100) as u8
}

/// Rate limiter for progress events: emits when either the interval has
/// elapsed or progress advanced by at least `step` points since the last emission.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    step: u8,
    last_emit: Instant,
    last_progress: u8,
}

impl ProgressThrottle {
    pub fn new(interval: Duration, step: u8, now: Instant) -> Self {
        Self {
            interval,
            step,
            last_emit: now,
            last_progress: 0,
        }
    }

    pub fn observe(&mut self, progress: u8, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_emit) >= self.interval;
        let advanced = progress.saturating_sub(self.last_progress) >= self.step;
        if elapsed || advanced {
            self.last_emit = now;
            self.last_progress = progress;
            true
        } else {
            false
        }
    }

    pub fn last_progress(&self) -> u8 {
        self.last_progress
    }
}

/// Buffer size to reserve for a download. The advertised length is untrusted.
pub fn initial_capacity(advertised: u64) -> usize {
    usize::try_from(advertised.min(MAX_PREALLOC)).unwrap_or(0)
}

pub fn random_boundary() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect()
}

pub fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={}", boundary)
}

/// Upload body: `path`, `filename` and `print` fields followed by the file part.
pub fn encode_upload_body(boundary: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let delimiter = format!("--{}", boundary);
    let mut lines: Vec<Vec<u8>> = Vec::with_capacity(20);

    for (name, value) in [("path", ""), ("filename", filename), ("print", "true")] {
        lines.push(delimiter.clone().into_bytes());
        lines.push(format!("Content-Disposition: form-data; name=\"{}\"", name).into_bytes());
        lines.push(Vec::new());
        lines.push(value.as_bytes().to_vec());
    }

    lines.push(delimiter.into_bytes());
    lines.push(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{}\"", filename).into_bytes(),
    );
    lines.push(b"Content-Type: application/octet-stream".to_vec());
    lines.push(Vec::new());
    lines.push(content.to_vec());
    lines.push(format!("--{}--", boundary).into_bytes());

    lines.join(CRLF)
}

#[derive(Debug, Clone)]
pub struct TransferEngine {
    printer: MoonrakerClient,
    settings: TransferConfig,
}

impl TransferEngine {
    pub fn new(printer: MoonrakerClient, settings: TransferConfig) -> Self {
        Self { printer, settings }
    }

    /// Renames a staged file for this job and starts printing it. Returns the new name.
    pub async fn rename_and_print(&self, staged: &StagedFile, request: &JobRequest) -> Result<String, BridgeError> {
        let new_name = staged_name(&staged.prefix, &request.job_uuid, &request.file_key);
        tracing::info!(job = %request.job_uuid, "Matched staged file: {} -> {}", staged.filename, new_name);
        self.printer.move_file(&staged.filename, &new_name).await?;
        self.printer.start_print(&new_name).await?;
        Ok(new_name)
    }

    /// Streams `request.file_url` into memory, reporting throttled progress.
    pub async fn download<F, Fut>(&self, request: &JobRequest, mut on_progress: F) -> Result<Vec<u8>, BridgeError>
    where
        F: FnMut(TransferProgress) -> Fut,
        Fut: Future<Output = ()>,
    {
        let response = self.printer.http().get(&request.file_url).send().await?;
        let mut response = ensure_success(response).await?;

        let total = response.content_length().unwrap_or(0);
        let chunk_size = self.settings.chunk_size.max(1);
        let mut content = Vec::with_capacity(initial_capacity(total));
        let mut throttle = ProgressThrottle::new(
            self.settings.progress_interval(),
            self.settings.progress_step,
            Instant::now(),
        );

        tracing::info!(job = %request.job_uuid, "Downloading {} ({} bytes)", request.file_url, total);

        while let Some(received) = response.chunk().await? {
            for piece in received.chunks(chunk_size) {
                content.extend_from_slice(piece);
                let downloaded = content.len() as u64;
                let progress = progress_percent(downloaded, total);
                if throttle.observe(progress, Instant::now()) {
                    on_progress(TransferProgress {
                        progress,
                        uploaded_bytes: downloaded,
                        total_bytes: total,
                        file_name: request.file_name.clone(),
                        job_uuid: request.job_uuid.clone(),
                    })
                    .await;
                }
            }
        }

        tracing::info!(job = %request.job_uuid, "Download finished: {} bytes", content.len());
        Ok(content)
    }

    /// Uploads `content` as `new_name` with printing requested on arrival.
    pub async fn upload(&self, new_name: &str, content: &[u8]) -> Result<(), BridgeError> {
        let boundary = random_boundary();
        let body = encode_upload_body(&boundary, new_name, content);
        tracing::info!("Uploading {} ({} bytes)", new_name, content.len());
        self.printer.upload(&multipart_content_type(&boundary), body).await
    }
}
