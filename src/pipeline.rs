// src/pipeline.rs - Job intake: validate, match, stage, start, report
use serde_json::Value;
use std::fmt;

use crate::error::BridgeError;
use crate::matcher::{self, StagedFile, staged_name};
use crate::messages::{JobRequest, JobState, JobStatusEvent};
use crate::printer_api::MoonrakerClient;
use crate::pubsub::BridgeContext;
use crate::transfer::TransferEngine;

/// Per-job progression. `Printing` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Matching,
    Renaming,
    Downloading,
    Uploading,
    PrintStartCheck,
    Printing,
    Error,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Printing | JobStage::Error)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Received => "received",
            JobStage::Matching => "matching",
            JobStage::Renaming => "renaming",
            JobStage::Downloading => "downloading",
            JobStage::Uploading => "uploading",
            JobStage::PrintStartCheck => "print-start-check",
            JobStage::Printing => "printing",
            JobStage::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub struct JobPipeline {
    ctx: BridgeContext,
    printer: MoonrakerClient,
    transfer: TransferEngine,
}

impl JobPipeline {
    pub fn new(ctx: BridgeContext, printer: MoonrakerClient) -> Self {
        let transfer = TransferEngine::new(printer.clone(), ctx.config().transfer.clone());
        Self { ctx, printer, transfer }
    }

    /// Runs one `print.new` request to completion. Exactly one terminal
    /// status is published, and returned.
    pub async fn run(&self, params: &Value) -> JobStatusEvent {
        let request = match JobRequest::from_params(params) {
            Ok(request) => request,
            Err(e) => {
                let event = JobStatusEvent::error(
                    JobRequest::job_uuid_hint(params),
                    format!("Failed to process print job: {}", e),
                );
                return self.finish(event).await;
            }
        };
        trace_stage(&request, JobStage::Received);
        tracing::info!(job = %request.job_uuid, "Print job for {} (fileKey {})", request.file_name, request.file_key);

        trace_stage(&request, JobStage::Matching);
        let files = match self.printer.list_gcode_files().await {
            Ok(files) => files,
            Err(e) => {
                let event = JobStatusEvent::error(
                    Some(request.job_uuid.clone()),
                    format!("Failed to process print job: {}", e),
                );
                return self.finish(event).await;
            }
        };
        tracing::debug!(job = %request.job_uuid, "Printer lists {} files", files.len());

        let event = match matcher::find_staged(&files, &request.file_key) {
            Some(staged) => self.print_existing(&request, &staged).await,
            None => {
                tracing::info!(job = %request.job_uuid, "No staged file found, downloading");
                self.print_new(&request).await
            }
        };
        self.finish(event).await
    }

    async fn print_existing(&self, request: &JobRequest, staged: &StagedFile) -> JobStatusEvent {
        trace_stage(request, JobStage::Renaming);
        match self.transfer.rename_and_print(staged, request).await {
            Ok(new_name) => JobStatusEvent::printing(
                &request.job_uuid,
                format!("File renamed and print started: {}", new_name),
            ),
            Err(e) => JobStatusEvent::error(
                Some(request.job_uuid.clone()),
                format!("Failed to handle existing file: {}", e),
            ),
        }
    }

    async fn print_new(&self, request: &JobRequest) -> JobStatusEvent {
        match self.stage_and_check(request).await {
            Ok((new_name, state)) if state == "printing" => {
                JobStatusEvent::printing(&request.job_uuid, format!("File {} is printing", new_name))
            }
            Ok((_, state)) => JobStatusEvent::error(
                Some(request.job_uuid.clone()),
                format!("File uploaded but print not started, current state: {}", state),
            ),
            Err(e) => JobStatusEvent::error(
                Some(request.job_uuid.clone()),
                format!("Failed to handle new file: {}", e),
            ),
        }
    }

    /// Download, upload and read back the print state.
    async fn stage_and_check(&self, request: &JobRequest) -> Result<(String, String), BridgeError> {
        let new_name = staged_name(&request.file_name, &request.job_uuid, &request.file_key);

        trace_stage(request, JobStage::Downloading);
        let ctx = &self.ctx;
        let content = self
            .transfer
            .download(request, |progress| async move { ctx.publish_progress(&progress).await })
            .await?;

        trace_stage(request, JobStage::Uploading);
        self.transfer.upload(&new_name, &content).await?;

        trace_stage(request, JobStage::PrintStartCheck);
        let state = self.printer.query_print_state().await?;
        Ok((new_name, state))
    }

    async fn finish(&self, event: JobStatusEvent) -> JobStatusEvent {
        let stage = match event.state {
            JobState::Printing => JobStage::Printing,
            JobState::Error => JobStage::Error,
        };
        let job = event.job_uuid.as_deref().unwrap_or("-");
        match event.state {
            JobState::Printing => tracing::info!(job = %job, stage = %stage, "{}", event.message),
            JobState::Error => tracing::error!(job = %job, stage = %stage, "{}", event.message),
        }
        self.ctx.publish_job_status(&event).await;
        event
    }
}

fn trace_stage(request: &JobRequest, stage: JobStage) {
    tracing::debug!(job = %request.job_uuid, stage = %stage, "Job stage");
}
