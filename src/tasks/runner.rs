use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::StoreResult;
use crate::extraction::Orchestrator;
use crate::model::{DocumentArtifact, ExtractionMode, Field, FieldExtraction, QualityProfile};
use crate::runtime::parser::{DocumentParser, ParsedDocument, parse_blocking};
use crate::runtime::slots::ParseSlots;
use crate::tasks::cancel::CancelContext;
use crate::tasks::evaluation::{EvaluationMetrics, GroundTruthLabel, evaluate_until};
use crate::tasks::status::TaskStatus;
use crate::tasks::store::{DEFAULT_CANCEL_REASON, TaskStore, TaskUpdate};
use crate::util::round_places;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
    Canceled,
}

impl RunStatus {
    fn from_counts(completed: usize, failed: usize) -> Self {
        match (completed, failed) {
            (_, 0) => Self::Completed,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub documents: Vec<DocumentArtifact>,
    pub fields: Vec<Field>,
    pub mode: ExtractionMode,
    pub profile: QualityProfile,
}

impl ExtractionJob {
    pub fn total_cells(&self) -> usize {
        self.documents.len() * self.fields.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub status: RunStatus,
    pub total_cells: usize,
    pub completed_cells: usize,
    pub failed_cells: usize,
    pub extractions: Vec<FieldExtraction>,
}

impl ExtractionOutcome {
    fn summary(&self) -> Value {
        json!({
            "status": self.status,
            "total_cells": self.total_cells,
            "completed_cells": self.completed_cells,
            "failed_cells": self.failed_cells,
        })
    }

    fn processed(&self) -> u64 {
        (self.completed_cells + self.failed_cells) as u64
    }
}

#[derive(Debug, Clone)]
pub enum TaskOutcome<T> {
    Completed(T),
    Canceled,
    Failed(String),
}

impl<T> TaskOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}

fn record_canceled(
    ctx: &CancelContext,
    progress: Option<(u64, u64)>,
    payload: Option<Value>,
) -> StoreResult<()> {
    let mut update = TaskUpdate::status(TaskStatus::Canceled).error(DEFAULT_CANCEL_REASON);
    if let Some((current, total)) = progress {
        update = update.progress(current, total);
    }
    if let Some(payload) = payload {
        update = update.payload(payload);
    }
    ctx.store().update(ctx.task_id(), update)?;
    info!(task_id = %ctx.task_id(), "task_canceled");
    Ok(())
}

pub async fn run_extraction_task(
    ctx: &CancelContext,
    orchestrator: &Orchestrator,
    job: &ExtractionJob,
) -> StoreResult<ExtractionOutcome> {
    let mut outcome = ExtractionOutcome {
        status: RunStatus::Canceled,
        total_cells: job.total_cells(),
        completed_cells: 0,
        failed_cells: 0,
        extractions: Vec::with_capacity(job.total_cells()),
    };
    let total = outcome.total_cells as u64;

    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, total)), Some(outcome.summary()))?;
        return Ok(outcome);
    }
    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Running).progress(0, total),
    )?;
    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, total)), Some(outcome.summary()))?;
        return Ok(outcome);
    }

    for document in &job.documents {
        for field in &job.fields {
            if ctx.is_canceled() {
                record_canceled(
                    ctx,
                    Some((outcome.processed(), total)),
                    Some(outcome.summary()),
                )?;
                return Ok(outcome);
            }

            let result = orchestrator
                .extract_field(field, document, job.mode, job.profile)
                .await;
            if result.fallback_reason.is_some() {
                outcome.failed_cells += 1;
            } else {
                outcome.completed_cells += 1;
            }
            outcome.extractions.push(FieldExtraction {
                document_version_id: document.doc_version_id.clone(),
                field_key: field.key.clone(),
                result,
            });

            ctx.store().update(
                ctx.task_id(),
                TaskUpdate::status(TaskStatus::Running).progress(outcome.processed(), total),
            )?;
        }
    }

    outcome.status = RunStatus::from_counts(outcome.completed_cells, outcome.failed_cells);
    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Succeeded)
            .progress(outcome.processed(), total)
            .payload(outcome.summary()),
    )?;
    info!(
        task_id = %ctx.task_id(),
        status = ?outcome.status,
        completed = outcome.completed_cells,
        failed = outcome.failed_cells,
        "extraction_task_finished"
    );
    Ok(outcome)
}

pub async fn run_evaluation_task(
    ctx: &CancelContext,
    labels: &[GroundTruthLabel],
    extractions: &[FieldExtraction],
) -> StoreResult<TaskOutcome<EvaluationMetrics>> {
    let total = labels.len() as u64;
    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, total)), None)?;
        return Ok(TaskOutcome::Canceled);
    }
    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Running).progress(0, total),
    )?;

    let mut scored = 0;
    let metrics = evaluate_until(labels, extractions, |done| {
        scored = done as u64;
        ctx.is_canceled()
    });
    let Some(metrics) = metrics else {
        record_canceled(ctx, Some((scored, total)), None)?;
        return Ok(TaskOutcome::Canceled);
    };

    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Succeeded)
            .progress(total, total)
            .payload(json!({ "metrics": metrics })),
    )?;
    info!(
        task_id = %ctx.task_id(),
        total_labels = metrics.total_labels,
        f1 = metrics.f1,
        "evaluation_task_finished"
    );
    Ok(TaskOutcome::Completed(metrics))
}

pub async fn run_parse_task(
    ctx: &CancelContext,
    slots: &ParseSlots,
    parser: Arc<DocumentParser>,
    filename: &str,
    bytes: Vec<u8>,
) -> StoreResult<TaskOutcome<ParsedDocument>> {
    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, 1)), None)?;
        return Ok(TaskOutcome::Canceled);
    }

    let slot = match slots.acquire().await {
        Ok(slot) => slot,
        Err(err) => return fail_parse(ctx, filename, 0.0, &err.to_string()),
    };
    let queue_wait_ms = round_places(slot.wait_ms, 2);
    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, 1)), None)?;
        return Ok(TaskOutcome::Canceled);
    }

    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Running)
            .progress(0, 1)
            .payload(json!({ "filename": filename, "queue_wait_ms": queue_wait_ms })),
    )?;
    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, 1)), None)?;
        return Ok(TaskOutcome::Canceled);
    }

    let parsed = parse_blocking(parser, bytes).await;
    drop(slot);

    if ctx.is_canceled() {
        record_canceled(ctx, Some((0, 1)), None)?;
        return Ok(TaskOutcome::Canceled);
    }

    let parsed = match parsed {
        Ok(parsed) => parsed,
        Err(err) => return fail_parse(ctx, filename, queue_wait_ms, &err.to_string()),
    };

    let mut payload = json!({
        "filename": filename,
        "document_version_id": parsed.artifact.doc_version_id,
        "parser": parsed.parser,
        "block_count": parsed.artifact.blocks.len(),
        "queue_wait_ms": queue_wait_ms,
        "pdf_docling_mode_effective": parsed.effective_mode,
    });
    if let Some(reason) = &parsed.disable_reason {
        payload["pdf_docling_disable_reason"] = json!(reason);
    }
    if let Some(worker_error) = &parsed.worker_error {
        payload["worker_error"] = json!(worker_error);
    }

    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Succeeded)
            .progress(1, 1)
            .payload(payload),
    )?;
    Ok(TaskOutcome::Completed(parsed))
}

fn fail_parse<T>(
    ctx: &CancelContext,
    filename: &str,
    queue_wait_ms: f64,
    message: &str,
) -> StoreResult<TaskOutcome<T>> {
    let message = format!("PARSER_ERROR: {message}");
    warn!(task_id = %ctx.task_id(), error = %message, "parse_task_failed");
    ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Failed)
            .error(message.clone())
            .payload(json!({ "filename": filename, "queue_wait_ms": queue_wait_ms })),
    )?;
    Ok(TaskOutcome::Failed(message))
}

fn mark_failed(ctx: &CancelContext, message: &str) {
    error!(task_id = %ctx.task_id(), error = %message, "task_failed");
    if let Err(err) = ctx.store().update(
        ctx.task_id(),
        TaskUpdate::status(TaskStatus::Failed).error(message),
    ) {
        error!(task_id = %ctx.task_id(), error = %err, "task_failure_not_recorded");
    }
}

pub fn spawn_extraction_task(
    ctx: CancelContext,
    orchestrator: Arc<Orchestrator>,
    job: ExtractionJob,
) -> JoinHandle<Option<ExtractionOutcome>> {
    tokio::spawn(async move {
        match run_extraction_task(&ctx, &orchestrator, &job).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                mark_failed(&ctx, &err.to_string());
                None
            }
        }
    })
}

pub fn spawn_evaluation_task(
    ctx: CancelContext,
    labels: Vec<GroundTruthLabel>,
    extractions: Vec<FieldExtraction>,
) -> JoinHandle<TaskOutcome<EvaluationMetrics>> {
    tokio::spawn(async move {
        match run_evaluation_task(&ctx, &labels, &extractions).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = err.to_string();
                mark_failed(&ctx, &message);
                TaskOutcome::Failed(message)
            }
        }
    })
}

pub fn spawn_parse_task(
    ctx: CancelContext,
    slots: ParseSlots,
    parser: Arc<DocumentParser>,
    filename: String,
    bytes: Vec<u8>,
) -> JoinHandle<TaskOutcome<ParsedDocument>> {
    tokio::spawn(async move {
        match run_parse_task(&ctx, &slots, parser, &filename, bytes).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let message = err.to_string();
                mark_failed(&ctx, &message);
                TaskOutcome::Failed(message)
            }
        }
    })
}
