use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{info, warn};

use fieldcite::config::RuntimeSettings;
use fieldcite::extraction::Orchestrator;
use fieldcite::model::{DocumentArtifact, Field};
use fieldcite::tasks::{CancelContext, ExtractionJob, TaskKind, spawn_extraction_task};
use fieldcite::util::{read_json, write_json_pretty};

use super::{build_runtime, open_store, write_json_stdout};
use crate::cli::ExtractArgs;

const INTERRUPT_REASON: &str = "Interrupted from the command line.";

pub fn run(args: ExtractArgs) -> Result<()> {
    let documents = args
        .artifacts
        .iter()
        .map(|path| read_json::<DocumentArtifact>(path))
        .collect::<Result<Vec<_>>>()?;
    let fields: Vec<Field> = read_json(&args.fields)?;
    if fields.is_empty() {
        bail!("no fields defined in {}", args.fields.display());
    }

    let job = ExtractionJob {
        documents,
        fields,
        mode: args.mode.into(),
        profile: args.profile.into(),
    };

    let store = open_store(&args.db_path)?;
    let task = store.create(
        TaskKind::ExtractionRun,
        json!({
            "documents": job.documents.iter().map(|doc| doc.doc_version_id.as_str()).collect::<Vec<_>>(),
            "fields": job.fields.iter().map(|field| field.key.as_str()).collect::<Vec<_>>(),
            "mode": job.mode,
            "profile": job.profile,
        }),
    )?;
    info!(
        task_id = %task.id,
        documents = job.documents.len(),
        fields = job.fields.len(),
        total_cells = job.total_cells(),
        "extraction task queued"
    );

    let orchestrator = Arc::new(Orchestrator::new(RuntimeSettings::from_env()));
    let ctx = CancelContext::new(task.id.clone(), Arc::clone(&store));
    let runtime = build_runtime()?;

    let outcome = runtime
        .block_on(async {
            let mut handle = spawn_extraction_task(ctx.clone(), orchestrator, job);
            tokio::select! {
                joined = &mut handle => joined,
                _ = tokio::signal::ctrl_c() => {
                    warn!(task_id = %ctx.task_id(), "interrupt received, canceling task");
                    if let Err(err) = ctx.cancel(Some(INTERRUPT_REASON)) {
                        warn!(task_id = %ctx.task_id(), error = %err, "failed to record cancellation");
                    }
                    handle.await
                }
            }
        })
        .context("extraction task aborted")?;

    let Some(outcome) = outcome else {
        bail!("extraction task {} failed; inspect it with `fieldcite task show`", task.id);
    };

    info!(
        task_id = %task.id,
        status = ?outcome.status,
        completed = outcome.completed_cells,
        failed = outcome.failed_cells,
        "extraction finished"
    );

    match &args.output {
        Some(path) => {
            write_json_pretty(path, &outcome)?;
            info!(path = %path.display(), "wrote extraction results");
            Ok(())
        }
        None => write_json_stdout(&outcome),
    }
}
