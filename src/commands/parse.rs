use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{info, warn};

use fieldcite::config::RuntimeSettings;
use fieldcite::runtime::{
    CircuitBreaker, DocumentParser, ParseSlots, PdfResourceLock, PlainTextExtractor,
};
use fieldcite::tasks::{CancelContext, TaskKind, TaskOutcome, run_parse_task};
use fieldcite::util::write_json_pretty;

use super::{build_runtime, open_store};
use crate::cli::ParseArgs;

pub fn run(args: ParseArgs) -> Result<()> {
    let bytes = fs::read(&args.input)
        .with_context(|| format!("failed to read input document: {}", args.input.display()))?;
    let filename = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let settings = RuntimeSettings::from_env();
    let store = open_store(&args.db_path)?;
    let task = store.create(TaskKind::ParseDocument, json!({ "filename": filename }))?;

    // No structure worker ships with the CLI, so parsing always takes the text path.
    let parser = Arc::new(DocumentParser::new(
        Arc::new(PlainTextExtractor),
        Arc::new(CircuitBreaker::new(settings.worker_mode)),
        Arc::new(PdfResourceLock::new()),
    ));
    let slots = ParseSlots::new(settings.parse_max_concurrency);
    let ctx = CancelContext::new(task.id.clone(), store);

    let runtime = build_runtime()?;
    let outcome = runtime.block_on(run_parse_task(&ctx, &slots, parser, &filename, bytes))?;

    match outcome {
        TaskOutcome::Completed(parsed) => {
            write_json_pretty(&args.output, &parsed.artifact)?;
            info!(
                task_id = %task.id,
                doc_version_id = %parsed.artifact.doc_version_id,
                blocks = parsed.artifact.blocks.len(),
                path = %args.output.display(),
                "wrote document artifact"
            );
            Ok(())
        }
        TaskOutcome::Canceled => {
            warn!(task_id = %task.id, "parse task canceled");
            Ok(())
        }
        TaskOutcome::Failed(message) => bail!("parse task {} failed: {message}", task.id),
    }
}
