use anyhow::{Result, bail};
use serde_json::json;
use tracing::info;

use fieldcite::tasks::{
    CancelContext, ExtractionOutcome, GroundTruthLabel, TaskKind, TaskOutcome,
    run_evaluation_task,
};
use fieldcite::util::read_json;

use super::{build_runtime, open_store, write_json_stdout};
use crate::cli::EvaluateArgs;

pub fn run(args: EvaluateArgs) -> Result<()> {
    let labels: Vec<GroundTruthLabel> = read_json(&args.labels)?;
    let extracted: ExtractionOutcome = read_json(&args.extractions)?;

    let store = open_store(&args.db_path)?;
    let task = store.create(
        TaskKind::EvaluationRun,
        json!({
            "labels": labels.len(),
            "extractions": extracted.extractions.len(),
        }),
    )?;
    let ctx = CancelContext::new(task.id.clone(), store);

    let runtime = build_runtime()?;
    let outcome =
        runtime.block_on(run_evaluation_task(&ctx, &labels, &extracted.extractions))?;

    match outcome {
        TaskOutcome::Completed(metrics) => {
            info!(
                task_id = %task.id,
                matched = metrics.matched_labels,
                total = metrics.total_labels,
                f1 = metrics.f1,
                "evaluation finished"
            );
            write_json_stdout(&metrics)
        }
        TaskOutcome::Canceled => bail!("evaluation task {} was canceled", task.id),
        TaskOutcome::Failed(message) => bail!("evaluation task {} failed: {message}", task.id),
    }
}
