use anyhow::{Result, bail};
use tracing::info;

use fieldcite::tasks::TaskStatus;

use super::{open_store, write_json_stdout};
use crate::cli::{TaskArgs, TaskCommands};

pub fn run(args: TaskArgs) -> Result<()> {
    let store = open_store(&args.db_path)?;

    match args.command {
        TaskCommands::Show { task_id } => {
            let Some(task) = store.get(&task_id)? else {
                bail!("task not found: {task_id}");
            };
            write_json_stdout(&task)
        }
        TaskCommands::Cancel { task_id, reason } => {
            let Some(task) = store.cancel(&task_id, reason.as_deref())? else {
                bail!("task not found: {task_id}");
            };
            info!(task_id = %task.id, status = task.status.as_str(), "cancel requested");
            write_json_stdout(&task)
        }
        TaskCommands::List { statuses, limit } => {
            let statuses = statuses
                .into_iter()
                .map(TaskStatus::from)
                .collect::<Vec<_>>();
            let filter = (!statuses.is_empty()).then_some(statuses.as_slice());
            let tasks = store.list(filter, limit)?;
            info!(returned = tasks.len(), "tasks listed");
            write_json_stdout(&tasks)
        }
    }
}
