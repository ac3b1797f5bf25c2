pub mod evaluate;
pub mod extract;
pub mod parse;
pub mod retrieve;
pub mod task;

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use fieldcite::tasks::{SqliteTaskStore, TaskStore};
use fieldcite::util::ensure_directory;

fn open_store(db_path: &Path) -> Result<Arc<dyn TaskStore>> {
    if let Some(parent) = db_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        ensure_directory(parent)?;
    }
    let store = SqliteTaskStore::open(db_path)
        .with_context(|| format!("failed to open task store: {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn write_json_stdout<T: Serialize>(value: &T) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}
