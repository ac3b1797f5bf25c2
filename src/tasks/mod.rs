pub mod cancel;
pub mod evaluation;
pub mod runner;
pub mod status;
pub mod store;

pub use cancel::CancelContext;
pub use evaluation::{EvaluationMetrics, GroundTruthLabel, evaluate};
pub use runner::{
    ExtractionJob, ExtractionOutcome, RunStatus, TaskOutcome, run_evaluation_task,
    run_extraction_task, run_parse_task, spawn_evaluation_task, spawn_extraction_task,
    spawn_parse_task,
};
pub use status::{TaskStatus, resolve};
pub use store::{MemoryTaskStore, SqliteTaskStore, Task, TaskKind, TaskStore, TaskUpdate};
