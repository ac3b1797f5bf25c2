use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use fieldcite::model::{ExtractionMode, Field, FieldType, QualityProfile};
use fieldcite::tasks::TaskStatus;

#[derive(Parser, Debug)]
#[command(
    name = "fieldcite",
    version,
    about = "Evidence retrieval and cited field extraction over parsed documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Retrieve(RetrieveArgs),
    Extract(ExtractArgs),
    Parse(ParseArgs),
    Evaluate(EvaluateArgs),
    Task(TaskArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FieldTypeArg {
    Text,
    Date,
    Number,
    Boolean,
    List,
}

impl From<FieldTypeArg> for FieldType {
    fn from(value: FieldTypeArg) -> Self {
        match value {
            FieldTypeArg::Text => Self::Text,
            FieldTypeArg::Date => Self::Date,
            FieldTypeArg::Number => Self::Number,
            FieldTypeArg::Boolean => Self::Boolean,
            FieldTypeArg::List => Self::List,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Deterministic,
    Hybrid,
    LlmReasoning,
}

impl From<ModeArg> for ExtractionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Deterministic => Self::Deterministic,
            ModeArg::Hybrid => Self::Hybrid,
            ModeArg::LlmReasoning => Self::LlmReasoning,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProfileArg {
    High,
    Balanced,
    Fast,
}

impl From<ProfileArg> for QualityProfile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::High => Self::High,
            ProfileArg::Balanced => Self::Balanced,
            ProfileArg::Fast => Self::Fast,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl From<StatusArg> for TaskStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Queued => Self::Queued,
            StatusArg::Running => Self::Running,
            StatusArg::Succeeded => Self::Succeeded,
            StatusArg::Failed => Self::Failed,
            StatusArg::Canceled => Self::Canceled,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct FieldArgs {
    #[arg(long = "field-key")]
    pub key: String,

    #[arg(long = "field-name")]
    pub name: Option<String>,

    #[arg(long = "field-type", value_enum, default_value_t = FieldTypeArg::Text)]
    pub field_type: FieldTypeArg,

    #[arg(long, default_value = "")]
    pub prompt: String,
}

impl FieldArgs {
    pub fn to_field(&self) -> Field {
        Field {
            key: self.key.clone(),
            name: self.name.clone().unwrap_or_else(|| self.key.replace('_', " ")),
            field_type: self.field_type.into(),
            prompt: self.prompt.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RetrieveArgs {
    #[arg(long)]
    pub artifact: PathBuf,

    #[command(flatten)]
    pub field: FieldArgs,

    #[arg(long, value_enum, default_value_t = ProfileArg::High)]
    pub profile: ProfileArg,

    #[arg(long)]
    pub top_k: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long = "artifact", required = true)]
    pub artifacts: Vec<PathBuf>,

    #[arg(long)]
    pub fields: PathBuf,

    #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
    pub mode: ModeArg,

    #[arg(long, value_enum, default_value_t = ProfileArg::High)]
    pub profile: ProfileArg,

    #[arg(long, default_value = ".cache/fieldcite/tasks.sqlite")]
    pub db_path: PathBuf,

    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value = ".cache/fieldcite/tasks.sqlite")]
    pub db_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long)]
    pub labels: PathBuf,

    #[arg(long)]
    pub extractions: PathBuf,

    #[arg(long, default_value = ".cache/fieldcite/tasks.sqlite")]
    pub db_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    #[arg(long, default_value = ".cache/fieldcite/tasks.sqlite")]
    pub db_path: PathBuf,

    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommands {
    Show {
        task_id: String,
    },
    Cancel {
        task_id: String,

        #[arg(long)]
        reason: Option<String>,
    },
    List {
        #[arg(long = "status", value_enum)]
        statuses: Vec<StatusArg>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}
