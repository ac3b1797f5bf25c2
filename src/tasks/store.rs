use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::tasks::status::{TaskStatus, resolve};
use crate::util::{new_id, now_utc_string};

pub const DEFAULT_CANCEL_REASON: &str = "Canceled by user.";
const MAX_LIST_LIMIT: usize = 2_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    ParseDocument,
    ExtractionRun,
    EvaluationRun,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseDocument => "PARSE_DOCUMENT",
            Self::ExtractionRun => "EXTRACTION_RUN",
            Self::EvaluationRun => "EVALUATION_RUN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PARSE_DOCUMENT" => Some(Self::ParseDocument),
            "EXTRACTION_RUN" => Some(Self::ExtractionRun),
            "EVALUATION_RUN" => Some(Self::EvaluationRun),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress_current: u64,
    pub progress_total: u64,
    pub error_message: Option<String>,
    pub payload: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    pub error_message: Option<String>,
    pub payload: Option<Value>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(mut self, current: u64, total: u64) -> Self {
        self.progress_current = Some(current);
        self.progress_total = Some(total);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    fn apply(self, task: &mut Task) {
        let was_terminal = task.status.is_terminal();
        task.status = resolve(task.status, self.status.unwrap_or(task.status));
        if let Some(current) = self.progress_current {
            task.progress_current = current;
        }
        if let Some(total) = self.progress_total {
            task.progress_total = total;
        }
        if let Some(payload) = self.payload {
            task.payload = payload;
        }
        if !was_terminal {
            task.error_message = self.error_message;
        }
        task.updated_at = now_utc_string();
    }
}

pub trait TaskStore: Send + Sync {
    fn create(&self, kind: TaskKind, payload: Value) -> StoreResult<Task>;

    fn get(&self, task_id: &str) -> StoreResult<Option<Task>>;

    fn update(&self, task_id: &str, update: TaskUpdate) -> StoreResult<Option<Task>>;

    fn cancel(&self, task_id: &str, reason: Option<&str>) -> StoreResult<Option<Task>>;

    fn list(&self, statuses: Option<&[TaskStatus]>, limit: usize) -> StoreResult<Vec<Task>>;

    /// Missing tasks count as canceled.
    fn is_canceled(&self, task_id: &str) -> StoreResult<bool> {
        Ok(self
            .get(task_id)?
            .is_none_or(|task| task.status == TaskStatus::Canceled))
    }
}

fn new_task(kind: TaskKind, payload: Value) -> Task {
    let now = now_utc_string();
    Task {
        id: new_id("tsk"),
        kind,
        status: TaskStatus::Queued,
        progress_current: 0,
        progress_total: 0,
        error_message: None,
        payload,
        created_at: now.clone(),
        updated_at: now,
    }
}

fn cancel_message(reason: Option<&str>) -> String {
    reason
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .unwrap_or(DEFAULT_CANCEL_REASON)
        .to_string()
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIST_LIMIT)
}

#[derive(Debug, Default)]
struct MemoryState {
    tasks: HashMap<String, (u64, Task)>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    state: Mutex<MemoryState>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn create(&self, kind: TaskKind, payload: Value) -> StoreResult<Task> {
        let task = new_task(kind, payload);
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.insert(task.id.clone(), (seq, task.clone()));
        Ok(task)
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<Task>> {
        Ok(self
            .state
            .lock()
            .tasks
            .get(task_id)
            .map(|(_, task)| task.clone()))
    }

    fn update(&self, task_id: &str, update: TaskUpdate) -> StoreResult<Option<Task>> {
        let mut state = self.state.lock();
        let Some((_, task)) = state.tasks.get_mut(task_id) else {
            return Ok(None);
        };
        update.apply(task);
        Ok(Some(task.clone()))
    }

    fn cancel(&self, task_id: &str, reason: Option<&str>) -> StoreResult<Option<Task>> {
        let mut state = self.state.lock();
        let Some((_, task)) = state.tasks.get_mut(task_id) else {
            return Ok(None);
        };
        if task.status.is_active() {
            task.status = TaskStatus::Canceled;
            task.error_message = Some(cancel_message(reason));
            task.updated_at = now_utc_string();
        }
        Ok(Some(task.clone()))
    }

    fn list(&self, statuses: Option<&[TaskStatus]>, limit: usize) -> StoreResult<Vec<Task>> {
        let state = self.state.lock();
        let mut rows = state
            .tasks
            .values()
            .filter(|(_, task)| statuses.is_none_or(|allowed| allowed.contains(&task.status)))
            .collect::<Vec<_>>();
        rows.sort_by(|(left_seq, left), (right_seq, right)| {
            right
                .created_at
                .cmp(&left.created_at)
                .then_with(|| right_seq.cmp(left_seq))
        });
        Ok(rows
            .into_iter()
            .take(clamp_limit(limit))
            .map(|(_, task)| task.clone())
            .collect())
    }
}

#[derive(Debug)]
pub struct SqliteTaskStore {
    connection: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(connection: Connection) -> StoreResult<Self> {
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

fn configure_connection(connection: &Connection) -> StoreResult<()> {
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
          id TEXT PRIMARY KEY,
          kind TEXT NOT NULL,
          status TEXT NOT NULL,
          progress_current INTEGER NOT NULL DEFAULT 0,
          progress_total INTEGER NOT NULL DEFAULT 0,
          error_message TEXT,
          payload_json TEXT NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        ",
    )?;
    Ok(())
}

const SELECT_TASK: &str = "
    SELECT id, kind, status, progress_current, progress_total,
           error_message, payload_json, created_at, updated_at
    FROM tasks
";

struct TaskRow {
    id: String,
    kind: String,
    status: String,
    progress_current: i64,
    progress_total: i64,
    error_message: Option<String>,
    payload_json: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            status: row.get(2)?,
            progress_current: row.get(3)?,
            progress_total: row.get(4)?,
            error_message: row.get(5)?,
            payload_json: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_task(self) -> StoreResult<Task> {
        let status =
            TaskStatus::parse(&self.status).ok_or(StoreError::UnknownStatus(self.status))?;
        let kind = TaskKind::parse(&self.kind).ok_or(StoreError::UnknownKind(self.kind))?;
        Ok(Task {
            id: self.id,
            kind,
            status,
            progress_current: self.progress_current.max(0) as u64,
            progress_total: self.progress_total.max(0) as u64,
            error_message: self.error_message,
            payload: serde_json::from_str(&self.payload_json)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn fetch_task(connection: &Connection, task_id: &str) -> StoreResult<Option<Task>> {
    let sql = format!("{SELECT_TASK} WHERE id = ?1");
    connection
        .query_row(&sql, [task_id], TaskRow::from_row)
        .optional()?
        .map(TaskRow::into_task)
        .transpose()
}

fn write_task(connection: &Connection, task: &Task) -> StoreResult<()> {
    connection.execute(
        "
        UPDATE tasks
        SET status = ?2,
            progress_current = ?3,
            progress_total = ?4,
            error_message = ?5,
            payload_json = ?6,
            updated_at = ?7
        WHERE id = ?1
        ",
        params![
            task.id,
            task.status.as_str(),
            task.progress_current as i64,
            task.progress_total as i64,
            task.error_message,
            serde_json::to_string(&task.payload)?,
            task.updated_at,
        ],
    )?;
    Ok(())
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, kind: TaskKind, payload: Value) -> StoreResult<Task> {
        let task = new_task(kind, payload);
        self.connection.lock().execute(
            "
            INSERT INTO tasks(
              id, kind, status, progress_current, progress_total,
              error_message, payload_json, created_at, updated_at
            )
            VALUES(?1, ?2, ?3, 0, 0, NULL, ?4, ?5, ?6)
            ",
            params![
                task.id,
                task.kind.as_str(),
                task.status.as_str(),
                serde_json::to_string(&task.payload)?,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(task)
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<Task>> {
        fetch_task(&self.connection.lock(), task_id)
    }

    fn update(&self, task_id: &str, update: TaskUpdate) -> StoreResult<Option<Task>> {
        let connection = self.connection.lock();
        let Some(mut task) = fetch_task(&connection, task_id)? else {
            return Ok(None);
        };
        update.apply(&mut task);
        write_task(&connection, &task)?;
        Ok(Some(task))
    }

    fn cancel(&self, task_id: &str, reason: Option<&str>) -> StoreResult<Option<Task>> {
        let connection = self.connection.lock();
        let Some(mut task) = fetch_task(&connection, task_id)? else {
            return Ok(None);
        };
        if task.status.is_active() {
            task.status = TaskStatus::Canceled;
            task.error_message = Some(cancel_message(reason));
            task.updated_at = now_utc_string();
            write_task(&connection, &task)?;
        }
        Ok(Some(task))
    }

    fn list(&self, statuses: Option<&[TaskStatus]>, limit: usize) -> StoreResult<Vec<Task>> {
        let connection = self.connection.lock();
        let sql = format!("{SELECT_TASK} ORDER BY created_at DESC, rowid DESC");
        let mut statement = connection.prepare(&sql)?;
        let mut rows = statement.query([])?;

        let limit = clamp_limit(limit);
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let task = TaskRow::from_row(row)?.into_task()?;
            if statuses.is_none_or(|allowed| allowed.contains(&task.status)) {
                out.push(task);
                if out.len() == limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}
