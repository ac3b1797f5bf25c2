use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::StoreResult;
use crate::tasks::store::{Task, TaskStore};

#[derive(Clone)]
pub struct CancelContext {
    task_id: String,
    store: Arc<dyn TaskStore>,
    token: CancellationToken,
}

impl std::fmt::Debug for CancelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelContext")
            .field("task_id", &self.task_id)
            .field("token_cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl CancelContext {
    pub fn new(task_id: impl Into<String>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            task_id: task_id.into(),
            store,
            token: CancellationToken::new(),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_canceled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        match self.store.is_canceled(&self.task_id) {
            Ok(true) => {
                self.token.cancel();
                true
            }
            Ok(false) => false,
            Err(err) => {
                warn!(task_id = %self.task_id, error = %err, "task_cancel_check_failed");
                false
            }
        }
    }

    pub fn cancel(&self, reason: Option<&str>) -> StoreResult<Option<Task>> {
        self.token.cancel();
        self.store.cancel(&self.task_id, reason)
    }
}
