use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ParserError;

#[derive(Debug, Clone)]
pub struct ParseSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

#[derive(Debug)]
pub struct ParseSlot {
    _permit: OwnedSemaphorePermit,
    pub wait_ms: f64,
}

impl ParseSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<ParseSlot, ParserError> {
        let started = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ParserError::SlotsClosed)?;
        Ok(ParseSlot {
            _permit: permit,
            wait_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
