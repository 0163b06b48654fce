use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::JobError;

/// Admission control for external downloads.
///
/// With the default capacity of one, a second job waits until the first
/// child process has exited and its output has been inspected.
#[derive(Debug, Clone)]
pub struct DownloadSlots {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held for the whole lifetime of one download process.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl DownloadSlots {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> Result<SlotPermit, JobError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobError::Download("could not reserve download capacity".to_string()))?;

        Ok(SlotPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for DownloadSlots {
    fn default() -> Self {
        Self::new(1)
    }
}
