//! Single-job guard.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;

use crate::error::JobError;

/// Description of the job currently holding the slot.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: String,
    pub description: String,
    pub started_at: Instant,
}

/// Slot that admits at most one job at a time.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct JobSlot {
    active: Arc<Mutex<Option<ActiveJob>>>,
}

impl JobSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the slot, failing with [`JobError::JobAlreadyRunning`] if another
    /// job holds it. The slot is released when the returned guard drops.
    pub fn try_acquire(&self, description: &str) -> Result<JobGuard, JobError> {
        let mut active = self.lock();
        if let Some(current) = active.as_ref() {
            debug!(running = %current.id, "rejecting job, slot busy");
            return Err(JobError::JobAlreadyRunning);
        }
        let job = ActiveJob {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.to_string(),
            started_at: Instant::now(),
        };
        let id = job.id.clone();
        *active = Some(job);
        Ok(JobGuard {
            slot: self.clone(),
            id,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    /// The job currently holding the slot, if any.
    pub fn current(&self) -> Option<ActiveJob> {
        self.lock().clone()
    }
}

/// Proof of holding the [`JobSlot`]. Releases it on drop.
#[derive(Debug)]
pub struct JobGuard {
    slot: JobSlot,
    id: String,
}

impl JobGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut active = self.slot.lock();
        if active.as_ref().is_some_and(|job| job.id == self.id) {
            *active = None;
        }
    }
}
