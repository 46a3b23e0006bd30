//! Fixed-size admission gate in front of the worker runner.
//!
//! At most `capacity` jobs run at once. Later jobs wait in arrival order;
//! tokio's semaphore hands out permits FIFO.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::errors::JobError;
use crate::job::JobDescriptor;
use crate::worker::{ProgressSink, WorkerRunner};

/// Message sent to every job before it is admitted.
pub const QUEUED_MESSAGE: &str = "Waiting in queue";

#[derive(Clone)]
pub struct ConcurrencyLimiter {
    runner: Arc<dyn WorkerRunner>,
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// A capacity of zero is raised to one.
    pub fn new(runner: Arc<dyn WorkerRunner>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            runner,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Stop admitting jobs. Queued and later jobs fail with
    /// [`JobError::QueueClosed`]; jobs already running are left alone.
    pub fn close(&self) {
        self.slots.close();
        info!(available = self.available(), "Job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Wait for a slot, then run the job to completion.
    ///
    /// The sink always gets [`QUEUED_MESSAGE`] first, even when a slot is free.
    /// The slot is released when the job ends, whatever its outcome.
    pub async fn schedule(
        &self,
        job: &JobDescriptor,
        sink: &dyn ProgressSink,
    ) -> Result<(), JobError> {
        sink.message(QUEUED_MESSAGE);
        debug!(run_id = job.run_id(), available = self.available(), "Job queued");

        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| {
                debug!(run_id = job.run_id(), "Queue closed before admission");
                JobError::QueueClosed
            })?;
        info!(run_id = job.run_id(), kind = %job.kind(), "Job admitted");

        self.runner.run(job, sink).await
    }
}
