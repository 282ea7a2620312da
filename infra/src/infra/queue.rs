use anyhow::Result;
use async_trait::async_trait;
use domain::id::RunId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod chan;
pub mod redis;

/// Job payloads are minimal: the worker re-loads everything else from the
/// store, since it may be a different process than the enqueuer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJob {
    pub run_id: RunId,
    pub enqueue_time: i64,
}

impl RunJob {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            enqueue_time: runweaver_base::datetime::now_millis(),
        }
    }
}

/// Durable job queue contract: at most one pending job per run id, each job
/// delivered to exactly one worker, removal idempotent against jobs that
/// are already running or gone.
#[async_trait]
pub trait RunJobQueueRepository: Send + Sync + 'static {
    /// Enqueue keyed by run id. Returns false when a job for the run is
    /// already pending (duplicate adds are no-ops).
    async fn enqueue(&self, run_id: &RunId) -> Result<bool>;

    /// Re-enqueue after a delay (active-run deferral). Keeps the
    /// one-pending-job-per-run guarantee.
    async fn enqueue_after(&self, run_id: &RunId, delay: Duration) -> Result<()>;

    /// Block until a job is available. Removed jobs are skipped.
    async fn receive(&self) -> Result<RunJob>;

    /// Remove a pending job. Returns false when there was nothing pending
    /// for the run (already delivered, finished, or never enqueued).
    async fn remove(&self, run_id: &RunId) -> Result<bool>;
}
