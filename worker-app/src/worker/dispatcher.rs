use crate::worker::executor::RunExecutorImpl;
use anyhow::Result;
use infra::infra::queue::RunJobQueueRepository;
use runweaver_base::error::OrchestratorError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Pulls run jobs off the queue and spawns one executor task per job,
/// bounded by the worker-slot semaphore. The queue guarantees at most one
/// active job per run id, so two tasks never share a run.
pub struct RunJobDispatcherImpl {
    job_queue: Arc<dyn RunJobQueueRepository>,
    executor: Arc<RunExecutorImpl>,
    concurrency: usize,
    shutdown: CancellationToken,
}

impl RunJobDispatcherImpl {
    pub fn new(
        job_queue: Arc<dyn RunJobQueueRepository>,
        executor: Arc<RunExecutorImpl>,
        concurrency: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            job_queue,
            executor,
            concurrency: concurrency.max(1),
            shutdown,
        }
    }

    pub async fn dispatch_jobs(&self) -> Result<()> {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        tracing::info!(
            "run job dispatcher started (concurrency={})",
            self.concurrency
        );
        loop {
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => permit.map_err(|e| {
                    OrchestratorError::RuntimeError(format!("worker slots closed: {e}"))
                })?,
            };
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.job_queue.receive() => match received {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::error!("receiving run job failed: {:?}", e);
                        drop(permit);
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        continue;
                    }
                },
            };
            tracing::info!("run job started: {}", job.run_id);
            let executor = self.executor.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match executor.execute(&job.run_id, shutdown).await {
                    Ok(()) => tracing::info!("run job done: {}", job.run_id),
                    Err(e) => tracing::error!("run job failed: {}: {:?}", job.run_id, e),
                }
            });
        }
        tracing::info!("run job dispatcher stopped");
        Ok(())
    }
}
