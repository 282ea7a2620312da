use super::{RunJob, RunJobQueueRepository};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashSet;
use domain::id::RunId;
use runweaver_base::config::QueueConfig;
use runweaver_base::error::OrchestratorError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// In-process queue for standalone mode. A pending-set keys jobs by run id;
/// a removed-set makes removal effective for jobs already sitting in the
/// channel.
#[derive(Clone, Debug)]
pub struct ChanRunJobQueueRepositoryImpl {
    tx: mpsc::Sender<RunJob>,
    rx: Arc<Mutex<mpsc::Receiver<RunJob>>>,
    pending: Arc<DashSet<RunId>>,
    removed: Arc<DashSet<RunId>>,
}

impl ChanRunJobQueueRepositoryImpl {
    pub fn new(config: &QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            pending: Arc::new(DashSet::new()),
            removed: Arc::new(DashSet::new()),
        }
    }
}

#[async_trait]
impl RunJobQueueRepository for ChanRunJobQueueRepositoryImpl {
    async fn enqueue(&self, run_id: &RunId) -> Result<bool> {
        if !self.pending.insert(run_id.clone()) {
            tracing::debug!("enqueue: job already pending for run {}", run_id);
            return Ok(false);
        }
        self.removed.remove(run_id);
        self.tx
            .send(RunJob::new(run_id.clone()))
            .await
            .map_err(|e| OrchestratorError::ChanError(anyhow::anyhow!("queue send: {e}")))?;
        tracing::debug!("enqueued run job: {}", run_id);
        Ok(true)
    }

    async fn enqueue_after(&self, run_id: &RunId, delay: Duration) -> Result<()> {
        let this = self.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.enqueue(&run_id).await {
                tracing::error!("delayed enqueue failed for run {}: {:?}", run_id, e);
            }
        });
        Ok(())
    }

    async fn receive(&self) -> Result<RunJob> {
        loop {
            let job = {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            }
            .ok_or_else(|| {
                OrchestratorError::ChanError(anyhow::anyhow!("run job queue closed"))
            })?;
            self.pending.remove(&job.run_id);
            if self.removed.remove(&job.run_id).is_some() {
                tracing::debug!("skipping removed run job: {}", job.run_id);
                continue;
            }
            return Ok(job);
        }
    }

    async fn remove(&self, run_id: &RunId) -> Result<bool> {
        if self.pending.remove(run_id).is_some() {
            self.removed.insert(run_id.clone());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn queue() -> ChanRunJobQueueRepositoryImpl {
        ChanRunJobQueueRepositoryImpl::new(&QueueConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let q = queue();
        let run_id = RunId::from("run_1");
        assert!(q.enqueue(&run_id).await.unwrap());
        let job = q.receive().await.unwrap();
        assert_eq!(job.run_id, run_id);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let q = queue();
        let run_id = RunId::from("run_dup");
        assert!(q.enqueue(&run_id).await.unwrap());
        assert!(!q.enqueue(&run_id).await.unwrap());
        q.receive().await.unwrap();
        // after delivery a new job may be enqueued again
        assert!(q.enqueue(&run_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_skips_delivery() {
        let q = queue();
        let run_id = RunId::from("run_rm");
        let other = RunId::from("run_other");
        q.enqueue(&run_id).await.unwrap();
        q.enqueue(&other).await.unwrap();
        assert!(q.remove(&run_id).await.unwrap());
        assert!(!q.remove(&run_id).await.unwrap());
        // removed job is skipped; the next job comes through
        let job = q.receive().await.unwrap();
        assert_eq!(job.run_id, other);
    }

    #[tokio::test]
    async fn test_enqueue_after_delivers_later() {
        let q = queue();
        let run_id = RunId::from("run_delayed");
        q.enqueue_after(&run_id, Duration::from_millis(50)).await.unwrap();
        let job = q.receive().await.unwrap();
        assert_eq!(job.run_id, run_id);
        assert!(runweaver_base::datetime::now_millis() >= job.enqueue_time);
    }
}
