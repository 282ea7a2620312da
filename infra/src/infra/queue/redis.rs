use super::{RunJob, RunJobQueueRepository};
use crate::infra::redis_client::{RedisClientModule, UseRedisClient};
use anyhow::Result;
use async_trait::async_trait;
use debug_stub_derive::DebugStub;
use domain::id::RunId;
use std::time::Duration;

const QUEUE_KEY: &str = "rw:queue:runs";
const PENDING_KEY: &str = "rw:queue:runs:pending";
const REMOVED_KEY: &str = "rw:queue:runs:removed";

/// Redis list queue for scalable mode. LPUSH/BLPOP delivery with a pending
/// set enforcing one job per run id across processes.
#[derive(Clone, DebugStub)]
pub struct RedisRunJobQueueRepositoryImpl {
    #[debug_stub = "RedisClientModule"]
    redis_client: RedisClientModule,
}

impl RedisRunJobQueueRepositoryImpl {
    pub fn new(redis_client: RedisClientModule) -> Self {
        Self { redis_client }
    }
}

#[async_trait]
impl RunJobQueueRepository for RedisRunJobQueueRepositoryImpl {
    async fn enqueue(&self, run_id: &RunId) -> Result<bool> {
        let mut conn = self.redis_client().pool.get().await?;
        let added: i64 = redis::cmd("SADD")
            .arg(PENDING_KEY)
            .arg(run_id.as_str())
            .query_async(&mut conn)
            .await?;
        if added == 0 {
            tracing::debug!("enqueue: job already pending for run {}", run_id);
            return Ok(false);
        }
        let _: i64 = redis::cmd("SREM")
            .arg(REMOVED_KEY)
            .arg(run_id.as_str())
            .query_async(&mut conn)
            .await?;
        let payload = serde_json::to_vec(&RunJob::new(run_id.clone()))?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .inspect_err(|e| tracing::error!("redis_lpush_err:{:?}", e))?;
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
            let mut conn = self.redis_client().pool.get().await?;
            // bounded block so pool connections rotate and shutdown is not
            // held up indefinitely
            let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
                .arg(QUEUE_KEY)
                .arg(5.0)
                .query_async(&mut conn)
                .await
                .inspect_err(|e| tracing::error!("redis_blpop_err:{:?}", e))?;
            let Some((_, payload)) = popped else {
                continue;
            };
            let job: RunJob = match serde_json::from_slice(&payload) {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!("deserialize_run_job_err:{:?}", e);
                    continue;
                }
            };
            let _: i64 = redis::cmd("SREM")
                .arg(PENDING_KEY)
                .arg(job.run_id.as_str())
                .query_async(&mut conn)
                .await?;
            let removed: i64 = redis::cmd("SREM")
                .arg(REMOVED_KEY)
                .arg(job.run_id.as_str())
                .query_async(&mut conn)
                .await?;
            if removed > 0 {
                tracing::debug!("skipping removed run job: {}", job.run_id);
                continue;
            }
            return Ok(job);
        }
    }

    async fn remove(&self, run_id: &RunId) -> Result<bool> {
        let mut conn = self.redis_client().pool.get().await?;
        let was_pending: i64 = redis::cmd("SREM")
            .arg(PENDING_KEY)
            .arg(run_id.as_str())
            .query_async(&mut conn)
            .await?;
        if was_pending > 0 {
            // tombstone for the payload still sitting in the list
            let _: i64 = redis::cmd("SADD")
                .arg(REMOVED_KEY)
                .arg(run_id.as_str())
                .query_async(&mut conn)
                .await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl UseRedisClient for RedisRunJobQueueRepositoryImpl {
    fn redis_client(&self) -> &RedisClientModule {
        &self.redis_client
    }
}
