use super::{is_active, MessageRepository, RunRepository, RunStepRepository};
use crate::infra::redis_client::{RedisClientModule, UseRedisClient};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use debug_stub_derive::DebugStub;
use domain::id::{MessageId, PrincipalId, RunId, StepId, ThreadId};
use domain::message::Message;
use domain::run::{Run, RunStatus};
use domain::step::RunStep;
use itertools::Itertools;
use runweaver_base::error::OrchestratorError;
use serde::de::DeserializeOwned;
use serde::Serialize;

const RUN_HASH_KEY: &str = "rw:runs";
const STEP_HASH_KEY: &str = "rw:steps";
const MESSAGE_HASH_KEY: &str = "rw:messages";

/// JSON records in Redis hashes. Query operations scan the hash: record
/// volume is bounded by the run TTL plus the cleanup sweep, which keeps the
/// working set small enough that secondary indexes are not worth their
/// consistency burden here.
#[derive(Clone, DebugStub)]
pub struct RedisRunRepository {
    #[debug_stub = "RedisClientModule"]
    redis_client: RedisClientModule,
}

impl RedisRunRepository {
    pub fn new(redis_client: RedisClientModule) -> Self {
        Self { redis_client }
    }
}

async fn hash_get<T: DeserializeOwned>(
    client: &RedisClientModule,
    key: &str,
    field: &str,
) -> Result<Option<T>> {
    let mut conn = client.pool.get().await?;
    let raw: Option<Vec<u8>> = redis::cmd("HGET")
        .arg(key)
        .arg(field)
        .query_async(&mut conn)
        .await
        .inspect_err(|e| tracing::error!("redis_hget_err({key}): {:?}", e))?;
    raw.map(|v| serde_json::from_slice(&v).map_err(|e| OrchestratorError::from(e).into()))
        .transpose()
}

async fn hash_set<T: Serialize>(
    client: &RedisClientModule,
    key: &str,
    field: &str,
    value: &T,
) -> Result<bool> {
    let mut conn = client.pool.get().await?;
    let payload = serde_json::to_vec(value)?;
    // HSET returns 1 for new fields, 0 for overwrites
    let created: i64 = redis::cmd("HSET")
        .arg(key)
        .arg(field)
        .arg(payload)
        .query_async(&mut conn)
        .await
        .inspect_err(|e| tracing::error!("redis_hset_err({key}): {:?}", e))?;
    Ok(created == 0)
}

async fn hash_values<T: DeserializeOwned>(client: &RedisClientModule, key: &str) -> Result<Vec<T>> {
    let mut conn = client.pool.get().await?;
    let raw: Vec<Vec<u8>> = redis::cmd("HVALS")
        .arg(key)
        .query_async(&mut conn)
        .await
        .inspect_err(|e| tracing::error!("redis_hvals_err({key}): {:?}", e))?;
    Ok(raw
        .iter()
        .filter_map(|v| {
            serde_json::from_slice(v)
                .inspect_err(|e| tracing::error!("deserialize_record_err({key}): {:?}", e))
                .ok()
        })
        .collect_vec())
}

#[async_trait]
impl RunRepository for RedisRunRepository {
    async fn create(&self, run: &Run) -> Result<()> {
        let mut conn = self.redis_client().pool.get().await?;
        let payload = serde_json::to_vec(run)?;
        let created: i64 = redis::cmd("HSETNX")
            .arg(RUN_HASH_KEY)
            .arg(run.id.as_str())
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(OrchestratorError::AlreadyExists(format!("run {}", run.id)).into());
        }
        Ok(())
    }

    async fn upsert(&self, run: &Run) -> Result<bool> {
        tracing::debug!("upsert run: {}={}", run.id, run.status);
        hash_set(self.redis_client(), RUN_HASH_KEY, run.id.as_str(), run).await
    }

    async fn find(&self, id: &RunId) -> Result<Option<Run>> {
        hash_get(self.redis_client(), RUN_HASH_KEY, id.as_str()).await
    }

    async fn find_status(&self, id: &RunId) -> Result<Option<RunStatus>> {
        Ok(self.find(id).await?.map(|r| r.status))
    }

    async fn find_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Run>> {
        Ok(hash_values::<Run>(self.redis_client(), RUN_HASH_KEY)
            .await?
            .into_iter()
            .filter(|r| &r.thread_id == thread_id)
            .sorted_by_key(|r| r.created_at)
            .collect_vec())
    }

    async fn delete(&self, id: &RunId) -> Result<bool> {
        let mut conn = self.redis_client().pool.get().await?;
        let removed: i64 = redis::cmd("HDEL")
            .arg(RUN_HASH_KEY)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn count_created_since(
        &self,
        principal_id: &PrincipalId,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(hash_values::<Run>(self.redis_client(), RUN_HASH_KEY)
            .await?
            .iter()
            .filter(|r| &r.principal_id == principal_id && r.created_at >= since)
            .count())
    }

    async fn count_active(&self, principal_id: &PrincipalId) -> Result<usize> {
        Ok(hash_values::<Run>(self.redis_client(), RUN_HASH_KEY)
            .await?
            .iter()
            .filter(|r| &r.principal_id == principal_id && is_active(r.status))
            .count())
    }

    async fn find_expired(&self, at: DateTime<Utc>) -> Result<Vec<Run>> {
        Ok(hash_values::<Run>(self.redis_client(), RUN_HASH_KEY)
            .await?
            .into_iter()
            .filter(|r| !r.status.is_terminal() && r.expires_at <= at)
            .collect_vec())
    }
}

impl UseRedisClient for RedisRunRepository {
    fn redis_client(&self) -> &RedisClientModule {
        &self.redis_client
    }
}

#[derive(Clone, DebugStub)]
pub struct RedisRunStepRepository {
    #[debug_stub = "RedisClientModule"]
    redis_client: RedisClientModule,
}

impl RedisRunStepRepository {
    pub fn new(redis_client: RedisClientModule) -> Self {
        Self { redis_client }
    }
}

#[async_trait]
impl RunStepRepository for RedisRunStepRepository {
    async fn create(&self, step: &RunStep) -> Result<()> {
        let overwrote = hash_set(&self.redis_client, STEP_HASH_KEY, step.id.as_str(), step).await?;
        if overwrote {
            return Err(OrchestratorError::AlreadyExists(format!("step {}", step.id)).into());
        }
        Ok(())
    }

    async fn upsert(&self, step: &RunStep) -> Result<bool> {
        hash_set(&self.redis_client, STEP_HASH_KEY, step.id.as_str(), step).await
    }

    async fn find(&self, id: &StepId) -> Result<Option<RunStep>> {
        hash_get(&self.redis_client, STEP_HASH_KEY, id.as_str()).await
    }

    async fn find_by_run(&self, run_id: &RunId) -> Result<Vec<RunStep>> {
        Ok(hash_values::<RunStep>(&self.redis_client, STEP_HASH_KEY)
            .await?
            .into_iter()
            .filter(|s| &s.run_id == run_id)
            .sorted_by_key(|s| s.created_at)
            .collect_vec())
    }
}

#[derive(Clone, DebugStub)]
pub struct RedisMessageRepository {
    #[debug_stub = "RedisClientModule"]
    redis_client: RedisClientModule,
}

impl RedisMessageRepository {
    pub fn new(redis_client: RedisClientModule) -> Self {
        Self { redis_client }
    }
}

#[async_trait]
impl MessageRepository for RedisMessageRepository {
    async fn create(&self, message: &Message) -> Result<()> {
        let overwrote = hash_set(
            &self.redis_client,
            MESSAGE_HASH_KEY,
            message.id.as_str(),
            message,
        )
        .await?;
        if overwrote {
            return Err(
                OrchestratorError::AlreadyExists(format!("message {}", message.id)).into(),
            );
        }
        Ok(())
    }

    async fn upsert(&self, message: &Message) -> Result<bool> {
        hash_set(
            &self.redis_client,
            MESSAGE_HASH_KEY,
            message.id.as_str(),
            message,
        )
        .await
    }

    async fn find(&self, id: &MessageId) -> Result<Option<Message>> {
        hash_get(&self.redis_client, MESSAGE_HASH_KEY, id.as_str()).await
    }

    async fn find_by_run(&self, run_id: &RunId) -> Result<Vec<Message>> {
        Ok(hash_values::<Message>(&self.redis_client, MESSAGE_HASH_KEY)
            .await?
            .into_iter()
            .filter(|m| &m.run_id == run_id)
            .sorted_by_key(|m| m.created_at)
            .collect_vec())
    }

    async fn find_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        Ok(hash_values::<Message>(&self.redis_client, MESSAGE_HASH_KEY)
            .await?
            .into_iter()
            .filter(|m| &m.thread_id == thread_id)
            .sorted_by_key(|m| m.created_at)
            .collect_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::infra::redis_client::setup_redis_client;
    use domain::id::AssistantId;
    use domain::run::RunInput;
    use runweaver_base::config::RedisConfig;
    use std::collections::HashMap;

    #[ignore = "requires a running Redis instance"]
    #[tokio::test]
    async fn test_run_record_roundtrip() -> Result<()> {
        let repo = RedisRunRepository::new(setup_redis_client(&RedisConfig::default())?);
        let run = Run::new(RunInput {
            thread_id: ThreadId::from("thread_redis"),
            assistant_id: AssistantId::from("asst_redis"),
            principal_id: PrincipalId::from("user_redis"),
            tools: vec![],
            tool_approvals: HashMap::new(),
            instructions: None,
            model: "m".to_string(),
            metadata: HashMap::new(),
            expiration_milliseconds: 1000,
        });
        repo.create(&run).await?;
        assert!(repo.create(&run).await.is_err());
        assert_eq!(repo.find(&run.id).await?, Some(run.clone()));
        assert!(repo.delete(&run.id).await?);
        Ok(())
    }
}
