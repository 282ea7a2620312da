use crate::infra::chan::broadcast::BroadcastChanBuffer;
use crate::infra::event::chan::ChanRunEventPubSubRepositoryImpl;
use crate::infra::event::redis::RedisRunEventPubSubRepositoryImpl;
use crate::infra::event::{RunEventPublisher, RunEventSubscriber};
use crate::infra::queue::chan::ChanRunJobQueueRepositoryImpl;
use crate::infra::queue::redis::RedisRunJobQueueRepositoryImpl;
use crate::infra::queue::RunJobQueueRepository;
use crate::infra::redis_client::setup_redis_client;
use crate::infra::repository::memory::{
    MemoryMessageRepository, MemoryRunRepository, MemoryRunStepRepository,
};
use crate::infra::repository::redis::{
    RedisMessageRepository, RedisRunRepository, RedisRunStepRepository,
};
use crate::infra::repository::{MessageRepository, RunRepository, RunStepRepository};
use anyhow::Result;
use runweaver_base::config::{QueueConfig, RedisConfig, StorageConfig, StorageKind};
use std::sync::Arc;
use std::time::Duration;

/// All storage-facing dependencies for one process, selected by storage
/// kind: in-process (standalone) or Redis (scalable).
#[derive(Clone)]
pub struct RepositoryModule {
    pub run_repository: Arc<dyn RunRepository>,
    pub step_repository: Arc<dyn RunStepRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub event_publisher: Arc<dyn RunEventPublisher>,
    pub event_subscriber: Arc<dyn RunEventSubscriber>,
    pub job_queue: Arc<dyn RunJobQueueRepository>,
}

impl std::fmt::Debug for RepositoryModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryModule").finish_non_exhaustive()
    }
}

impl RepositoryModule {
    pub fn new_chan(queue_config: &QueueConfig) -> Self {
        let chan_buf = BroadcastChanBuffer::new(
            queue_config.channel_capacity,
            10_000,
            Some(Duration::from_secs(queue_config.expire_channel_seconds)),
        );
        let pubsub = Arc::new(ChanRunEventPubSubRepositoryImpl::new(chan_buf));
        Self {
            run_repository: Arc::new(MemoryRunRepository::new()),
            step_repository: Arc::new(MemoryRunStepRepository::new()),
            message_repository: Arc::new(MemoryMessageRepository::new()),
            event_publisher: pubsub.clone(),
            event_subscriber: pubsub,
            job_queue: Arc::new(ChanRunJobQueueRepositoryImpl::new(queue_config)),
        }
    }

    pub fn new_redis(redis_config: &RedisConfig) -> Result<Self> {
        let client = setup_redis_client(redis_config)?;
        let pubsub = Arc::new(RedisRunEventPubSubRepositoryImpl::new(client.clone()));
        Ok(Self {
            run_repository: Arc::new(RedisRunRepository::new(client.clone())),
            step_repository: Arc::new(RedisRunStepRepository::new(client.clone())),
            message_repository: Arc::new(RedisMessageRepository::new(client.clone())),
            event_publisher: pubsub.clone(),
            event_subscriber: pubsub,
            job_queue: Arc::new(RedisRunJobQueueRepositoryImpl::new(client)),
        })
    }

    pub fn new_by_env(storage_config: &StorageConfig, queue_config: &QueueConfig) -> Result<Self> {
        match storage_config.r#type {
            StorageKind::Standalone => Ok(Self::new_chan(queue_config)),
            StorageKind::Scalable => Self::new_redis(&RedisConfig::from_env()),
        }
    }
}

pub trait UseRepositoryModule {
    fn repository_module(&self) -> &RepositoryModule;
}
