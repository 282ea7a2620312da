use super::{EventSubscription, RunEventPublisher, RunEventSubscriber};
use crate::infra::redis_client::{RedisClientModule, UseRedisClient};
use anyhow::Result;
use async_trait::async_trait;
use debug_stub_derive::DebugStub;
use futures::StreamExt;

/// Redis pub/sub transport for multi-process deployment. Delivery reaches
/// current subscribers only; nothing is retained for late attachers.
#[derive(Clone, DebugStub)]
pub struct RedisRunEventPubSubRepositoryImpl {
    #[debug_stub = "RedisClientModule"]
    redis_client: RedisClientModule,
}

impl RedisRunEventPubSubRepositoryImpl {
    pub fn new(redis_client: RedisClientModule) -> Self {
        Self { redis_client }
    }
}

#[async_trait]
impl RunEventPublisher for RedisRunEventPubSubRepositoryImpl {
    async fn publish_raw(
        &self,
        channel: &str,
        payload: Vec<u8>,
        _wait_for_subscriber: bool,
    ) -> Result<bool> {
        // Redis SUBSCRIBE registers server-side immediately, so the
        // subscribe-before-publish ordering of the callers is sufficient
        // here and no polling is needed.
        let mut conn = self
            .redis_client()
            .pool
            .get()
            .await
            .inspect_err(|e| tracing::error!("redis_pool_err:{:?}", e))?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .inspect_err(|e| tracing::error!("redis_publish_err({}):{:?}", channel, e))?;
        Ok(receivers > 0)
    }
}

#[async_trait]
impl RunEventSubscriber for RedisRunEventPubSubRepositoryImpl {
    async fn subscribe(&self, channel: &str) -> Result<EventSubscription> {
        let mut pubsub = self
            .redis_client()
            .client
            .get_async_pubsub()
            .await
            .inspect_err(|e| tracing::error!("redis_pubsub_err:{:?}", e))?;
        pubsub.subscribe(channel).await?;
        tracing::debug!("subscribed: ch={}", channel);
        // dropping the stream drops the pub/sub connection (implicit
        // unsubscribe)
        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload_bytes().to_vec())
            .boxed();
        Ok(EventSubscription::new(channel.to_string(), stream))
    }
}

impl UseRedisClient for RedisRunEventPubSubRepositoryImpl {
    fn redis_client(&self) -> &RedisClientModule {
        &self.redis_client
    }
}
