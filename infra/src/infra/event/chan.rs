use super::{EventSubscription, RunEventPublisher, RunEventSubscriber};
use crate::infra::chan::broadcast::{BroadcastChanBuffer, UseBroadcastChanBuffer};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;

/// In-process pub/sub over broadcast channels (standalone mode).
#[derive(Clone, Debug)]
pub struct ChanRunEventPubSubRepositoryImpl {
    broadcast_chan_buf: BroadcastChanBuffer,
}

impl ChanRunEventPubSubRepositoryImpl {
    pub fn new(broadcast_chan_buf: BroadcastChanBuffer) -> Self {
        Self { broadcast_chan_buf }
    }
}

#[async_trait]
impl RunEventPublisher for ChanRunEventPubSubRepositoryImpl {
    async fn publish_raw(
        &self,
        channel: &str,
        payload: Vec<u8>,
        wait_for_subscriber: bool,
    ) -> Result<bool> {
        if wait_for_subscriber {
            // tokio broadcast only reaches receivers registered at send
            // time; poll briefly for the subscriber-created channel so a
            // publish racing a fresh subscription is not lost.
            let max_wait_attempts = 10;
            let wait_interval = Duration::from_millis(10);
            for attempt in 0..max_wait_attempts {
                if self
                    .broadcast_chan_buf()
                    .get_if_exists(channel)
                    .await
                    .is_some()
                {
                    break;
                }
                if attempt < max_wait_attempts - 1 {
                    tokio::time::sleep(wait_interval).await;
                }
            }
        }
        self.broadcast_chan_buf()
            .send_to_chan(channel, payload, true)
            .await
    }
}

#[async_trait]
impl RunEventSubscriber for ChanRunEventPubSubRepositoryImpl {
    async fn subscribe(&self, channel: &str) -> Result<EventSubscription> {
        let rx = self.broadcast_chan_buf().subscribe(channel).await;
        tracing::debug!("subscribed: ch={}", channel);
        let channel_name = channel.to_string();
        let stream = BroadcastStream::new(rx)
            .filter_map(move |item| {
                let channel_name = channel_name.clone();
                async move {
                    item.inspect_err(|e| {
                        tracing::warn!("subscriber lagged on {}: {:?}", channel_name, e)
                    })
                    .ok()
                }
            })
            .boxed();
        Ok(EventSubscription::new(channel.to_string(), stream))
    }
}

impl UseBroadcastChanBuffer for ChanRunEventPubSubRepositoryImpl {
    fn broadcast_chan_buf(&self) -> &BroadcastChanBuffer {
        &self.broadcast_chan_buf
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use domain::event::{RunEventKind, RunStreamEvent};
    use domain::id::RunId;
    use serde_json::json;

    fn repo() -> ChanRunEventPubSubRepositoryImpl {
        ChanRunEventPubSubRepositoryImpl::new(BroadcastChanBuffer::new(128, 10_000, None))
    }

    #[tokio::test]
    async fn test_subscribe_before_publish_receives() {
        let repo = repo();
        let run_id = RunId::from("run_sub");
        let mut sub = repo.subscribe_run(&run_id).await.unwrap();
        repo.publish_event(
            &run_id,
            &RunStreamEvent {
                event: RunEventKind::RunQueued,
                data: json!({"id": "run_sub"}),
            },
        )
        .await
        .unwrap();
        let payload = sub.next_payload().await.unwrap();
        let event: RunStreamEvent = serde_json::from_slice(&payload).unwrap();
        assert_eq!(event.event, RunEventKind::RunQueued);
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_dropped() {
        let repo = repo();
        let run_id = RunId::from("run_nobody");
        let sent = repo
            .publish_event(&run_id, &RunStreamEvent::done())
            .await
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_publish_polling_prevents_race() {
        // publisher starts first, subscriber attaches within the polling
        // window; the message must not be lost
        let repo = repo();
        let channel = "race:ch".to_string();
        let repo2 = repo.clone();
        let channel2 = channel.clone();
        let publish = tokio::spawn(async move {
            repo2
                .publish_raw(&channel2, b"late".to_vec(), true)
                .await
                .unwrap()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut sub = repo.subscribe(&channel).await.unwrap();
        assert!(publish.await.unwrap());
        assert_eq!(sub.next_payload().await.unwrap(), b"late".to_vec());
    }

    #[tokio::test]
    async fn test_event_stream_ends_at_done() {
        let repo = repo();
        let run_id = RunId::from("run_done");
        let sub = repo.subscribe_run(&run_id).await.unwrap();
        repo.publish_event(
            &run_id,
            &RunStreamEvent {
                event: RunEventKind::RunInProgress,
                data: json!({}),
            },
        )
        .await
        .unwrap();
        repo.publish_event(&run_id, &RunStreamEvent::done())
            .await
            .unwrap();

        let events: Vec<RunStreamEvent> = sub.into_event_stream().collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, RunEventKind::RunInProgress);
        assert_eq!(events[1].event, RunEventKind::Done);
    }
}
