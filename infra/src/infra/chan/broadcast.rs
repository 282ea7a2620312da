use moka::future::Cache;
use std::time::Duration;
use tokio::sync::broadcast;

/// Named in-process broadcast channels with TTL eviction.
///
/// Channels are created by the subscribe side (get-or-create) and the send
/// side only ever writes to existing channels, which is what lets a waiter
/// register its receiver before any state announcing the wait is published.
#[derive(Clone, Debug)]
pub struct BroadcastChanBuffer {
    channels: Cache<String, broadcast::Sender<Vec<u8>>>,
    capacity: usize,
}

impl BroadcastChanBuffer {
    pub fn new(capacity: usize, max_channels: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(max_channels);
        if let Some(ttl) = ttl {
            builder = builder.time_to_idle(ttl);
        }
        Self {
            channels: builder.build(),
            capacity,
        }
    }

    async fn get_or_create(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .get_with(name.to_string(), async {
                broadcast::Sender::new(self.capacity)
            })
            .await
    }

    pub async fn get_if_exists(&self, name: &str) -> Option<broadcast::Sender<Vec<u8>>> {
        self.channels.get(name).await
    }

    /// Register a receiver, creating the channel if needed.
    pub async fn subscribe(&self, name: &str) -> broadcast::Receiver<Vec<u8>> {
        self.get_or_create(name).await.subscribe()
    }

    /// Send to a channel. With `only_if_exists` the send is skipped when no
    /// subscriber has created the channel yet (non-durable delivery: late
    /// subscribers simply miss the message).
    pub async fn send_to_chan(
        &self,
        name: &str,
        data: Vec<u8>,
        only_if_exists: bool,
    ) -> anyhow::Result<bool> {
        let sender = if only_if_exists {
            match self.get_if_exists(name).await {
                Some(s) => s,
                None => {
                    tracing::debug!("send_to_chan: no channel for {}, skipping", name);
                    return Ok(false);
                }
            }
        } else {
            self.get_or_create(name).await
        };
        // send() errors only when every receiver is gone
        Ok(sender.send(data).is_ok())
    }

    pub async fn receiver_count(&self, name: &str) -> usize {
        self.get_if_exists(name)
            .await
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub async fn delete_chan(&self, name: &str) {
        self.channels.invalidate(name).await;
    }
}

pub trait UseBroadcastChanBuffer {
    fn broadcast_chan_buf(&self) -> &BroadcastChanBuffer;
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_then_send() {
        let buf = BroadcastChanBuffer::new(16, 100, None);
        let mut rx = buf.subscribe("ch1").await;
        assert!(buf.send_to_chan("ch1", b"hello".to_vec(), true).await.unwrap());
        assert_eq!(rx.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_send_without_subscriber_is_skipped() {
        let buf = BroadcastChanBuffer::new(16, 100, None);
        assert!(!buf.send_to_chan("nobody", b"x".to_vec(), true).await.unwrap());
        assert_eq!(buf.receiver_count("nobody").await, 0);
    }

    #[tokio::test]
    async fn test_multiple_receivers_all_get_the_message() {
        let buf = BroadcastChanBuffer::new(16, 100, None);
        let mut rx1 = buf.subscribe("fanout").await;
        let mut rx2 = buf.subscribe("fanout").await;
        assert_eq!(buf.receiver_count("fanout").await, 2);
        buf.send_to_chan("fanout", b"m".to_vec(), true).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), b"m".to_vec());
        assert_eq!(rx2.recv().await.unwrap(), b"m".to_vec());
    }

    #[tokio::test]
    async fn test_delete_chan() {
        let buf = BroadcastChanBuffer::new(16, 100, None);
        let _rx = buf.subscribe("gone").await;
        buf.delete_chan("gone").await;
        assert!(buf.get_if_exists("gone").await.is_none());
    }
}
