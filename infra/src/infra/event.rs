use anyhow::Result;
use async_trait::async_trait;
use domain::event::RunStreamEvent;
use domain::id::{RunId, ToolCallId};
use futures::stream::BoxStream;
use futures::StreamExt;
use strum_macros::{AsRefStr, Display};

pub mod chan;
pub mod redis;

/// Which gate a channel belongs to. One channel per (run, call, purpose).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum GatePurpose {
    Approve,
    Input,
    Output,
}

pub fn run_channel_name(run_id: &RunId) -> String {
    format!("run:{run_id}")
}

pub fn gate_channel_name(run_id: &RunId, tool_call_id: &ToolCallId, purpose: GatePurpose) -> String {
    format!("run:{run_id}:call:{tool_call_id}:{purpose}")
}

/// A live subscription. Dropping it releases the underlying receiver (chan)
/// or pub/sub connection (Redis); there is nothing else to clean up.
pub struct EventSubscription {
    channel: String,
    stream: BoxStream<'static, Vec<u8>>,
}

impl EventSubscription {
    pub fn new(channel: String, stream: BoxStream<'static, Vec<u8>>) -> Self {
        Self { channel, stream }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next raw payload; None when the transport closed the stream.
    pub async fn next_payload(&mut self) -> Option<Vec<u8>> {
        self.stream.next().await
    }

    /// Stream of parsed events, terminated after the first stream-end
    /// sentinel. Unparseable payloads are logged and skipped.
    pub fn into_event_stream(mut self) -> BoxStream<'static, RunStreamEvent> {
        Box::pin(async_stream::stream! {
            while let Some(payload) = self.stream.next().await {
                match serde_json::from_slice::<RunStreamEvent>(&payload) {
                    Ok(event) => {
                        let end = event.event.is_stream_end();
                        yield event;
                        if end {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("deserialize_event_err({}): {:?}", self.channel, e);
                    }
                }
            }
        })
    }
}

#[async_trait]
pub trait RunEventPublisher: Send + Sync + 'static {
    /// Publish raw bytes on a named channel. With `wait_for_subscriber`
    /// the publisher briefly waits for a subscriber-created channel to
    /// appear before sending (backends where that is observable).
    async fn publish_raw(
        &self,
        channel: &str,
        payload: Vec<u8>,
        wait_for_subscriber: bool,
    ) -> Result<bool>;

    async fn publish_event(&self, run_id: &RunId, event: &RunStreamEvent) -> Result<bool> {
        let payload = serde_json::to_vec(event)?;
        tracing::debug!("publish_event: run_id={}, event={}", run_id, event.event);
        self.publish_raw(&run_channel_name(run_id), payload, false)
            .await
    }
}

#[async_trait]
pub trait RunEventSubscriber: Send + Sync + 'static {
    /// Register the receiver first, then return; callers rely on the
    /// subscription existing before they publish any state that announces
    /// the wait.
    async fn subscribe(&self, channel: &str) -> Result<EventSubscription>;

    async fn subscribe_run(&self, run_id: &RunId) -> Result<EventSubscription> {
        self.subscribe(&run_channel_name(run_id)).await
    }
}

pub trait RunEventPubSubRepository: RunEventPublisher + RunEventSubscriber {}
impl<T: RunEventPublisher + RunEventSubscriber> RunEventPubSubRepository for T {}
