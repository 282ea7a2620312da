use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::id::{MessageId, PrincipalId, RunId, StepId, ThreadId};
use domain::message::Message;
use domain::run::{Run, RunStatus};
use domain::step::RunStep;

pub mod memory;
pub mod redis;

/// Persistent store contract for runs. Single-record reads and writes with
/// single-writer semantics: only the worker that owns a run updates it, so
/// upsert needs no compare-and-swap beyond the state machine's own guards.
#[async_trait]
pub trait RunRepository: Send + Sync + 'static {
    async fn create(&self, run: &Run) -> Result<()>;
    async fn upsert(&self, run: &Run) -> Result<bool>;
    async fn find(&self, id: &RunId) -> Result<Option<Run>>;
    /// Cheap status read for the level-triggered cancellation poll.
    async fn find_status(&self, id: &RunId) -> Result<Option<RunStatus>>;
    async fn find_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Run>>;
    async fn delete(&self, id: &RunId) -> Result<bool>;
    /// Daily quota window: runs created by the principal since the instant.
    async fn count_created_since(
        &self,
        principal_id: &PrincipalId,
        since: DateTime<Utc>,
    ) -> Result<usize>;
    /// Runs currently consuming a worker slot or waiting on the client.
    async fn count_active(&self, principal_id: &PrincipalId) -> Result<usize>;
    /// Non-terminal runs whose deadline has passed (expiration sweep).
    async fn find_expired(&self, at: DateTime<Utc>) -> Result<Vec<Run>>;
}

#[async_trait]
pub trait RunStepRepository: Send + Sync + 'static {
    async fn create(&self, step: &RunStep) -> Result<()>;
    async fn upsert(&self, step: &RunStep) -> Result<bool>;
    async fn find(&self, id: &StepId) -> Result<Option<RunStep>>;
    async fn find_by_run(&self, run_id: &RunId) -> Result<Vec<RunStep>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync + 'static {
    async fn create(&self, message: &Message) -> Result<()>;
    async fn upsert(&self, message: &Message) -> Result<bool>;
    async fn find(&self, id: &MessageId) -> Result<Option<Message>>;
    async fn find_by_run(&self, run_id: &RunId) -> Result<Vec<Message>>;
    /// Conversation history handed to the engine as memory.
    async fn find_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>>;
}

pub trait UseRunRepository {
    fn run_repository(&self) -> &std::sync::Arc<dyn RunRepository>;
}
pub trait UseRunStepRepository {
    fn step_repository(&self) -> &std::sync::Arc<dyn RunStepRepository>;
}
pub trait UseMessageRepository {
    fn message_repository(&self) -> &std::sync::Arc<dyn MessageRepository>;
}

pub(crate) fn is_active(status: RunStatus) -> bool {
    matches!(status, RunStatus::InProgress | RunStatus::RequiresAction)
}
