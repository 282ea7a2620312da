use super::{is_active, MessageRepository, RunRepository, RunStepRepository};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::id::{MessageId, PrincipalId, RunId, StepId, ThreadId};
use domain::message::Message;
use domain::run::{Run, RunStatus};
use domain::step::RunStep;
use itertools::Itertools;
use runweaver_base::error::OrchestratorError;
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct MemoryRunRepository {
    runs: Arc<DashMap<RunId, Run>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for MemoryRunRepository {
    async fn create(&self, run: &Run) -> Result<()> {
        if self.runs.contains_key(&run.id) {
            return Err(OrchestratorError::AlreadyExists(format!("run {}", run.id)).into());
        }
        self.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn upsert(&self, run: &Run) -> Result<bool> {
        tracing::debug!("upsert run: {}={}", run.id, run.status);
        Ok(self.runs.insert(run.id.clone(), run.clone()).is_some())
    }

    async fn find(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self.runs.get(id).map(|r| r.clone()))
    }

    async fn find_status(&self, id: &RunId) -> Result<Option<RunStatus>> {
        Ok(self.runs.get(id).map(|r| r.status))
    }

    async fn find_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Run>> {
        Ok(self
            .runs
            .iter()
            .filter(|r| &r.thread_id == thread_id)
            .map(|r| r.clone())
            .sorted_by_key(|r| r.created_at)
            .collect_vec())
    }

    async fn delete(&self, id: &RunId) -> Result<bool> {
        Ok(self.runs.remove(id).is_some())
    }

    async fn count_created_since(
        &self,
        principal_id: &PrincipalId,
        since: DateTime<Utc>,
    ) -> Result<usize> {
        Ok(self
            .runs
            .iter()
            .filter(|r| &r.principal_id == principal_id && r.created_at >= since)
            .count())
    }

    async fn count_active(&self, principal_id: &PrincipalId) -> Result<usize> {
        Ok(self
            .runs
            .iter()
            .filter(|r| &r.principal_id == principal_id && is_active(r.status))
            .count())
    }

    async fn find_expired(&self, at: DateTime<Utc>) -> Result<Vec<Run>> {
        Ok(self
            .runs
            .iter()
            .filter(|r| !r.status.is_terminal() && r.expires_at <= at)
            .map(|r| r.clone())
            .collect_vec())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryRunStepRepository {
    steps: Arc<DashMap<StepId, RunStep>>,
}

impl MemoryRunStepRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStepRepository for MemoryRunStepRepository {
    async fn create(&self, step: &RunStep) -> Result<()> {
        if self.steps.contains_key(&step.id) {
            return Err(OrchestratorError::AlreadyExists(format!("step {}", step.id)).into());
        }
        self.steps.insert(step.id.clone(), step.clone());
        Ok(())
    }

    async fn upsert(&self, step: &RunStep) -> Result<bool> {
        Ok(self.steps.insert(step.id.clone(), step.clone()).is_some())
    }

    async fn find(&self, id: &StepId) -> Result<Option<RunStep>> {
        Ok(self.steps.get(id).map(|s| s.clone()))
    }

    async fn find_by_run(&self, run_id: &RunId) -> Result<Vec<RunStep>> {
        Ok(self
            .steps
            .iter()
            .filter(|s| &s.run_id == run_id)
            .map(|s| s.clone())
            .sorted_by_key(|s| s.created_at)
            .collect_vec())
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryMessageRepository {
    messages: Arc<DashMap<MessageId, Message>>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create(&self, message: &Message) -> Result<()> {
        if self.messages.contains_key(&message.id) {
            return Err(
                OrchestratorError::AlreadyExists(format!("message {}", message.id)).into(),
            );
        }
        self.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn upsert(&self, message: &Message) -> Result<bool> {
        Ok(self
            .messages
            .insert(message.id.clone(), message.clone())
            .is_some())
    }

    async fn find(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.messages.get(id).map(|m| m.clone()))
    }

    async fn find_by_run(&self, run_id: &RunId) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| &m.run_id == run_id)
            .map(|m| m.clone())
            .sorted_by_key(|m| m.created_at)
            .collect_vec())
    }

    async fn find_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| &m.thread_id == thread_id)
            .map(|m| m.clone())
            .sorted_by_key(|m| m.created_at)
            .collect_vec())
    }
}
