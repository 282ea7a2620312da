use crate::app::quota::RunQuota;
use crate::app::RunContext;
use anyhow::Result;
use async_trait::async_trait;
use domain::engine::ToolInputValue;
use domain::error::ApiError;
use domain::event::{RunEventKind, RunStreamEvent};
use domain::id::{AssistantId, RunId, ThreadId, ToolCallId};
use domain::required_action::RequiredAction;
use domain::run::{Run, RunInput, RunStatus};
use domain::tool::{ApprovalRequirement, ToolCall, ToolUsage};
use infra::infra::event::{gate_channel_name, GatePurpose};
use infra::infra::module::RepositoryModule;
use runweaver_base::config::RunConfig;
use runweaver_base::error::OrchestratorError;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct CreateRunParams {
    pub thread_id: ThreadId,
    pub assistant_id: AssistantId,
    pub tools: Vec<ToolUsage>,
    pub tool_approvals: HashMap<String, ApprovalRequirement>,
    pub instructions: Option<String>,
    pub model: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub struct ToolApprovalSubmission {
    pub tool_call_id: ToolCallId,
    pub approve: bool,
}

#[derive(Clone, Debug)]
pub struct ToolOutputSubmission {
    pub tool_call_id: ToolCallId,
    pub output: String,
}

#[derive(Clone, Debug)]
pub struct ToolInputSubmission {
    pub tool_call_id: ToolCallId,
    pub inputs: Vec<ToolInputValue>,
}

/// Run use cases reachable from the HTTP layer. Submit operations never
/// mutate run records: they hand the payload to the suspended worker over
/// the gate channel and the worker performs the write, which keeps every
/// record single-writer without a lock.
#[async_trait]
pub trait RunApp: Send + Sync + 'static {
    async fn create_run(&self, ctx: &RunContext, params: CreateRunParams) -> Result<Run>;
    async fn read_run(&self, run_id: &RunId) -> Result<Run>;
    async fn list_runs(&self, thread_id: &ThreadId) -> Result<Vec<Run>>;
    async fn cancel_run(&self, run_id: &RunId) -> Result<Run>;
    async fn submit_tool_approvals(
        &self,
        run_id: &RunId,
        approvals: Vec<ToolApprovalSubmission>,
    ) -> Result<Run>;
    async fn submit_tool_outputs(
        &self,
        run_id: &RunId,
        outputs: Vec<ToolOutputSubmission>,
    ) -> Result<Run>;
    async fn submit_tool_inputs(
        &self,
        run_id: &RunId,
        inputs: Vec<ToolInputSubmission>,
    ) -> Result<Run>;
    async fn delete_run(&self, run_id: &RunId) -> Result<bool>;
    /// Mark every non-terminal run whose deadline passed as expired.
    async fn expire_stale_runs(&self) -> Result<usize>;
}

pub trait UseRunApp {
    fn run_app(&self) -> &Arc<dyn RunApp + 'static>;
}

#[derive(Clone)]
pub struct RunAppImpl {
    run_config: Arc<RunConfig>,
    repositories: Arc<RepositoryModule>,
    quota: RunQuota,
}

impl RunAppImpl {
    pub fn new(run_config: Arc<RunConfig>, repositories: Arc<RepositoryModule>) -> Self {
        let quota = RunQuota::new(repositories.run_repository.clone(), run_config.clone());
        Self {
            run_config,
            repositories,
            quota,
        }
    }

    async fn find_run(&self, run_id: &RunId) -> Result<Run> {
        self.repositories
            .run_repository
            .find(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("run {run_id}")).into())
    }

    /// Validate that the run is gated on the expected action variant and
    /// that the submissions cover the full set of pending calls.
    fn pending_calls<'a>(
        run: &'a Run,
        expected: &str,
        submitted_ids: &[&ToolCallId],
    ) -> Result<&'a [ToolCall]> {
        if run.status != RunStatus::RequiresAction {
            return Err(OrchestratorError::InvalidParameter(format!(
                "run {} does not require an action",
                run.id
            ))
            .into());
        }
        let action = run.required_action.as_ref().ok_or_else(|| {
            OrchestratorError::RuntimeError(format!(
                "run {} is requires_action without a required action",
                run.id
            ))
        })?;
        if action.kind_name() != expected {
            return Err(OrchestratorError::InvalidParameter(format!(
                "run {} requires {}, not {}",
                run.id,
                action.kind_name(),
                expected
            ))
            .into());
        }
        let pending = action.tool_calls();
        for id in submitted_ids {
            if !pending.iter().any(|call| &call.id == *id) {
                return Err(OrchestratorError::InvalidParameter(format!(
                    "unexpected tool call {id}"
                ))
                .into());
            }
        }
        if submitted_ids.len() < pending.len() {
            return Err(
                OrchestratorError::InvalidParameter("missing tool calls".to_string()).into(),
            );
        }
        Ok(pending)
    }

    async fn publish_to_gate(
        &self,
        run_id: &RunId,
        tool_call_id: &ToolCallId,
        purpose: GatePurpose,
        payload: Vec<u8>,
    ) -> Result<()> {
        let channel = gate_channel_name(run_id, tool_call_id, purpose);
        self.repositories
            .event_publisher
            .publish_raw(&channel, payload, true)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl RunApp for RunAppImpl {
    async fn create_run(&self, ctx: &RunContext, params: CreateRunParams) -> Result<Run> {
        self.quota.ensure_can_create(&ctx.principal_id).await?;

        let mut run = Run::new(RunInput {
            thread_id: params.thread_id,
            assistant_id: params.assistant_id,
            principal_id: ctx.principal_id.clone(),
            tools: params.tools,
            tool_approvals: params.tool_approvals,
            instructions: params.instructions,
            model: params.model,
            metadata: params.metadata,
            expiration_milliseconds: self.run_config.expiration_milliseconds,
        });
        self.repositories.run_repository.create(&run).await?;
        tracing::debug!("created run {} for {}", run.id, ctx.principal_id);

        let publisher = &self.repositories.event_publisher;
        publisher
            .publish_event(&run.id, &RunStreamEvent::run(RunEventKind::RunCreated, &run))
            .await?;
        match self.repositories.job_queue.enqueue(&run.id).await {
            Ok(_) => {
                publisher
                    .publish_event(&run.id, &RunStreamEvent::run(RunEventKind::RunQueued, &run))
                    .await?;
                Ok(run)
            }
            Err(e) => {
                // an unqueued run would otherwise sit invisibly in queued
                // until expiration
                tracing::error!("failed to enqueue run job {}: {:?}", run.id, e);
                run.fail(ApiError::internal("failed to create run job"))?;
                self.repositories.run_repository.upsert(&run).await?;
                publisher
                    .publish_event(&run.id, &RunStreamEvent::run(RunEventKind::RunFailed, &run))
                    .await?;
                publisher
                    .publish_event(&run.id, &RunStreamEvent::done())
                    .await?;
                Err(e)
            }
        }
    }

    async fn read_run(&self, run_id: &RunId) -> Result<Run> {
        self.find_run(run_id).await
    }

    async fn list_runs(&self, thread_id: &ThreadId) -> Result<Vec<Run>> {
        self.repositories
            .run_repository
            .find_by_thread(thread_id)
            .await
    }

    async fn cancel_run(&self, run_id: &RunId) -> Result<Run> {
        let mut run = self.find_run(run_id).await?;
        if run.status != RunStatus::InProgress && run.status != RunStatus::RequiresAction {
            return Err(OrchestratorError::InvalidParameter(
                "only progressing or waiting runs can be cancelled".to_string(),
            )
            .into());
        }
        run.start_cancel()?;
        self.repositories.run_repository.upsert(&run).await?;
        self.repositories
            .event_publisher
            .publish_event(
                &run.id,
                &RunStreamEvent::run(RunEventKind::RunCancelling, &run),
            )
            .await?;
        tracing::info!("run {} marked cancelling", run.id);
        Ok(run)
    }

    async fn submit_tool_approvals(
        &self,
        run_id: &RunId,
        approvals: Vec<ToolApprovalSubmission>,
    ) -> Result<Run> {
        let run = self.find_run(run_id).await?;
        let ids = approvals.iter().map(|a| &a.tool_call_id).collect::<Vec<_>>();
        Self::pending_calls(&run, "submit_tool_approvals", &ids)?;
        for approval in &approvals {
            self.publish_to_gate(
                run_id,
                &approval.tool_call_id,
                GatePurpose::Approve,
                approval.approve.to_string().into_bytes(),
            )
            .await?;
        }
        Ok(run)
    }

    async fn submit_tool_outputs(
        &self,
        run_id: &RunId,
        outputs: Vec<ToolOutputSubmission>,
    ) -> Result<Run> {
        let run = self.find_run(run_id).await?;
        let ids = outputs.iter().map(|o| &o.tool_call_id).collect::<Vec<_>>();
        Self::pending_calls(&run, "submit_tool_outputs", &ids)?;
        for output in &outputs {
            self.publish_to_gate(
                run_id,
                &output.tool_call_id,
                GatePurpose::Output,
                output.output.clone().into_bytes(),
            )
            .await?;
        }
        Ok(run)
    }

    async fn submit_tool_inputs(
        &self,
        run_id: &RunId,
        inputs: Vec<ToolInputSubmission>,
    ) -> Result<Run> {
        let run = self.find_run(run_id).await?;
        let ids = inputs.iter().map(|i| &i.tool_call_id).collect::<Vec<_>>();
        Self::pending_calls(&run, "submit_tool_inputs", &ids)?;
        // reject values for fields the gate did not ask for
        if let Some(RequiredAction::SubmitToolInputs { input_fields, .. }) = &run.required_action {
            for submission in &inputs {
                for value in &submission.inputs {
                    if !input_fields.contains(&value.name) {
                        return Err(OrchestratorError::InvalidParameter(format!(
                            "unexpected input field {}",
                            value.name
                        ))
                        .into());
                    }
                }
            }
        }
        for submission in &inputs {
            self.publish_to_gate(
                run_id,
                &submission.tool_call_id,
                GatePurpose::Input,
                serde_json::to_vec(&submission.inputs)?,
            )
            .await?;
        }
        Ok(run)
    }

    async fn delete_run(&self, run_id: &RunId) -> Result<bool> {
        // removal must be idempotent against a job that is already running
        // or finished
        let removed_job = self.repositories.job_queue.remove(run_id).await?;
        let removed = self.repositories.run_repository.delete(run_id).await?;
        tracing::debug!(
            "delete run {}: record={}, pending_job={}",
            run_id,
            removed,
            removed_job
        );
        Ok(removed)
    }

    async fn expire_stale_runs(&self) -> Result<usize> {
        let now = runweaver_base::datetime::now();
        let stale = self.repositories.run_repository.find_expired(now).await?;
        let mut expired = 0;
        for mut run in stale {
            match run.expire() {
                Ok(()) => {
                    self.repositories.run_repository.upsert(&run).await?;
                    expired += 1;
                }
                Err(e) => {
                    // lost a benign race against the owning worker
                    tracing::debug!("skipping expiration of run {}: {:?}", run.id, e);
                }
            }
        }
        if expired > 0 {
            tracing::info!("expired {} stale runs", expired);
        }
        Ok(expired)
    }
}
