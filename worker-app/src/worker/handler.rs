use crate::worker::gate::ActionGate;
use anyhow::Result;
use domain::engine::{EngineEvent, GateVerdict};
use domain::error::ApiError;
use domain::event::{RunEventKind, RunStreamEvent};
use domain::message::Message;
use domain::run::Run;
use domain::step::{EmitterEvent, RunStep, RunStepDetails};
use domain::tool::{EngineToolResult, ToolCall, ToolFailurePolicy};
use infra::infra::event::RunEventPublisher;
use infra::infra::repository::{MessageRepository, RunStepRepository};
use runweaver_base::error::is_cancellation_error;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Consumes the engine's event stream for one run, translating each event
/// into persisted records and published stream events. Runs strictly
/// sequentially: the per-run context below is why "at most one non-terminal
/// step per run" holds without any locking.
pub struct EngineEventHandler {
    run: Run,
    step: Option<RunStep>,
    message: Option<Message>,
    tool_call: Option<ToolCall>,
    /// A failed step whose tool kind fails the whole run, remembered until
    /// the executor classifies the outcome.
    fatal_error: Option<ApiError>,
    step_repository: Arc<dyn RunStepRepository>,
    message_repository: Arc<dyn MessageRepository>,
    event_publisher: Arc<dyn RunEventPublisher>,
    gate: ActionGate,
    cancel: CancellationToken,
}

impl EngineEventHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run: Run,
        step_repository: Arc<dyn RunStepRepository>,
        message_repository: Arc<dyn MessageRepository>,
        event_publisher: Arc<dyn RunEventPublisher>,
        gate: ActionGate,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run,
            step: None,
            message: None,
            tool_call: None,
            fatal_error: None,
            step_repository,
            message_repository,
            event_publisher,
            gate,
            cancel,
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn fatal_error(&self) -> Option<&ApiError> {
        self.fatal_error.as_ref()
    }

    pub fn into_run(self) -> Run {
        self.run
    }

    pub async fn handle(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::ToolStarted {
                name,
                input,
                missing_inputs,
                meta,
                verdict,
            } => {
                self.on_tool_started(name, input, missing_inputs, meta, verdict)
                    .await
            }
            EngineEvent::ToolSucceeded { result } => self.on_tool_succeeded(result).await,
            EngineEvent::ToolFailed { error } => self.on_error(&error).await,
            EngineEvent::MessageDelta { text, meta } => self.on_message_delta(&text, meta).await,
            EngineEvent::MessageCompleted { text } => self.on_message_completed(text).await,
            EngineEvent::ThoughtDelta { text, meta } => self.on_thought_delta(&text, meta).await,
        }
    }

    /// Engine-level failure (including an error returned instead of
    /// emitted): finalize whatever is still open.
    pub async fn on_engine_error(&mut self, error: &anyhow::Error) -> Result<()> {
        self.on_error(error).await
    }

    /// Engine finished cleanly: close a trailing thought step and guard
    /// against contract violations leaving units open.
    pub async fn on_engine_success(&mut self) -> Result<()> {
        self.close_open_thought().await?;
        if let Some(mut message) = self.message.take() {
            tracing::warn!(
                "engine finished with message {} still open, marking incomplete",
                message.id
            );
            message.mark_incomplete();
            self.message_repository.upsert(&message).await?;
            self.publish(RunStreamEvent::message(
                RunEventKind::MessageIncomplete,
                &message,
            ))
            .await?;
        }
        if let Some(mut step) = self.step.take() {
            tracing::warn!("engine finished with step {} still open", step.id);
            step.fail(ApiError::internal("tool call never finished"))?;
            self.step_repository.upsert(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepFailed, &step))
                .await?;
            self.tool_call = None;
        }
        Ok(())
    }

    async fn publish(&self, event: RunStreamEvent) -> Result<()> {
        self.event_publisher
            .publish_event(&self.run.id, &event)
            .await
            .map(|_| ())
    }

    async fn on_tool_started(
        &mut self,
        name: String,
        input: Value,
        missing_inputs: Vec<String>,
        meta: Option<EmitterEvent>,
        verdict: oneshot::Sender<Result<GateVerdict>>,
    ) -> Result<()> {
        let decision = self.start_tool(name, input, missing_inputs, meta).await;
        if verdict.send(decision).is_err() {
            tracing::warn!(
                "engine for run {} dropped its verdict receiver",
                self.run.id
            );
        }
        Ok(())
    }

    async fn start_tool(
        &mut self,
        name: String,
        input: Value,
        missing_inputs: Vec<String>,
        meta: Option<EmitterEvent>,
    ) -> Result<GateVerdict> {
        self.close_open_thought().await?;
        if let Some(step) = &self.step {
            tracing::warn!(
                "tool {} started while run step {} has not finished",
                name,
                step.id
            );
        }
        if let Some(call) = &self.tool_call {
            tracing::warn!(
                "tool {} started while call {} has not finished",
                name,
                call.id
            );
        }

        let call = ToolCall::classify(&self.run.tools, &name, &input)?;
        let step = RunStep::new(
            self.run.id.clone(),
            self.run.thread_id.clone(),
            self.run.assistant_id.clone(),
            RunStepDetails::ToolCalls {
                tool_calls: vec![call.clone()],
            },
            meta,
        );
        self.step_repository.create(&step).await?;
        self.publish(RunStreamEvent::step(RunEventKind::StepCreated, &step))
            .await?;
        self.tool_call = Some(call.clone());
        self.step = Some(step);

        if self.run.approval_requirement(&call.approval_key())
            == Some(domain::tool::ApprovalRequirement::Always)
        {
            self.gate
                .await_approval(&mut self.run, &call, &self.cancel)
                .await?;
        }

        if let Some(step) = &self.step {
            self.publish(RunStreamEvent::step(RunEventKind::StepInProgress, step))
                .await?;
        }

        if !missing_inputs.is_empty() {
            let values = self
                .gate
                .await_inputs(&mut self.run, &call, missing_inputs, &self.cancel)
                .await?;
            Ok(GateVerdict::ProceedWithInputs(values))
        } else if call.awaits_client_output() {
            let output = self
                .gate
                .await_output(&mut self.run, &call, &self.cancel)
                .await?;
            Ok(GateVerdict::ProvideOutput(output))
        } else {
            Ok(GateVerdict::Proceed)
        }
    }

    async fn on_tool_succeeded(&mut self, result: EngineToolResult) -> Result<()> {
        let Some(mut step) = self.step.take() else {
            tracing::warn!("tool finished with missing run step");
            return Ok(());
        };
        let Some(mut call) = self.tool_call.take() else {
            tracing::warn!("tool finished with missing call");
            return Ok(());
        };

        if let Err(e) = call.finalize(result) {
            // engine/orchestrator contract violation, not a user error
            step.fail(ApiError::internal(format!("{e}")))?;
            self.step_repository.upsert(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepFailed, &step))
                .await?;
            return Err(e);
        }
        step.update_tool_call(&call);
        step.complete()?;
        self.step_repository.upsert(&step).await?;
        self.publish(RunStreamEvent::step(RunEventKind::StepCompleted, &step))
            .await?;
        Ok(())
    }

    async fn on_error(&mut self, error: &anyhow::Error) -> Result<()> {
        if let Some(mut message) = self.message.take() {
            message.mark_incomplete();
            self.message_repository.upsert(&message).await?;
            self.publish(RunStreamEvent::message(
                RunEventKind::MessageIncomplete,
                &message,
            ))
            .await?;
        }
        let Some(mut step) = self.step.take() else {
            return Ok(());
        };
        let call = self.tool_call.take();
        if is_cancellation_error(error) {
            step.cancel()?;
            self.step_repository.upsert(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepCancelled, &step))
                .await?;
        } else {
            let api_error = ApiError::from_error(error);
            step.fail(api_error.clone())?;
            self.step_repository.upsert(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepFailed, &step))
                .await?;
            if call.map(|c| c.failure_policy()) == Some(ToolFailurePolicy::FailRun) {
                self.fatal_error = Some(api_error);
            }
        }
        Ok(())
    }

    async fn on_message_delta(&mut self, text: &str, meta: Option<EmitterEvent>) -> Result<()> {
        if self.message.is_none() {
            self.close_open_thought().await?;
            if let Some(step) = &self.step {
                tracing::warn!(
                    "message creation started while run step {} has not finished",
                    step.id
                );
            }
            let message = Message::new_in_progress(self.run.thread_id.clone(), self.run.id.clone());
            let step = RunStep::new(
                self.run.id.clone(),
                self.run.thread_id.clone(),
                self.run.assistant_id.clone(),
                RunStepDetails::MessageCreation {
                    message_id: message.id.clone(),
                },
                meta,
            );
            self.message_repository.create(&message).await?;
            self.step_repository.create(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepCreated, &step))
                .await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepInProgress, &step))
                .await?;
            self.publish(RunStreamEvent::message(RunEventKind::MessageCreated, &message))
                .await?;
            self.publish(RunStreamEvent::message(
                RunEventKind::MessageInProgress,
                &message,
            ))
            .await?;
            self.message = Some(message);
            self.step = Some(step);
        }
        let delta_event = self.message.as_mut().map(|message| {
            message.append_delta(text);
            RunStreamEvent::message_delta(message, text)
        });
        if let Some(event) = delta_event {
            self.publish(event).await?;
        }
        Ok(())
    }

    async fn on_message_completed(&mut self, text: Option<String>) -> Result<()> {
        let Some(mut message) = self.message.take() else {
            tracing::warn!("engine reported a final answer with no open message");
            return Ok(());
        };
        message.complete(text);
        self.message_repository.upsert(&message).await?;
        self.publish(RunStreamEvent::message(
            RunEventKind::MessageCompleted,
            &message,
        ))
        .await?;
        if let Some(mut step) = self.step.take() {
            step.complete()?;
            self.step_repository.upsert(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepCompleted, &step))
                .await?;
        }
        self.tool_call = None;
        Ok(())
    }

    async fn on_thought_delta(&mut self, text: &str, meta: Option<EmitterEvent>) -> Result<()> {
        let has_thought_step = matches!(
            self.step.as_ref().map(|s| &s.details),
            Some(RunStepDetails::Thought { .. })
        );
        if !has_thought_step {
            if let Some(step) = &self.step {
                tracing::warn!("thought delta while run step {} is open", step.id);
                return Ok(());
            }
            let step = RunStep::new(
                self.run.id.clone(),
                self.run.thread_id.clone(),
                self.run.assistant_id.clone(),
                RunStepDetails::Thought {
                    content: String::new(),
                },
                meta,
            );
            self.step_repository.create(&step).await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepCreated, &step))
                .await?;
            self.publish(RunStreamEvent::step(RunEventKind::StepInProgress, &step))
                .await?;
            self.step = Some(step);
        }
        let delta_event = self.step.as_mut().map(|step| {
            if let RunStepDetails::Thought { content } = &mut step.details {
                content.push_str(text);
            }
            RunStreamEvent::step_delta(step, text)
        });
        if let Some(event) = delta_event {
            self.publish(event).await?;
        }
        Ok(())
    }

    /// The next unit of work starting (or the run ending) closes a
    /// streaming thought step; there is no dedicated completion event for
    /// thoughts in the engine protocol.
    async fn close_open_thought(&mut self) -> Result<()> {
        let is_thought = matches!(
            self.step.as_ref().map(|s| &s.details),
            Some(RunStepDetails::Thought { .. })
        );
        if is_thought {
            if let Some(mut step) = self.step.take() {
                step.complete()?;
                self.step_repository.upsert(&step).await?;
                self.publish(RunStreamEvent::step(RunEventKind::StepCompleted, &step))
                    .await?;
            }
        }
        Ok(())
    }
}
