use anyhow::Result;
use domain::engine::ToolInputValue;
use domain::event::{RunEventKind, RunStreamEvent};
use domain::required_action::RequiredAction;
use domain::run::Run;
use domain::tool::ToolCall;
use infra::infra::event::{
    gate_channel_name, EventSubscription, GatePurpose, RunEventPublisher, RunEventSubscriber,
};
use infra::infra::repository::RunRepository;
use runweaver_base::error::OrchestratorError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Suspends the owning worker on an out-of-band client decision without
/// busy-waiting.
///
/// The order of operations closes the race between "client fetches run
/// state" and "client's message arrives": the subscription is registered
/// BEFORE requires_action is persisted or announced, so a client that
/// reacts instantly to the published state still cannot beat the receiver.
/// After the announcement the stream is terminated with the done sentinel;
/// the client is expected to resubmit, not to keep listening.
#[derive(Clone)]
pub struct ActionGate {
    run_repository: Arc<dyn RunRepository>,
    event_publisher: Arc<dyn RunEventPublisher>,
    event_subscriber: Arc<dyn RunEventSubscriber>,
}

impl ActionGate {
    pub fn new(
        run_repository: Arc<dyn RunRepository>,
        event_publisher: Arc<dyn RunEventPublisher>,
        event_subscriber: Arc<dyn RunEventSubscriber>,
    ) -> Self {
        Self {
            run_repository,
            event_publisher,
            event_subscriber,
        }
    }

    /// Block until the client approves or denies the call. Denial is a
    /// non-retryable tool-level error; the engine decides what it means
    /// for the run.
    pub async fn await_approval(
        &self,
        run: &mut Run,
        tool_call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let payload = self
            .suspend(
                run,
                tool_call,
                GatePurpose::Approve,
                RequiredAction::SubmitToolApprovals {
                    tool_calls: vec![tool_call.clone()],
                },
                cancel,
            )
            .await?;
        if payload == b"true" {
            Ok(())
        } else {
            Err(OrchestratorError::ToolRejected(
                "user has not approved this tool to run".to_string(),
            )
            .into())
        }
    }

    /// Block until the client supplies the named input fields; returns the
    /// values for injection into the tool's execution environment.
    pub async fn await_inputs(
        &self,
        run: &mut Run,
        tool_call: &ToolCall,
        input_fields: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ToolInputValue>> {
        let payload = self
            .suspend(
                run,
                tool_call,
                GatePurpose::Input,
                RequiredAction::SubmitToolInputs {
                    tool_calls: vec![tool_call.clone()],
                    input_fields,
                },
                cancel,
            )
            .await?;
        serde_json::from_slice::<Vec<ToolInputValue>>(&payload)
            .map_err(|e| OrchestratorError::SerdeJsonError(e).into())
    }

    /// Block until the client submits the tool's output (tools whose
    /// execution happens on the client side).
    pub async fn await_output(
        &self,
        run: &mut Run,
        tool_call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let payload = self
            .suspend(
                run,
                tool_call,
                GatePurpose::Output,
                RequiredAction::SubmitToolOutputs {
                    tool_calls: vec![tool_call.clone()],
                },
                cancel,
            )
            .await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    async fn suspend(
        &self,
        run: &mut Run,
        tool_call: &ToolCall,
        purpose: GatePurpose,
        action: RequiredAction,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let channel = gate_channel_name(&run.id, &tool_call.id, purpose);
        // subscribe first, then announce
        let subscription = self.event_subscriber.subscribe(&channel).await?;

        run.require_action(action)?;
        self.run_repository.upsert(run).await?;
        self.event_publisher
            .publish_event(
                &run.id,
                &RunStreamEvent::run(RunEventKind::RunRequiresAction, run),
            )
            .await?;
        self.event_publisher
            .publish_event(&run.id, &RunStreamEvent::done())
            .await?;
        tracing::info!("run {} suspended on {} gate", run.id, purpose);

        let payload = Self::wait(subscription, cancel).await?;

        run.submit_action()?;
        self.run_repository.upsert(run).await?;
        tracing::info!("run {} resumed from {} gate", run.id, purpose);
        Ok(payload)
    }

    /// Select over {client message, cancellation}. Cancellation of the run
    /// while suspended must still unblock this wait; the subscription is
    /// dropped either way, so nothing leaks.
    async fn wait(
        mut subscription: EventSubscription,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        tokio::select! {
            payload = subscription.next_payload() => payload.ok_or_else(|| {
                OrchestratorError::ChanError(anyhow::anyhow!(
                    "gate channel {} closed before a message arrived",
                    subscription.channel()
                ))
                .into()
            }),
            _ = cancel.cancelled() => {
                tracing::info!("gate wait on {} unblocked by cancellation", subscription.channel());
                Err(OrchestratorError::Cancelled(
                    "run cancelled while waiting for client action".to_string(),
                )
                .into())
            }
        }
    }
}
