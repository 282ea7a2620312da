use anyhow::Result;
use async_trait::async_trait;
use domain::engine::{EngineEvent, EngineInput};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod scripted;

/// The opaque reasoning loop. The orchestrator never looks inside it; the
/// whole contract is the event channel:
///
/// - events are emitted in execution order on a single channel;
/// - every `ToolStarted` carries a verdict receiver the engine MUST await
///   before executing the tool. `Proceed`/`ProceedWithInputs` mean execute
///   (with the supplied inputs injected), `ProvideOutput` means the client
///   computed the result and the engine reports it as the tool's output
///   without executing anything;
/// - an `Err` verdict is surfaced as a tool failure (`ToolFailed`); whether
///   the run then continues or unwinds is the engine's decision;
/// - the cancellation token must be observed at every suspension point
///   (model call, tool execution, verdict wait) and unwound from promptly.
#[async_trait]
pub trait AgentEngine: Send + Sync + 'static {
    async fn run(
        &self,
        input: EngineInput,
        events: mpsc::Sender<EngineEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}
