use crate::id::{AssistantId, RunId, ThreadId};
use crate::message::Message;
use crate::step::EmitterEvent;
use crate::tool::{EngineToolResult, ToolUsage};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

/// Everything the engine needs for one run; re-loaded from the store by the
/// worker, never taken from ambient state.
#[derive(Clone, Debug)]
pub struct EngineInput {
    pub run_id: RunId,
    pub thread_id: ThreadId,
    pub assistant_id: AssistantId,
    pub model: String,
    pub instructions: Option<String>,
    pub tools: Vec<ToolUsage>,
    /// Prior conversation on the thread, oldest first.
    pub memory: Vec<Message>,
}

/// Name/value pair a client supplies to fulfil an input gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInputValue {
    pub name: String,
    pub value: String,
}

/// Reply to a `ToolStarted` event once records are persisted and the gate
/// (if any) has resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum GateVerdict {
    /// No gate, or the client approved: the engine executes the tool.
    Proceed,
    /// Input gate fulfilled: execute with the supplied values injected.
    ProceedWithInputs(Vec<ToolInputValue>),
    /// The client computed the output; the engine must not execute the tool
    /// and reports this value as its result.
    ProvideOutput(String),
}

/// Events emitted by the agent engine, consumed by the worker's single
/// dispatcher loop in emission order.
pub enum EngineEvent {
    ToolStarted {
        name: String,
        input: Value,
        /// Input fields the engine cannot execute the tool without; the
        /// orchestrator gates on the client supplying them.
        missing_inputs: Vec<String>,
        meta: Option<EmitterEvent>,
        verdict: oneshot::Sender<Result<GateVerdict>>,
    },
    ToolSucceeded {
        result: EngineToolResult,
    },
    ToolFailed {
        error: anyhow::Error,
    },
    MessageDelta {
        text: String,
        meta: Option<EmitterEvent>,
    },
    MessageCompleted {
        /// Final text if the engine overrides the accumulated deltas.
        text: Option<String>,
    },
    ThoughtDelta {
        text: String,
        meta: Option<EmitterEvent>,
    },
}

impl std::fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::ToolStarted { name, input, .. } => f
                .debug_struct("ToolStarted")
                .field("name", name)
                .field("input", input)
                .finish_non_exhaustive(),
            EngineEvent::ToolSucceeded { result } => f
                .debug_struct("ToolSucceeded")
                .field("result", result)
                .finish(),
            EngineEvent::ToolFailed { error } => {
                f.debug_struct("ToolFailed").field("error", error).finish()
            }
            EngineEvent::MessageDelta { text, .. } => f
                .debug_struct("MessageDelta")
                .field("text", text)
                .finish_non_exhaustive(),
            EngineEvent::MessageCompleted { text } => f
                .debug_struct("MessageCompleted")
                .field("text", text)
                .finish(),
            EngineEvent::ThoughtDelta { text, .. } => f
                .debug_struct("ThoughtDelta")
                .field("text", text)
                .finish_non_exhaustive(),
        }
    }
}
