use crate::dto;
use crate::message::Message;
use crate::run::Run;
use crate::step::RunStep;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{AsRefStr, Display, EnumString};

pub const DONE_PAYLOAD: &str = "[DONE]";

/// Fixed vocabulary of stream event names. Every execution path ends with
/// exactly one terminal run event followed by `done`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
pub enum RunEventKind {
    #[serde(rename = "thread.run.created")]
    #[strum(serialize = "thread.run.created")]
    RunCreated,
    #[serde(rename = "thread.run.queued")]
    #[strum(serialize = "thread.run.queued")]
    RunQueued,
    #[serde(rename = "thread.run.in_progress")]
    #[strum(serialize = "thread.run.in_progress")]
    RunInProgress,
    #[serde(rename = "thread.run.requires_action")]
    #[strum(serialize = "thread.run.requires_action")]
    RunRequiresAction,
    #[serde(rename = "thread.run.completed")]
    #[strum(serialize = "thread.run.completed")]
    RunCompleted,
    #[serde(rename = "thread.run.failed")]
    #[strum(serialize = "thread.run.failed")]
    RunFailed,
    #[serde(rename = "thread.run.cancelling")]
    #[strum(serialize = "thread.run.cancelling")]
    RunCancelling,
    #[serde(rename = "thread.run.cancelled")]
    #[strum(serialize = "thread.run.cancelled")]
    RunCancelled,
    #[serde(rename = "thread.run.expired")]
    #[strum(serialize = "thread.run.expired")]
    RunExpired,
    #[serde(rename = "thread.run.step.created")]
    #[strum(serialize = "thread.run.step.created")]
    StepCreated,
    #[serde(rename = "thread.run.step.in_progress")]
    #[strum(serialize = "thread.run.step.in_progress")]
    StepInProgress,
    #[serde(rename = "thread.run.step.delta")]
    #[strum(serialize = "thread.run.step.delta")]
    StepDelta,
    #[serde(rename = "thread.run.step.completed")]
    #[strum(serialize = "thread.run.step.completed")]
    StepCompleted,
    #[serde(rename = "thread.run.step.failed")]
    #[strum(serialize = "thread.run.step.failed")]
    StepFailed,
    #[serde(rename = "thread.run.step.cancelled")]
    #[strum(serialize = "thread.run.step.cancelled")]
    StepCancelled,
    #[serde(rename = "thread.message.created")]
    #[strum(serialize = "thread.message.created")]
    MessageCreated,
    #[serde(rename = "thread.message.in_progress")]
    #[strum(serialize = "thread.message.in_progress")]
    MessageInProgress,
    #[serde(rename = "thread.message.delta")]
    #[strum(serialize = "thread.message.delta")]
    MessageDelta,
    #[serde(rename = "thread.message.completed")]
    #[strum(serialize = "thread.message.completed")]
    MessageCompleted,
    #[serde(rename = "thread.message.incomplete")]
    #[strum(serialize = "thread.message.incomplete")]
    MessageIncomplete,
    #[serde(rename = "done")]
    #[strum(serialize = "done")]
    Done,
    #[serde(rename = "error")]
    #[strum(serialize = "error")]
    Error,
}

impl RunEventKind {
    /// Sentinels end a subscriber's stream; everything after them is lost
    /// on purpose until the client re-attaches.
    pub fn is_stream_end(&self) -> bool {
        matches!(self, RunEventKind::Done | RunEventKind::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunStreamEvent {
    pub event: RunEventKind,
    pub data: Value,
}

impl RunStreamEvent {
    pub fn run(event: RunEventKind, run: &Run) -> Self {
        Self {
            event,
            data: dto::to_run_dto(run),
        }
    }

    pub fn step(event: RunEventKind, step: &RunStep) -> Self {
        Self {
            event,
            data: dto::to_run_step_dto(step),
        }
    }

    pub fn step_delta(step: &RunStep, appended: &str) -> Self {
        Self {
            event: RunEventKind::StepDelta,
            data: dto::to_run_step_delta_dto(step, appended),
        }
    }

    pub fn message(event: RunEventKind, message: &Message) -> Self {
        Self {
            event,
            data: dto::to_message_dto(message),
        }
    }

    pub fn message_delta(message: &Message, appended: &str) -> Self {
        Self {
            event: RunEventKind::MessageDelta,
            data: dto::to_message_delta_dto(message, appended),
        }
    }

    pub fn done() -> Self {
        Self {
            event: RunEventKind::Done,
            data: json!(DONE_PAYLOAD),
        }
    }

    pub fn error(data: Value) -> Self {
        Self {
            event: RunEventKind::Error,
            data,
        }
    }
}
