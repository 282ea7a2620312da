use crate::error::ApiError;
use crate::id::{AssistantId, MessageId, RunId, StepId, ThreadId};
use crate::tool::ToolCall;
use anyhow::Result;
use chrono::{DateTime, Utc};
use runweaver_base::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStepStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunStepDetails {
    MessageCreation { message_id: MessageId },
    ToolCalls { tool_calls: Vec<ToolCall> },
    Thought { content: String },
}

/// Trace metadata propagated from the engine event that opened the step,
/// kept for later trace reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmitterEvent {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub parent_run_id: Option<String>,
}

/// One discrete unit of work within a run. The orchestrator is sequential
/// per run: at most one step is non-terminal at any time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: StepId,
    pub run_id: RunId,
    pub thread_id: ThreadId,
    pub assistant_id: AssistantId,
    pub status: RunStepStatus,
    pub details: RunStepDetails,
    #[serde(default)]
    pub last_error: Option<ApiError>,
    #[serde(default)]
    pub event: Option<EmitterEvent>,
    pub created_at: DateTime<Utc>,
}

impl RunStep {
    pub fn new(
        run_id: RunId,
        thread_id: ThreadId,
        assistant_id: AssistantId,
        details: RunStepDetails,
        event: Option<EmitterEvent>,
    ) -> Self {
        Self {
            id: StepId::generate(),
            run_id,
            thread_id,
            assistant_id,
            status: RunStepStatus::InProgress,
            details,
            last_error: None,
            event,
            created_at: runweaver_base::datetime::now(),
        }
    }

    fn assert_in_progress(&self) -> Result<()> {
        if self.status == RunStepStatus::InProgress {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidStateTransition(format!(
                "run step {} already finalized as {}",
                self.id, self.status
            ))
            .into())
        }
    }

    pub fn complete(&mut self) -> Result<()> {
        self.assert_in_progress()?;
        self.status = RunStepStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self, error: ApiError) -> Result<()> {
        self.assert_in_progress()?;
        self.status = RunStepStatus::Failed;
        self.last_error = Some(error);
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.assert_in_progress()?;
        self.status = RunStepStatus::Cancelled;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStepStatus::InProgress
    }

    /// Replace the persisted tool call after finalization attached output.
    pub fn update_tool_call(&mut self, updated: &ToolCall) {
        if let RunStepDetails::ToolCalls { tool_calls } = &mut self.details {
            for call in tool_calls.iter_mut() {
                if call.id == updated.id {
                    *call = updated.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolCallDetails, ToolUsage};

    fn step_with_call() -> (RunStep, ToolCall) {
        let call = ToolCall::classify(
            &[ToolUsage::CodeInterpreter],
            "code_interpreter",
            &serde_json::json!({"code": "print(1)"}),
        )
        .unwrap();
        let step = RunStep::new(
            RunId::from("run_1"),
            ThreadId::from("thread_1"),
            AssistantId::from("asst_1"),
            RunStepDetails::ToolCalls {
                tool_calls: vec![call.clone()],
            },
            None,
        );
        (step, call)
    }

    #[test]
    fn test_finalize_once() {
        let (mut step, _) = step_with_call();
        step.complete().unwrap();
        assert!(step.is_terminal());
        assert!(step.fail(ApiError::internal("late")).is_err());
        assert!(step.cancel().is_err());
    }

    #[test]
    fn test_update_tool_call_replaces_by_id() {
        let (mut step, mut call) = step_with_call();
        call.finalize(crate::tool::EngineToolResult::CodeInterpreter {
            stdout: "ok".to_string(),
            stderr: String::new(),
            output_file_ids: vec![],
        })
        .unwrap();
        step.update_tool_call(&call);
        match &step.details {
            RunStepDetails::ToolCalls { tool_calls } => match &tool_calls[0].details {
                ToolCallDetails::CodeInterpreter { logs, .. } => {
                    assert_eq!(logs[0], "ok");
                }
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }
}
