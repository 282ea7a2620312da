use crate::error::ApiError;
use crate::id::{AssistantId, PrincipalId, RunId, ThreadId};
use crate::required_action::RequiredAction;
use crate::tool::{ApprovalRequirement, ToolUsage};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use runweaver_base::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Failed | RunStatus::Completed | RunStatus::Expired
        )
    }
}

/// One execution of an agent against a thread. The top-level state machine;
/// mutated only by the worker that owns the run for its whole lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub assistant_id: AssistantId,
    pub principal_id: PrincipalId,
    pub status: RunStatus,
    pub tools: Vec<ToolUsage>,
    #[serde(default)]
    pub tool_approvals: HashMap<String, ApprovalRequirement>,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<ApiError>,
    #[serde(default)]
    pub instructions: Option<String>,
    pub model: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct RunInput {
    pub thread_id: ThreadId,
    pub assistant_id: AssistantId,
    pub principal_id: PrincipalId,
    pub tools: Vec<ToolUsage>,
    pub tool_approvals: HashMap<String, ApprovalRequirement>,
    pub instructions: Option<String>,
    pub model: String,
    pub metadata: HashMap<String, String>,
    pub expiration_milliseconds: u64,
}

impl Run {
    pub fn new(input: RunInput) -> Self {
        let created_at = runweaver_base::datetime::now();
        let expires_at = created_at + Duration::milliseconds(input.expiration_milliseconds as i64);
        Self {
            id: RunId::generate(),
            thread_id: input.thread_id,
            assistant_id: input.assistant_id,
            principal_id: input.principal_id,
            status: RunStatus::Queued,
            tools: input.tools,
            tool_approvals: input.tool_approvals,
            required_action: None,
            last_error: None,
            instructions: input.instructions,
            model: input.model,
            metadata: input.metadata,
            created_at,
            expires_at,
            started_at: None,
            cancelled_at: None,
            failed_at: None,
            completed_at: None,
        }
    }

    fn assert_current_status(&self, allowed: &[RunStatus]) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidStateTransition(format!(
                "run {} state {} is not in {:?}",
                self.id, self.status, allowed
            ))
            .into())
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.assert_current_status(&[RunStatus::Queued])?;
        self.status = RunStatus::InProgress;
        self.started_at = Some(runweaver_base::datetime::now());
        Ok(())
    }

    pub fn start_cancel(&mut self) -> Result<()> {
        self.assert_current_status(&[RunStatus::InProgress, RunStatus::RequiresAction])?;
        self.status = RunStatus::Cancelling;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.assert_current_status(&[RunStatus::Cancelling])?;
        self.status = RunStatus::Cancelled;
        self.cancelled_at = Some(runweaver_base::datetime::now());
        Ok(())
    }

    pub fn fail(&mut self, error: ApiError) -> Result<()> {
        self.assert_current_status(&[
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::RequiresAction,
            RunStatus::Cancelling,
        ])?;
        self.status = RunStatus::Failed;
        self.failed_at = Some(runweaver_base::datetime::now());
        self.last_error = Some(error);
        Ok(())
    }

    /// A run can expire while waiting on anything, including a cancel that
    /// never finished.
    pub fn expire(&mut self) -> Result<()> {
        self.assert_current_status(&[
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::RequiresAction,
            RunStatus::Cancelling,
        ])?;
        self.status = RunStatus::Expired;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.assert_current_status(&[RunStatus::InProgress])?;
        self.status = RunStatus::Completed;
        self.completed_at = Some(runweaver_base::datetime::now());
        Ok(())
    }

    pub fn require_action(&mut self, action: RequiredAction) -> Result<()> {
        self.assert_current_status(&[RunStatus::InProgress])?;
        self.status = RunStatus::RequiresAction;
        self.required_action = Some(action);
        Ok(())
    }

    pub fn submit_action(&mut self) -> Result<()> {
        self.assert_current_status(&[RunStatus::RequiresAction])?;
        self.status = RunStatus::InProgress;
        self.required_action = None;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.expires_at
    }

    pub fn approval_requirement(&self, key: &str) -> Option<ApprovalRequirement> {
        self.tool_approvals.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiErrorCode;
    use crate::tool::ToolCall;

    fn new_run() -> Run {
        Run::new(RunInput {
            thread_id: ThreadId::from("thread_1"),
            assistant_id: AssistantId::from("asst_1"),
            principal_id: PrincipalId::from("user_1"),
            tools: vec![],
            tool_approvals: HashMap::new(),
            instructions: None,
            model: "meta-llama/llama-3-1-70b-instruct".to_string(),
            metadata: HashMap::new(),
            expiration_milliseconds: 600_000,
        })
    }

    fn required_approval() -> RequiredAction {
        RequiredAction::SubmitToolApprovals {
            tool_calls: vec![ToolCall::classify(
                &[ToolUsage::CodeInterpreter],
                "code_interpreter",
                &serde_json::json!({"code": "1"}),
            )
            .unwrap()],
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = new_run();
        assert_eq!(run.status, RunStatus::Queued);
        run.start().unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.started_at.is_some());
        run.require_action(required_approval()).unwrap();
        assert_eq!(run.status, RunStatus::RequiresAction);
        run.submit_action().unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.required_action.is_none());
        run.complete().unwrap();
        assert!(run.is_terminal());
        assert!(run.completed_at.is_some());
        assert!(run.cancelled_at.is_none());
        assert!(run.failed_at.is_none());
    }

    #[test]
    fn test_cancel_requires_cancelling() {
        let mut run = new_run();
        run.start().unwrap();
        assert!(run.cancel().is_err());
        run.start_cancel().unwrap();
        run.cancel().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.cancelled_at.is_some());
        // terminal: no further transitions
        assert!(run.cancel().is_err());
        assert!(run.start().is_err());
        assert!(run.expire().is_err());
    }

    #[test]
    fn test_fail_sets_error_and_timestamp() {
        let mut run = new_run();
        run.start().unwrap();
        run.fail(ApiError::internal("engine blew up")).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.failed_at.is_some());
        assert_eq!(
            run.last_error.as_ref().unwrap().code,
            ApiErrorCode::InternalServerError
        );
        assert!(run.fail(ApiError::internal("again")).is_err());
    }

    #[test]
    fn test_expire_from_every_waiting_state() {
        let preparations: Vec<fn(&mut Run)> = vec![
            |_| {},
            |r| r.start().unwrap(),
            |r| {
                r.start().unwrap();
                r.require_action(RequiredAction::SubmitToolApprovals {
                    tool_calls: vec![ToolCall::classify(
                        &[ToolUsage::CodeInterpreter],
                        "code_interpreter",
                        &serde_json::json!({"code": "1"}),
                    )
                    .unwrap()],
                })
                .unwrap();
            },
            |r| {
                r.start().unwrap();
                r.start_cancel().unwrap();
            },
        ];
        for prepare in preparations {
            let mut run = new_run();
            prepare(&mut run);
            run.expire().unwrap();
            assert_eq!(run.status, RunStatus::Expired);
        }
    }

    #[test]
    fn test_expire_not_allowed_from_terminal() {
        let mut run = new_run();
        run.start().unwrap();
        run.complete().unwrap();
        assert!(run.expire().is_err());
    }

    #[test]
    fn test_start_twice_is_error() {
        let mut run = new_run();
        run.start().unwrap();
        assert!(run.start().is_err());
    }

    #[test]
    fn test_exactly_one_terminal_timestamp() {
        let mut cancelled = new_run();
        cancelled.start().unwrap();
        cancelled.start_cancel().unwrap();
        cancelled.cancel().unwrap();
        assert!(cancelled.cancelled_at.is_some());
        assert!(cancelled.failed_at.is_none() && cancelled.completed_at.is_none());

        let mut failed = new_run();
        failed.start().unwrap();
        failed.fail(ApiError::internal("x")).unwrap();
        assert!(failed.failed_at.is_some());
        assert!(failed.cancelled_at.is_none() && failed.completed_at.is_none());
    }

    #[test]
    fn test_expires_at_offset() {
        let run = new_run();
        assert_eq!(
            (run.expires_at - run.created_at).num_milliseconds(),
            600_000
        );
        assert!(run.is_expired_at(run.expires_at));
        assert!(!run.is_expired_at(run.created_at));
    }
}
