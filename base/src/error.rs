use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("InvalidStateTransition({0})")]
    InvalidStateTransition(String),
    #[error("InvalidParameter({0})")]
    InvalidParameter(String),
    #[error("NotFound({0})")]
    NotFound(String),
    #[error("AlreadyExists({0})")]
    AlreadyExists(String),
    #[error("QuotaExceeded({0})")]
    QuotaExceeded(String),
    #[error("ToolRejected({0})")]
    ToolRejected(String),
    #[error("Cancelled({0})")]
    Cancelled(String),
    #[error("TimeoutError({0})")]
    TimeoutError(String),
    #[error("ChanError({0:?})")]
    ChanError(anyhow::Error),
    #[error("serde_json error({0:?})")]
    SerdeJsonError(serde_json::error::Error),
    #[error("RedisError({0:?})")]
    RedisError(redis::RedisError),
    #[error("RuntimeError({0})")]
    RuntimeError(String),
}

impl OrchestratorError {
    /// Cancellation is not a failure: the executor routes it to
    /// cancel()/expire() instead of fail().
    pub fn is_cancellation(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled(_))
    }

    /// Gate denials terminate the tool call but leave the recovery
    /// decision to the agent engine.
    pub fn is_tool_rejection(&self) -> bool {
        matches!(self, OrchestratorError::ToolRejected(_))
    }
}

impl From<redis::RedisError> for OrchestratorError {
    fn from(e: redis::RedisError) -> Self {
        OrchestratorError::RedisError(e)
    }
}
impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::SerdeJsonError(e)
    }
}

/// Classify an opaque error chain, looking for orchestrator variants.
pub fn is_cancellation_error(e: &anyhow::Error) -> bool {
    e.chain().any(|c| {
        c.downcast_ref::<OrchestratorError>()
            .map(OrchestratorError::is_cancellation)
            .unwrap_or(false)
    })
}

pub fn is_tool_rejection_error(e: &anyhow::Error) -> bool {
    e.chain().any(|c| {
        c.downcast_ref::<OrchestratorError>()
            .map(OrchestratorError::is_tool_rejection)
            .unwrap_or(false)
    })
}
