use runweaver_base::error::{is_cancellation_error, is_tool_rejection_error};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Client-visible structured error. Internal error types are normalised to
/// this shape at the run boundary; raw exceptions never reach a DTO.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApiErrorCode {
    InternalServerError,
    InvalidInput,
    NotFound,
    TooManyRequests,
    ServiceUnavailable,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InternalServerError, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::TooManyRequests, message)
    }

    /// Normalise an arbitrary error chain. Cancellations and gate denials
    /// keep their message; everything else is classified internal.
    pub fn from_error(e: &anyhow::Error) -> Self {
        if is_cancellation_error(e) || is_tool_rejection_error(e) {
            Self::invalid_input(format!("{e}"))
        } else {
            Self::internal(format!("{e}"))
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
