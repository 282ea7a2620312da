use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};

/// Run-level gate describing what the client must supply before execution
/// continues. Variants are mutually exclusive and always non-empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredAction {
    SubmitToolApprovals { tool_calls: Vec<ToolCall> },
    SubmitToolInputs {
        tool_calls: Vec<ToolCall>,
        input_fields: Vec<String>,
    },
    SubmitToolOutputs { tool_calls: Vec<ToolCall> },
}

impl RequiredAction {
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            RequiredAction::SubmitToolApprovals { tool_calls }
            | RequiredAction::SubmitToolInputs { tool_calls, .. }
            | RequiredAction::SubmitToolOutputs { tool_calls } => tool_calls,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RequiredAction::SubmitToolApprovals { .. } => "submit_tool_approvals",
            RequiredAction::SubmitToolInputs { .. } => "submit_tool_inputs",
            RequiredAction::SubmitToolOutputs { .. } => "submit_tool_outputs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ToolCallId;
    use crate::tool::ToolCallDetails;

    #[test]
    fn test_wire_shape() {
        let action = RequiredAction::SubmitToolInputs {
            tool_calls: vec![ToolCall {
                id: ToolCallId::from("call_1"),
                details: ToolCallDetails::User {
                    tool_id: "tool_x".to_string(),
                    arguments: "{}".to_string(),
                    output: None,
                },
            }],
            input_fields: vec!["api_key".to_string()],
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], "submit_tool_inputs");
        assert_eq!(v["input_fields"][0], "api_key");
    }
}
