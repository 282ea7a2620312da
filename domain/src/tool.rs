use crate::id::{FileId, ToolCallId};
use anyhow::Result;
use runweaver_base::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

pub const CODE_INTERPRETER_TOOL_NAME: &str = "code_interpreter";
pub const FILE_SEARCH_TOOL_NAME: &str = "file_search";
pub const FUNCTION_TOOL_TYPE_NAME: &str = "function";

/// Built-in tools executed by the agent engine itself.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SystemToolId {
    Wikipedia,
    WebSearch,
    Weather,
    Arxiv,
    Llm,
    Calculator,
    ReadFile,
}

/// Tool usage declared on a run: which tools the engine may call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolUsage {
    CodeInterpreter,
    FileSearch {
        #[serde(default)]
        max_num_results: Option<u32>,
    },
    Function {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        parameters: Option<Value>,
    },
    System {
        tool_id: SystemToolId,
    },
    User {
        tool_id: String,
    },
}

/// Approval policy supplied at run creation, consulted once per tool start.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRequirement {
    Never,
    Always,
}

/// Whether a failed call of this kind fails the whole run or only its step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolFailurePolicy {
    FailRun,
    FailStep,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSearchResult {
    pub file_id: FileId,
    pub content: String,
    pub score: f64,
}

/// One invocation of a tool. Closed over tool kind: adding a kind is a
/// compile-time-checked change in every match below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    #[serde(flatten)]
    pub details: ToolCallDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallDetails {
    CodeInterpreter {
        input: String,
        #[serde(default)]
        logs: Vec<String>,
        #[serde(default)]
        output_file_ids: Vec<FileId>,
    },
    FileSearch {
        input: String,
        #[serde(default)]
        results: Option<Vec<FileSearchResult>>,
    },
    Function {
        name: String,
        arguments: String,
        #[serde(default)]
        output: Option<String>,
    },
    System {
        tool_id: SystemToolId,
        input: Value,
        #[serde(default)]
        output: Option<Value>,
    },
    User {
        tool_id: String,
        arguments: String,
        #[serde(default)]
        output: Option<String>,
    },
}

/// Typed result handed back by the agent engine on tool success. Checked
/// against the call variant before the output is attached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineToolResult {
    CodeInterpreter {
        stdout: String,
        stderr: String,
        #[serde(default)]
        output_file_ids: Vec<FileId>,
    },
    Search {
        results: Vec<FileSearchResult>,
    },
    Text {
        value: String,
    },
    Json {
        value: Value,
    },
}

impl ToolCall {
    /// Classify a started engine tool against the run's declared usages.
    /// An undeclared or unknown tool name is a contract violation, not a
    /// user error.
    pub fn classify(usages: &[ToolUsage], tool_name: &str, input: &Value) -> Result<ToolCall> {
        let details = match tool_name {
            CODE_INTERPRETER_TOOL_NAME
                if usages.iter().any(|u| matches!(u, ToolUsage::CodeInterpreter)) =>
            {
                ToolCallDetails::CodeInterpreter {
                    input: string_field(input, "code"),
                    logs: vec![],
                    output_file_ids: vec![],
                }
            }
            FILE_SEARCH_TOOL_NAME
                if usages.iter().any(|u| matches!(u, ToolUsage::FileSearch { .. })) =>
            {
                ToolCallDetails::FileSearch {
                    input: string_field(input, "query"),
                    results: None,
                }
            }
            name => {
                if usages
                    .iter()
                    .any(|u| matches!(u, ToolUsage::Function { name: n, .. } if n == name))
                {
                    ToolCallDetails::Function {
                        name: name.to_string(),
                        arguments: input.to_string(),
                        output: None,
                    }
                } else if let Some(tool_id) = usages.iter().find_map(|u| match u {
                    ToolUsage::System { tool_id } if tool_id.as_ref() == name => Some(*tool_id),
                    _ => None,
                }) {
                    ToolCallDetails::System {
                        tool_id,
                        input: input.clone(),
                        output: None,
                    }
                } else if usages
                    .iter()
                    .any(|u| matches!(u, ToolUsage::User { tool_id } if tool_id == name))
                {
                    ToolCallDetails::User {
                        tool_id: name.to_string(),
                        arguments: input.to_string(),
                        output: None,
                    }
                } else {
                    return Err(OrchestratorError::InvalidParameter(format!(
                        "unexpected tool: {name}"
                    ))
                    .into());
                }
            }
        };
        Ok(ToolCall {
            id: ToolCallId::generate(),
            details,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.details {
            ToolCallDetails::CodeInterpreter { .. } => CODE_INTERPRETER_TOOL_NAME,
            ToolCallDetails::FileSearch { .. } => FILE_SEARCH_TOOL_NAME,
            ToolCallDetails::Function { .. } => FUNCTION_TOOL_TYPE_NAME,
            ToolCallDetails::System { .. } => "system",
            ToolCallDetails::User { .. } => "user",
        }
    }

    /// Tool identity used to look up approval policies: the user tool's own
    /// id, the declared system tool id, or the usage type for built-ins.
    pub fn approval_key(&self) -> String {
        match &self.details {
            ToolCallDetails::User { tool_id, .. } => tool_id.clone(),
            ToolCallDetails::System { tool_id, .. } => tool_id.as_ref().to_string(),
            ToolCallDetails::CodeInterpreter { .. } => CODE_INTERPRETER_TOOL_NAME.to_string(),
            ToolCallDetails::FileSearch { .. } => FILE_SEARCH_TOOL_NAME.to_string(),
            ToolCallDetails::Function { .. } => FUNCTION_TOOL_TYPE_NAME.to_string(),
        }
    }

    pub fn failure_policy(&self) -> ToolFailurePolicy {
        match &self.details {
            ToolCallDetails::Function { .. } | ToolCallDetails::User { .. } => {
                ToolFailurePolicy::FailStep
            }
            ToolCallDetails::CodeInterpreter { .. }
            | ToolCallDetails::FileSearch { .. }
            | ToolCallDetails::System { .. } => ToolFailurePolicy::FailRun,
        }
    }

    /// Function and user calls do not execute inside the engine: their
    /// output is supplied by the client through the output gate.
    pub fn awaits_client_output(&self) -> bool {
        matches!(
            self.details,
            ToolCallDetails::Function { .. } | ToolCallDetails::User { .. }
        )
    }

    /// Attach the engine result, checking its shape against the variant.
    /// A mismatch is a contract violation between engine and orchestrator.
    pub fn finalize(&mut self, result: EngineToolResult) -> Result<()> {
        match (&mut self.details, result) {
            (
                ToolCallDetails::CodeInterpreter {
                    logs,
                    output_file_ids,
                    ..
                },
                EngineToolResult::CodeInterpreter {
                    stdout,
                    stderr,
                    output_file_ids: files,
                },
            ) => {
                *logs = vec![stdout, stderr];
                *output_file_ids = files;
                Ok(())
            }
            (ToolCallDetails::FileSearch { results, .. }, EngineToolResult::Search { results: r }) => {
                *results = Some(r);
                Ok(())
            }
            (ToolCallDetails::Function { output, .. }, EngineToolResult::Text { value })
            | (ToolCallDetails::User { output, .. }, EngineToolResult::Text { value }) => {
                *output = Some(value);
                Ok(())
            }
            (ToolCallDetails::System { output, .. }, EngineToolResult::Json { value }) => {
                *output = Some(value);
                Ok(())
            }
            (ToolCallDetails::System { output, .. }, EngineToolResult::Text { value }) => {
                *output = Some(Value::String(value));
                Ok(())
            }
            (details, result) => Err(OrchestratorError::RuntimeError(format!(
                "tool result shape mismatch: call={:?}, result={:?}",
                std::mem::discriminant(&*details),
                result
            ))
            .into()),
        }
    }
}

fn string_field(input: &Value, field: &str) -> String {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usages() -> Vec<ToolUsage> {
        vec![
            ToolUsage::CodeInterpreter,
            ToolUsage::FileSearch {
                max_num_results: Some(5),
            },
            ToolUsage::Function {
                name: "get_weather".to_string(),
                description: None,
                parameters: None,
            },
            ToolUsage::System {
                tool_id: SystemToolId::Wikipedia,
            },
            ToolUsage::User {
                tool_id: "tool_custom1".to_string(),
            },
        ]
    }

    #[test]
    fn test_classify_code_interpreter() {
        let call =
            ToolCall::classify(&usages(), "code_interpreter", &json!({"code": "print(1)"})).unwrap();
        assert!(matches!(
            call.details,
            ToolCallDetails::CodeInterpreter { ref input, .. } if input == "print(1)"
        ));
        assert_eq!(call.approval_key(), "code_interpreter");
        assert_eq!(call.failure_policy(), ToolFailurePolicy::FailRun);
    }

    #[test]
    fn test_classify_function_by_name() {
        let call = ToolCall::classify(&usages(), "get_weather", &json!({"city": "Prague"})).unwrap();
        assert!(matches!(call.details, ToolCallDetails::Function { .. }));
        assert_eq!(call.approval_key(), "function");
        assert!(call.awaits_client_output());
        assert_eq!(call.failure_policy(), ToolFailurePolicy::FailStep);
    }

    #[test]
    fn test_classify_system_and_user() {
        let call = ToolCall::classify(&usages(), "wikipedia", &json!({"query": "rust"})).unwrap();
        assert_eq!(call.approval_key(), "wikipedia");
        let call = ToolCall::classify(&usages(), "tool_custom1", &json!({})).unwrap();
        assert_eq!(call.approval_key(), "tool_custom1");
    }

    #[test]
    fn test_classify_undeclared_tool_is_error() {
        assert!(ToolCall::classify(&usages(), "nope", &json!({})).is_err());
    }

    #[test]
    fn test_finalize_type_check() {
        let mut call =
            ToolCall::classify(&usages(), "code_interpreter", &json!({"code": "1"})).unwrap();
        // wrong shape rejected
        assert!(call
            .finalize(EngineToolResult::Text {
                value: "x".to_string()
            })
            .is_err());
        call.finalize(EngineToolResult::CodeInterpreter {
            stdout: "out".to_string(),
            stderr: String::new(),
            output_file_ids: vec![FileId::from("file_1")],
        })
        .unwrap();
        match call.details {
            ToolCallDetails::CodeInterpreter {
                logs,
                output_file_ids,
                ..
            } => {
                assert_eq!(logs, vec!["out".to_string(), String::new()]);
                assert_eq!(output_file_ids.len(), 1);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_tool_call_wire_shape() {
        let call = ToolCall {
            id: ToolCallId::from("call_1"),
            details: ToolCallDetails::Function {
                name: "f".to_string(),
                arguments: "{}".to_string(),
                output: None,
            },
        };
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v["type"], "function");
        assert_eq!(v["id"], "call_1");
    }
}
