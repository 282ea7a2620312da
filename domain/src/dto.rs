use crate::message::Message;
use crate::required_action::RequiredAction;
use crate::run::Run;
use crate::step::RunStep;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

fn unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn unix_opt(at: Option<DateTime<Utc>>) -> Value {
    at.map(|t| json!(unix(t))).unwrap_or(Value::Null)
}

/// Full run DTO, carried by every `thread.run.*` event and the read endpoint.
pub fn to_run_dto(run: &Run) -> Value {
    json!({
        "id": run.id,
        "object": "thread.run",
        "thread_id": run.thread_id,
        "assistant_id": run.assistant_id,
        "status": run.status,
        "last_error": run.last_error,
        "required_action": run.required_action.as_ref().map(to_required_action_dto),
        "tools": run.tools,
        "tool_approvals": run.tool_approvals,
        "instructions": run.instructions,
        "metadata": run.metadata,
        "model": run.model,
        "created_at": unix(run.created_at),
        "expires_at": unix(run.expires_at),
        "started_at": unix_opt(run.started_at),
        "cancelled_at": unix_opt(run.cancelled_at),
        "failed_at": unix_opt(run.failed_at),
        "completed_at": unix_opt(run.completed_at),
    })
}

/// `{"type": "submit_tool_…", "submit_tool_…": {"tool_calls": […]}}` — the
/// variant name doubles as the payload key.
fn to_required_action_dto(action: &RequiredAction) -> Value {
    let mut dto = Map::new();
    dto.insert("type".to_string(), json!(action.kind_name()));
    let mut payload = Map::new();
    payload.insert("tool_calls".to_string(), json!(action.tool_calls()));
    if let RequiredAction::SubmitToolInputs { input_fields, .. } = action {
        payload.insert("input_fields".to_string(), json!(input_fields));
    }
    dto.insert(action.kind_name().to_string(), Value::Object(payload));
    Value::Object(dto)
}

pub fn to_run_step_dto(step: &RunStep) -> Value {
    json!({
        "id": step.id,
        "object": "thread.run.step",
        "run_id": step.run_id,
        "thread_id": step.thread_id,
        "assistant_id": step.assistant_id,
        "status": step.status,
        "step_details": step.details,
        "last_error": step.last_error,
        "created_at": unix(step.created_at),
    })
}

/// Incremental step delta: only the appended thought text.
pub fn to_run_step_delta_dto(step: &RunStep, appended: &str) -> Value {
    json!({
        "id": step.id,
        "object": "thread.run.step.delta",
        "delta": {
            "step_details": { "type": "thought", "content": appended },
        },
    })
}

pub fn to_message_dto(message: &Message) -> Value {
    json!({
        "id": message.id,
        "object": "thread.message",
        "thread_id": message.thread_id,
        "run_id": message.run_id,
        "role": message.role,
        "status": message.status,
        "content": [{
            "type": "text",
            "text": { "value": message.content },
        }],
        "created_at": unix(message.created_at),
    })
}

/// Incremental message delta: only the appended text.
pub fn to_message_delta_dto(message: &Message, appended: &str) -> Value {
    json!({
        "id": message.id,
        "object": "thread.message.delta",
        "delta": {
            "role": message.role,
            "content": [{
                "index": 0,
                "type": "text",
                "text": { "value": appended },
            }],
        },
    })
}
