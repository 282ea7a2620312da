use crate::id::{MessageId, RunId, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageRole {
    Assistant,
    User,
}

/// Assistant message composed incrementally while a run streams deltas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub run_id: RunId,
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new_in_progress(thread_id: ThreadId, run_id: RunId) -> Self {
        Self {
            id: MessageId::generate(),
            thread_id,
            run_id,
            role: MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::InProgress,
            created_at: runweaver_base::datetime::now(),
        }
    }

    pub fn append_delta(&mut self, text: &str) {
        self.content.push_str(text);
    }

    /// The engine may hand back the final text, overriding accumulated
    /// deltas; otherwise the concatenation stands.
    pub fn complete(&mut self, final_content: Option<String>) {
        if let Some(content) = final_content {
            self.content = content;
        }
        self.status = MessageStatus::Completed;
    }

    pub fn mark_incomplete(&mut self) {
        self.status = MessageStatus::Incomplete;
    }
}
