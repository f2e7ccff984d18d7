//! Core wire/data types shared across the bus, memory, and router.

use crate::session_key::SessionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_key: SessionKey,
    pub sender_id: String,
    pub content: String,
    pub trace_id: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub session_key: SessionKey,
    pub content: String,
    pub is_stream_chunk: bool,
    pub is_stream_end: bool,
}

impl OutboundMessage {
    pub fn chunk(session_key: SessionKey, content: impl Into<String>) -> Self {
        Self {
            session_key,
            content: content.into(),
            is_stream_chunk: true,
            is_stream_end: false,
        }
    }

    pub fn stream_end(session_key: SessionKey) -> Self {
        Self {
            session_key,
            content: String::new(),
            is_stream_chunk: false,
            is_stream_end: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventType {
    Thinking,
    ToolStart,
    ToolResult,
    Error,
    TokenUsage,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub session_key: SessionKey,
    pub event_type: SystemEventType,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Present on synthetic compaction turns; absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionMeta {
    pub turns_compacted: usize,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at,
            compaction: None,
        }
    }
}

pub fn empty_metadata() -> Map<String, Value> {
    Map::new()
}
