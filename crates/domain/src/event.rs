//! The event vocabulary: the atomic unit of history for every session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of event types a session's chain may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    SessionEnded,
    SessionForked,
    MessageUser,
    MessageAssistant,
    MessageSystem,
    MessageDeleted,
    ToolCall,
    ToolResult,
    StreamTurnStart,
    StreamTurnEnd,
    StreamTextDelta,
    StreamThinkingDelta,
    CompactBoundary,
    CompactSummary,
    ContextCleared,
    ConfigModelSwitch,
    ConfigPromptUpdate,
    ConfigReasoningLevel,
    MetadataUpdate,
    MetadataTag,
    SubagentSpawned,
    SubagentStatusUpdate,
    SubagentCompleted,
    SubagentFailed,
    HookTriggered,
    HookCompleted,
    HookBackgroundStarted,
    HookBackgroundCompleted,
    ErrorAgent,
    ErrorTool,
    ErrorProvider,
    TurnFailed,
    NotificationInterrupted,
    MemoryLedger,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStarted => "session.started",
            EventType::SessionEnded => "session.ended",
            EventType::SessionForked => "session.forked",
            EventType::MessageUser => "message.user",
            EventType::MessageAssistant => "message.assistant",
            EventType::MessageSystem => "message.system",
            EventType::MessageDeleted => "message.deleted",
            EventType::ToolCall => "tool.call",
            EventType::ToolResult => "tool.result",
            EventType::StreamTurnStart => "stream.turn_start",
            EventType::StreamTurnEnd => "stream.turn_end",
            EventType::StreamTextDelta => "stream.text_delta",
            EventType::StreamThinkingDelta => "stream.thinking_delta",
            EventType::CompactBoundary => "compact.boundary",
            EventType::CompactSummary => "compact.summary",
            EventType::ContextCleared => "context.cleared",
            EventType::ConfigModelSwitch => "config.model_switch",
            EventType::ConfigPromptUpdate => "config.prompt_update",
            EventType::ConfigReasoningLevel => "config.reasoning_level",
            EventType::MetadataUpdate => "metadata.update",
            EventType::MetadataTag => "metadata.tag",
            EventType::SubagentSpawned => "subagent.spawned",
            EventType::SubagentStatusUpdate => "subagent.status_update",
            EventType::SubagentCompleted => "subagent.completed",
            EventType::SubagentFailed => "subagent.failed",
            EventType::HookTriggered => "hook.triggered",
            EventType::HookCompleted => "hook.completed",
            EventType::HookBackgroundStarted => "hook.background_started",
            EventType::HookBackgroundCompleted => "hook.background_completed",
            EventType::ErrorAgent => "error.agent",
            EventType::ErrorTool => "error.tool",
            EventType::ErrorProvider => "error.provider",
            EventType::TurnFailed => "turn.failed",
            EventType::NotificationInterrupted => "notification.interrupted",
            EventType::MemoryLedger => "memory.ledger",
        }
    }
}

/// A fully persisted, immutable event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub session_id: String,
    pub parent_id: Option<String>,
    pub sequence: u64,
    pub depth: u64,
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_blob_id: Option<String>,
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Input to `EventStore::append` — everything the caller supplies before
/// the store assigns an id, sequence, and timestamp.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub session_id: String,
    /// The event this one must succeed, asserted for optimistic
    /// concurrency. `None` only valid for the very first event in a
    /// session.
    pub expected_parent_id: Option<String>,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub workspace_id: String,
    pub role: Option<String>,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub turn: Option<u32>,
}

impl EventInput {
    pub fn new(
        session_id: impl Into<String>,
        workspace_id: impl Into<String>,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            expected_parent_id: None,
            event_type,
            payload,
            workspace_id: workspace_id.into(),
            role: None,
            tool_name: None,
            tool_call_id: None,
            turn: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.expected_parent_id = Some(parent_id.into());
        self
    }

    pub fn with_turn(mut self, turn: u32) -> Self {
        self.turn = Some(turn);
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, call_id: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self.tool_call_id = Some(call_id.into());
        self
    }
}

/// A content-addressed, refcounted large payload, used to offload event
/// payloads above the inline-storage threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: String,
    pub hash: String,
    pub bytes: usize,
    pub mime_type: String,
    pub original_size: usize,
    pub compressed_size: usize,
    pub compression: Option<String>,
    pub refcount: i64,
}

/// A named pointer to a head event within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub head_event_id: String,
}

pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_str() {
        assert_eq!(EventType::ToolCall.as_str(), "tool.call");
        assert_eq!(EventType::CompactBoundary.as_str(), "compact.boundary");
        assert_eq!(EventType::MemoryLedger.as_str(), "memory.ledger");
    }

    #[test]
    fn event_input_builder_sets_parent_and_turn() {
        let input = EventInput::new("s1", "w1", EventType::ToolCall, serde_json::json!({}))
            .with_parent("e1")
            .with_turn(2)
            .with_tool("exec", "call_1");
        assert_eq!(input.expected_parent_id.as_deref(), Some("e1"));
        assert_eq!(input.turn, Some(2));
        assert_eq!(input.tool_call_id.as_deref(), Some("call_1"));
    }
}
