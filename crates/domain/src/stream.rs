use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
///
/// The sequence is finite, single-consumer, and not restartable: a
/// consumer must exhaust it or explicitly cancel it. This is the closed
/// set every provider adapter normalizes into; nothing upstream of the
/// adapter boundary sees provider-specific shapes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// The response has started; no content has arrived yet.
    #[serde(rename = "start")]
    Start,

    /// A text content block has opened.
    #[serde(rename = "text_start")]
    TextStart,

    /// Incremental text within the current text block.
    #[serde(rename = "text_delta")]
    TextDelta { delta: String },

    /// The current text block is complete; `text` is the full accumulated
    /// text of that block.
    #[serde(rename = "text_end")]
    TextEnd { text: String },

    /// A thinking (extended-reasoning) block has opened.
    #[serde(rename = "thinking_start")]
    ThinkingStart,

    /// Incremental thinking content.
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { delta: String },

    /// The thinking block is complete. `signature` carries a
    /// provider-issued integrity token where the provider supplies one.
    #[serde(rename = "thinking_end")]
    ThinkingEnd {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// A tool call has started.
    #[serde(rename = "toolcall_start")]
    ToolcallStart { id: String, name: String },

    /// Incremental tool call argument data.
    #[serde(rename = "toolcall_delta")]
    ToolcallDelta {
        id: String,
        arguments_delta: String,
    },

    /// A tool call is complete with full arguments.
    #[serde(rename = "toolcall_end")]
    ToolcallEnd { tool_call: ToolCall },

    /// Stream is finished.
    #[serde(rename = "done")]
    Done {
        message: Option<String>,
        stop_reason: StopReason,
        usage: Option<Usage>,
    },

    /// An unrecoverable error occurred during streaming.
    #[serde(rename = "error")]
    Error { message: String, retryable: bool },

    /// The adapter is retrying a call that failed before any data event
    /// was yielded to the consumer. Only emitted when the caller opted
    /// in via `emit_retry_event`.
    #[serde(rename = "retry")]
    Retry {
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
    },
}

/// Normalized stop reason, closed across every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
    Interrupted,
}

impl StopReason {
    /// Maps a provider-specific stop/finish reason string to the closed
    /// set. Anything unrecognized (including `content_filter`/`SAFETY`)
    /// normalizes to `EndTurn` rather than failing the turn.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "end_turn" | "stop" | "STOP" => StopReason::EndTurn,
            "max_tokens" | "length" | "MAX_TOKENS" => StopReason::MaxTokens,
            "tool_use" | "tool_calls" | "function_call" => StopReason::ToolUse,
            "stop_sequence" => StopReason::StopSequence,
            "interrupted" | "cancelled" | "canceled" => StopReason::Interrupted,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stop_reason_normalizes_to_end_turn() {
        assert_eq!(StopReason::normalize("content_filter"), StopReason::EndTurn);
        assert_eq!(StopReason::normalize("SAFETY"), StopReason::EndTurn);
        assert_eq!(StopReason::normalize("whatever-this-is"), StopReason::EndTurn);
    }

    #[test]
    fn known_stop_reasons_map_correctly() {
        assert_eq!(StopReason::normalize("tool_calls"), StopReason::ToolUse);
        assert_eq!(StopReason::normalize("MAX_TOKENS"), StopReason::MaxTokens);
        assert_eq!(StopReason::normalize("cancelled"), StopReason::Interrupted);
    }
}
