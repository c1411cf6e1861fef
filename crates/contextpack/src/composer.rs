//! Event-chain → provider-neutral message list (C3 core algorithm).
//!
//! Pure function over an already-replayed event slice: no I/O, no
//! provider calls. The turn orchestrator owns loading the slice from the
//! event store and handing it here.

use chrono::{DateTime, Utc};
use sa_domain::config::PruningConfig;
use sa_domain::event::{Event, EventType};
use sa_domain::tool::{ContentPart, Message, MessageContent, Role};

pub struct ComposedContext {
    pub messages: Vec<Message>,
    /// Rough token estimate (chars / 4), used only to decide whether to
    /// trigger compaction — not a provider-accurate count.
    pub estimated_tokens: u64,
}

/// Replays `events` (already loaded root..head, or boundary..head) into
/// a message list per the composition algorithm:
/// 1. skip tombstoned events,
/// 2. drop everything before the latest `context.cleared`,
/// 3. drop everything before a `compact.boundary`/`compact.summary` pair
///    and inject the summary as a synthetic exchange,
/// 4. attach `tool.call`/`tool.result` to the surrounding messages,
/// 5. apply cache-TTL pruning to tool-result content in older turns.
pub fn compose(
    events: &[Event],
    pruning: &PruningConfig,
    now: DateTime<Utc>,
    last_provider_call_at: Option<DateTime<Utc>>,
) -> ComposedContext {
    let active = active_slice(events);
    let mut messages = replay(active);
    prune_cache_ttl(&mut messages, pruning, now, last_provider_call_at);
    let estimated_tokens = estimate_tokens(&messages);
    ComposedContext {
        messages,
        estimated_tokens,
    }
}

/// Drops everything at/before the latest `context.cleared`, then (within
/// what remains) everything before the latest `compact.boundary` if a
/// matching `compact.summary` follows it.
fn active_slice(events: &[Event]) -> &[Event] {
    let after_clear = events
        .iter()
        .rposition(|e| e.event_type == EventType::ContextCleared)
        .map(|i| i + 1)
        .unwrap_or(0);
    let remaining = &events[after_clear..];

    match remaining
        .iter()
        .rposition(|e| e.event_type == EventType::CompactBoundary)
    {
        Some(i) if remaining.get(i + 1).map(|e| e.event_type) == Some(EventType::CompactSummary) => {
            &remaining[i..]
        }
        _ => remaining,
    }
}

fn replay(events: &[Event]) -> Vec<Message> {
    let deleted: std::collections::HashSet<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::MessageDeleted)
        .filter_map(|e| e.payload.get("target_event_id").and_then(|v| v.as_str()))
        .collect();

    let mut messages = Vec::new();
    for event in events {
        if deleted.contains(event.id.as_str()) {
            continue;
        }
        match event.event_type {
            EventType::MessageUser => messages.push(message_from_payload(Role::User, &event.payload)),
            EventType::MessageAssistant => {
                messages.push(message_from_payload(Role::Assistant, &event.payload))
            }
            EventType::MessageSystem => {
                messages.push(message_from_payload(Role::System, &event.payload))
            }
            EventType::CompactSummary => {
                let summary = event
                    .payload
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                messages.push(Message::user(format!(
                    "[earlier conversation summarized]\n{summary}"
                )));
                messages.push(Message::assistant("Understood, continuing from that summary."));
            }
            EventType::ToolCall => {
                if let Some(last) = messages.last_mut() {
                    append_tool_use(last, &event.payload);
                }
            }
            EventType::ToolResult => {
                let part = tool_result_part(&event.payload);
                match messages.last_mut() {
                    Some(Message {
                        role: Role::Tool, ..
                    }) => {
                        if let Some(last) = messages.last_mut() {
                            append_part(last, part);
                        }
                    }
                    _ => messages.push(Message {
                        role: Role::Tool,
                        content: MessageContent::Parts(vec![part]),
                    }),
                }
            }
            EventType::MessageDeleted
            | EventType::CompactBoundary
            | EventType::ContextCleared
            | EventType::StreamTurnStart
            | EventType::StreamTurnEnd
            | EventType::StreamTextDelta
            | EventType::StreamThinkingDelta => {}
            _ => {}
        }
    }
    messages
}

fn message_from_payload(role: Role, payload: &serde_json::Value) -> Message {
    if let Some(parts) = payload.get("content").and_then(|v| v.as_array()) {
        let parts: Vec<ContentPart> = parts
            .iter()
            .filter_map(|p| serde_json::from_value(p.clone()).ok())
            .collect();
        if !parts.is_empty() {
            return Message {
                role,
                content: MessageContent::Parts(parts),
            };
        }
    }
    let text = payload
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Message {
        role,
        content: MessageContent::Text(text),
    }
}

fn append_tool_use(message: &mut Message, payload: &serde_json::Value) {
    let part = ContentPart::ToolUse {
        id: payload
            .get("call_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        name: payload
            .get("tool_name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        input: payload.get("arguments").cloned().unwrap_or(serde_json::Value::Null),
    };
    append_part(message, part);
}

fn tool_result_part(payload: &serde_json::Value) -> ContentPart {
    ContentPart::ToolResult {
        tool_use_id: payload
            .get("call_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        content: payload
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        is_error: payload
            .get("is_error")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

fn append_part(message: &mut Message, part: ContentPart) {
    match &mut message.content {
        MessageContent::Parts(parts) => parts.push(part),
        MessageContent::Text(text) => {
            let existing = std::mem::take(text);
            message.content = MessageContent::Parts(vec![ContentPart::Text { text: existing }, part]);
        }
    }
}

/// Replaces tool-result content larger than `min_prunable_chars` with a
/// placeholder in every assistant turn except the most recent
/// `keep_last_assistants`, but only when the cache is cold (the gap
/// since the last provider call exceeds `ttl_seconds`). Never mutates
/// stored events — operates on the composed view only.
fn prune_cache_ttl(
    messages: &mut [Message],
    pruning: &PruningConfig,
    now: DateTime<Utc>,
    last_provider_call_at: Option<DateTime<Utc>>,
) {
    use sa_domain::config::PruningMode;
    if pruning.mode != PruningMode::CacheTtl {
        return;
    }
    let cold = match last_provider_call_at {
        Some(t) => (now - t).num_seconds() as u64 > pruning.ttl_seconds,
        None => false,
    };
    if !cold {
        return;
    }

    let assistant_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Assistant)
        .map(|(i, _)| i)
        .collect();
    if assistant_indices.len() <= pruning.keep_last_assistants {
        return;
    }
    let protect_from = assistant_indices[assistant_indices.len() - pruning.keep_last_assistants];

    for message in messages.iter_mut().take(protect_from) {
        if message.role != Role::Tool {
            continue;
        }
        if let MessageContent::Parts(parts) = &mut message.content {
            for part in parts.iter_mut() {
                if let ContentPart::ToolResult { content, .. } = part {
                    if content.len() > pruning.min_prunable_chars {
                        *content = "[pruned: cache expired, content elided]".to_string();
                    }
                }
            }
        }
    }
}

fn estimate_tokens(messages: &[Message]) -> u64 {
    let chars: usize = messages.iter().map(message_chars).sum();
    (chars / 4) as u64
}

fn message_chars(message: &Message) -> usize {
    match &message.content {
        MessageContent::Text(t) => t.len(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::Thinking { text, .. } => text.len(),
                ContentPart::ToolUse { input, .. } => input.to_string().len(),
                ContentPart::ToolResult { content, .. } => content.len(),
                ContentPart::Image { .. } => 256,
            })
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(seq: u64, ty: EventType, payload: serde_json::Value) -> Event {
        Event {
            id: format!("e{seq}"),
            session_id: "s1".into(),
            parent_id: None,
            sequence: seq,
            depth: seq,
            event_type: ty,
            timestamp: Utc::now(),
            payload,
            content_blob_id: None,
            workspace_id: "w1".into(),
            role: None,
            tool_name: None,
            tool_call_id: None,
            turn: None,
            checksum: None,
        }
    }

    #[test]
    fn context_cleared_drops_everything_before_it() {
        let events = vec![
            evt(1, EventType::MessageUser, serde_json::json!({"text": "old"})),
            evt(2, EventType::ContextCleared, serde_json::json!({})),
            evt(3, EventType::MessageUser, serde_json::json!({"text": "new"})),
        ];
        let result = compose(&events, &PruningConfig::default(), Utc::now(), None);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content.text(), Some("new"));
    }

    #[test]
    fn deleted_message_is_never_composed() {
        let events = vec![
            evt(1, EventType::MessageUser, serde_json::json!({"text": "secret"})),
            evt(
                2,
                EventType::MessageDeleted,
                serde_json::json!({"target_event_id": "e1"}),
            ),
        ];
        let result = compose(&events, &PruningConfig::default(), Utc::now(), None);
        assert!(result.messages.is_empty());
    }

    #[test]
    fn tool_call_attaches_to_preceding_assistant_message() {
        let events = vec![
            evt(
                1,
                EventType::MessageAssistant,
                serde_json::json!({"text": "let me check"}),
            ),
            evt(
                2,
                EventType::ToolCall,
                serde_json::json!({"call_id": "c1", "tool_name": "exec", "arguments": {}}),
            ),
            evt(
                3,
                EventType::ToolResult,
                serde_json::json!({"call_id": "c1", "content": "ok", "is_error": false}),
            ),
        ];
        let result = compose(&events, &PruningConfig::default(), Utc::now(), None);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[1].role, Role::Tool);
    }
}
