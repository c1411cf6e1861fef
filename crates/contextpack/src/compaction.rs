//! Compaction: decide when to summarize, and produce the
//! `compact.boundary` + `compact.summary` event payloads.
//!
//! The default summarizer is deterministic and non-LLM (topic/tool-name/
//! first-sentence extraction) so compaction never makes a recursive
//! provider call from inside the core. A `SummaryStrategy` may instead
//! delegate to a dedicated summarizer subagent — the result is still
//! persisted as an ordinary `compact.summary` event, so later
//! composition stays pure replay either way.

use sa_domain::config::CompactionConfig;
use sa_domain::event::{Event, EventType};
use sa_domain::tool::ContentPart;

/// Produces the summary text for a prefix of events slated for
/// compaction.
pub trait SummaryStrategy {
    fn summarize(&self, prefix: &[Event]) -> String;
}

/// Deterministic digest: pulls out the distinct tools invoked, the first
/// sentence of the earliest user message (the original ask), and the
/// last assistant sentence (current state), joined into a short summary.
/// No provider call, fully reproducible from the same prefix.
pub struct DeterministicDigest;

impl SummaryStrategy for DeterministicDigest {
    fn summarize(&self, prefix: &[Event]) -> String {
        let mut tools: Vec<String> = Vec::new();
        let mut first_user_sentence = None;
        let mut last_assistant_sentence = None;

        for event in prefix {
            match event.event_type {
                EventType::ToolCall => {
                    if let Some(name) = event.payload.get("tool_name").and_then(|v| v.as_str()) {
                        if !tools.iter().any(|t| t == name) {
                            tools.push(name.to_string());
                        }
                    }
                }
                EventType::MessageUser if first_user_sentence.is_none() => {
                    if let Some(text) = event_text(event) {
                        first_user_sentence = Some(first_sentence(&text));
                    }
                }
                EventType::MessageAssistant => {
                    if let Some(text) = event_text(event) {
                        last_assistant_sentence = Some(first_sentence(&text));
                    }
                }
                _ => {}
            }
        }

        let user_turns = prefix
            .iter()
            .filter(|e| e.event_type == EventType::MessageUser)
            .count();

        let mut out = format!("Summarized {user_turns} earlier turn(s).");
        if let Some(ask) = first_user_sentence {
            out.push_str(&format!(" Original ask: {ask}."));
        }
        if !tools.is_empty() {
            out.push_str(&format!(" Tools used: {}.", tools.join(", ")));
        }
        if let Some(state) = last_assistant_sentence {
            out.push_str(&format!(" Most recent state: {state}"));
        }
        out
    }
}

fn event_text(event: &Event) -> Option<String> {
    if let Some(parts) = event.payload.get("content").and_then(|v| v.as_array()) {
        let joined: String = parts
            .iter()
            .filter_map(|p| serde_json::from_value::<ContentPart>(p.clone()).ok())
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    event
        .payload
        .get("text")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    let end = trimmed.find(['.', '\n']).map(|i| i + 1).unwrap_or(trimmed.len());
    let mut s = trimmed[..end.min(trimmed.len())].trim().to_string();
    if s.len() > 200 {
        s.truncate(200);
        s.push('…');
    }
    s
}

/// Whether estimated token usage warrants compaction.
pub fn should_compact(estimated_tokens: u64, config: &CompactionConfig) -> bool {
    config.auto
        && estimated_tokens as f64 > config.max_tokens as f64 * config.compaction_threshold
}

/// Splits the active event slice into the prefix to summarize and the
/// suffix to preserve verbatim, per `preserve_recent_count` message
/// pairs (counted by `message.user`/`message.assistant` events).
pub fn split_for_compaction(events: &[Event], preserve_recent_count: usize) -> (&[Event], &[Event]) {
    let preserve_messages = preserve_recent_count * 2;
    if preserve_messages == 0 {
        return (events, &events[events.len()..]);
    }
    let mut kept = 0;
    let mut cut = 0;
    for (i, event) in events.iter().enumerate().rev() {
        if matches!(
            event.event_type,
            EventType::MessageUser | EventType::MessageAssistant
        ) {
            kept += 1;
        }
        if kept >= preserve_messages {
            cut = i;
            break;
        }
    }
    (&events[..cut], &events[cut..])
}

/// Builds the `compact.boundary` and `compact.summary` event payloads
/// for a compaction run. The caller (turn orchestrator) is responsible
/// for appending both to the event store in order.
pub fn build_compaction_payloads(
    prefix: &[Event],
    strategy: &dyn SummaryStrategy,
    tokens_before: u64,
    tokens_after: u64,
) -> (serde_json::Value, serde_json::Value) {
    let summary = strategy.summarize(prefix);
    let boundary = serde_json::json!({
        "tokens_before": tokens_before,
        "tokens_after": tokens_after,
    });
    let summary_payload = serde_json::json!({ "summary": summary });
    (boundary, summary_payload)
}

/// Builds the `context.cleared` event payload for a manual, user-initiated
/// clear — no summary retained.
pub fn build_context_cleared_payload(tokens_before: u64, tokens_after: u64) -> serde_json::Value {
    serde_json::json!({
        "tokens_before": tokens_before,
        "tokens_after": tokens_after,
        "reason": "manual",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user_evt(seq: u64, text: &str) -> Event {
        Event {
            id: format!("e{seq}"),
            session_id: "s1".into(),
            parent_id: None,
            sequence: seq,
            depth: seq,
            event_type: EventType::MessageUser,
            timestamp: Utc::now(),
            payload: serde_json::json!({"text": text}),
            content_blob_id: None,
            workspace_id: "w1".into(),
            role: None,
            tool_name: None,
            tool_call_id: None,
            turn: None,
            checksum: None,
        }
    }

    fn assistant_evt(seq: u64, text: &str) -> Event {
        let mut e = user_evt(seq, text);
        e.event_type = EventType::MessageAssistant;
        e
    }

    #[test]
    fn should_compact_respects_threshold_ratio() {
        let config = CompactionConfig {
            auto: true,
            max_tokens: 1000,
            compaction_threshold: 0.8,
            preserve_recent_count: 2,
        };
        assert!(!should_compact(700, &config));
        assert!(should_compact(850, &config));
    }

    #[test]
    fn split_keeps_last_n_pairs() {
        let events: Vec<Event> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    user_evt(i, &format!("msg {i}"))
                } else {
                    assistant_evt(i, &format!("reply {i}"))
                }
            })
            .collect();
        let (prefix, suffix) = split_for_compaction(&events, 2);
        assert_eq!(prefix.len(), 6);
        assert_eq!(suffix.len(), 4);
    }

    #[test]
    fn deterministic_digest_mentions_tools_and_first_ask() {
        let events = vec![
            user_evt(1, "Please read foo.txt and summarize it."),
            Event {
                event_type: EventType::ToolCall,
                payload: serde_json::json!({"tool_name": "Read"}),
                ..user_evt(2, "")
            },
            assistant_evt(3, "Done, foo.txt says hello."),
        ];
        let digest = DeterministicDigest.summarize(&events);
        assert!(digest.contains("Read"));
        assert!(digest.contains("Please read foo.txt"));
    }

    #[test]
    fn preserve_recent_count_zero_summarizes_everything() {
        let events = vec![user_evt(1, "a"), assistant_evt(2, "b")];
        let (prefix, suffix) = split_for_compaction(&events, 0);
        assert_eq!(prefix.len(), 2);
        assert!(suffix.is_empty());
    }
}
