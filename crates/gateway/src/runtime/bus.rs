//! Event Fan-out Bus (C9) — in-process publish/subscribe over session
//! events, with cursor-resume for late-joining subscribers.
//!
//! Shape borrowed from `nodes/ws.rs`'s split sink/outbound-mpsc pattern:
//! each subscriber gets its own bounded channel so a slow reader can
//! never block the publisher or other subscribers.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Default number of retained envelopes per session before the oldest
/// are evicted (still available via event-store replay).
const DEFAULT_RETENTION_PER_SESSION: usize = 1000;

/// A single published event, addressed to a session (or broadcast when
/// `session_id` is `None`).
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: Option<String>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Envelope {
    fn dedup_key(&self) -> (String, u64) {
        (self.session_id.clone().unwrap_or_default(), self.sequence)
    }
}

/// Subscription pattern: `*` (everything), `prefix.*` (type prefix
/// match), or an exact event-type string.
#[derive(Debug, Clone)]
pub enum Pattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl Pattern {
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            Pattern::Any
        } else if let Some(prefix) = s.strip_suffix(".*") {
            Pattern::Prefix(prefix.to_string())
        } else {
            Pattern::Exact(s.to_string())
        }
    }

    fn matches(&self, event_type: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Prefix(p) => event_type
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
            Pattern::Exact(e) => e == event_type,
        }
    }
}

struct Subscriber {
    id: u64,
    pattern: Pattern,
    session_filter: Option<String>,
    tx: mpsc::Sender<Envelope>,
}

struct SessionRing {
    buf: VecDeque<Envelope>,
    cap: usize,
}

impl SessionRing {
    fn new(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    fn push(&mut self, envelope: Envelope) {
        if self.buf.len() >= self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(envelope);
    }
}

struct Inner {
    subscribers: Vec<Subscriber>,
    next_sub_id: u64,
    retention: std::collections::HashMap<String, SessionRing>,
    seen: std::collections::HashSet<(String, u64)>,
    retention_per_session: usize,
}

/// Non-blocking publish / pattern-subscribe / cursor-resume event bus.
///
/// `publish` never awaits: it fans out over bounded channels and drops
/// the message for any subscriber whose channel is full rather than
/// block the publisher (at-least-once delivery is guaranteed only for
/// subscribers keeping up; laggards should use `resume_from` against
/// the event store to catch up).
pub struct EventBus {
    inner: Mutex<Inner>,
}

/// Unsubscribe handle — dropping it also unsubscribes.
pub struct Subscription {
    id: u64,
    bus: Arc<EventBus>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
                next_sub_id: 0,
                retention: std::collections::HashMap::new(),
                seen: std::collections::HashSet::new(),
                retention_per_session: DEFAULT_RETENTION_PER_SESSION,
            }),
        })
    }

    /// Publish an envelope. Deduplicates by `(session_id, sequence)`:
    /// a republish of an already-seen pair is a no-op.
    pub fn publish(&self, envelope: Envelope) {
        let mut inner = self.inner.lock();
        let key = envelope.dedup_key();
        if !inner.seen.insert(key) {
            return;
        }

        if let Some(sid) = envelope.session_id.clone() {
            let cap = inner.retention_per_session;
            inner
                .retention
                .entry(sid)
                .or_insert_with(|| SessionRing::new(cap))
                .push(envelope.clone());
        }

        inner.subscribers.retain(|sub| {
            if let Some(filter) = &sub.session_filter {
                if envelope.session_id.as_deref() != Some(filter.as_str()) {
                    return true;
                }
            }
            if !sub.pattern.matches(&envelope.event_type) {
                return true;
            }
            // try_send: a lagging subscriber drops messages rather than
            // stalling the publisher. Dead receivers are pruned.
            match sub.tx.try_send(envelope.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Subscribe to events matching `pattern`, optionally scoped to one
    /// session. Returns a receiver plus an unsubscribe handle.
    pub fn subscribe(
        self: &Arc<Self>,
        pattern: Pattern,
        session_filter: Option<String>,
    ) -> (mpsc::Receiver<Envelope>, Subscription) {
        let (tx, rx) = mpsc::channel(256);
        let mut inner = self.inner.lock();
        let id = inner.next_sub_id;
        inner.next_sub_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            pattern,
            session_filter,
            tx,
        });
        drop(inner);
        (
            rx,
            Subscription {
                id,
                bus: Arc::clone(self),
            },
        )
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| s.id != id);
    }

    /// Replays retained envelopes for `session_id` with `sequence >
    /// cursor`. Envelopes older than the retention window are not
    /// returned here — callers needing full history should replay from
    /// the event store instead.
    pub fn resume_from(&self, session_id: &str, cursor: u64) -> Vec<Envelope> {
        let inner = self.inner.lock();
        inner
            .retention
            .get(session_id)
            .map(|ring| {
                ring.buf
                    .iter()
                    .filter(|e| e.sequence > cursor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(event_type: &str, session_id: &str, seq: u64) -> Envelope {
        Envelope {
            event_type: event_type.to_string(),
            session_id: Some(session_id.to_string()),
            sequence: seq,
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn prefix_pattern_matches_dotted_children_only() {
        let p = Pattern::parse("subagent.*");
        assert!(p.matches("subagent.spawned"));
        assert!(!p.matches("subagent"));
        assert!(!p.matches("subagentx.spawned"));
    }

    #[tokio::test]
    async fn subscriber_receives_matching_publish() {
        let bus = EventBus::new();
        let (mut rx, _sub) = bus.subscribe(Pattern::parse("message.*"), None);
        bus.publish(env("message.user", "s1", 1));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type, "message.user");
    }

    #[tokio::test]
    async fn duplicate_sequence_is_deduplicated() {
        let bus = EventBus::new();
        let (mut rx, _sub) = bus.subscribe(Pattern::Any, None);
        bus.publish(env("message.user", "s1", 1));
        bus.publish(env("message.user", "s1", 1));
        bus.publish(env("message.user", "s1", 2));
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resume_from_returns_only_events_after_cursor() {
        let bus = EventBus::new();
        bus.publish(env("message.user", "s1", 1));
        bus.publish(env("message.user", "s1", 2));
        bus.publish(env("message.user", "s1", 3));
        let resumed = bus.resume_from("s1", 1);
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].sequence, 2);
    }
}
