use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sa_domain::event::{Event, EventInput, EventType};
use sa_domain::{Error, Result};

use crate::blob::BlobStore;
use crate::schema::{self, db_err};

/// Single-writer, multi-reader event store. `rusqlite` connections are
/// not `Sync`, so writes are serialized behind a mutex; SQLite's own MVCC
/// (WAL mode) lets readers proceed without blocking on that mutex.
pub struct EventStore {
    conn: Mutex<Connection>,
}

/// Row inserted by `append`; everything the caller needs to react to a
/// freshly committed event (publish to the fan-out bus, update counters
/// in memory, etc.) without a second read.
pub struct Appended {
    pub event: Event,
}

impl EventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn create_workspace(&self, path: &str) -> Result<String> {
        let conn = self.conn.lock();
        let id = sa_domain::event::new_id("ws");
        let now = chrono::Utc::now().to_rfc3339();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM workspaces WHERE path = ?1",
                [path],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(existing) = existing {
            conn.execute(
                "UPDATE workspaces SET last_activity_at = ?1 WHERE id = ?2",
                params![now, existing],
            )
            .map_err(db_err)?;
            return Ok(existing);
        }
        conn.execute(
            "INSERT INTO workspaces (id, path, created_at, last_activity_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, path, now],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    /// Creates a new, empty session with no events yet.
    pub fn create_session(
        &self,
        workspace_id: &str,
        model: Option<&str>,
        working_directory: Option<&str>,
    ) -> Result<String> {
        let conn = self.conn.lock();
        let id = sa_domain::event::new_id("sess");
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (id, workspace_id, model, working_directory, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, workspace_id, model, working_directory, now],
        )
        .map_err(db_err)?;
        Ok(id)
    }

    pub fn head_event_id(&self, session_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT head_event_id FROM sessions WHERE id = ?1",
            [session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
        .map(|v: Option<String>| v)
    }

    /// Appends one event, atomically advancing the session head and
    /// aggregate counters. Fails with `Error::StoreConflict` if
    /// `input.expected_parent_id` does not match the current head
    /// (optimistic concurrency on the session's single writer).
    pub fn append(&self, input: EventInput) -> Result<Appended> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;

        let current_head: Option<String> = tx
            .query_row(
                "SELECT head_event_id FROM sessions WHERE id = ?1",
                [&input.session_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| Error::SessionNotFound(input.session_id.clone()))?;

        if current_head != input.expected_parent_id {
            return Err(Error::StoreConflict {
                session_id: input.session_id.clone(),
                expected_parent: input
                    .expected_parent_id
                    .clone()
                    .unwrap_or_else(|| "<root>".to_string()),
            });
        }

        let depth: i64 = match &current_head {
            Some(_) => tx
                .query_row(
                    "SELECT depth FROM events WHERE id = ?1",
                    [&current_head],
                    |r| r.get(0),
                )
                .map_err(db_err)?,
            None => -1,
        };
        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE session_id = ?1",
                [&input.session_id],
                |r| r.get(0),
            )
            .map_err(db_err)?;

        let id = sa_domain::event::new_id("evt");
        let now = chrono::Utc::now();
        let payload_text = serde_json::to_string(&input.payload).map_err(Error::Json)?;

        let content_blob_id = if payload_text.len() > crate::blob::INLINE_THRESHOLD {
            Some(BlobStore::put_tx(&tx, payload_text.as_bytes(), "application/json")?)
        } else {
            None
        };

        tx.execute(
            "INSERT INTO events (
                id, session_id, parent_id, sequence, depth, event_type, timestamp,
                payload, content_blob_id, workspace_id, role, tool_name, tool_call_id, turn
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                id,
                input.session_id,
                input.expected_parent_id,
                next_seq,
                depth + 1,
                input.event_type.as_str(),
                now.to_rfc3339(),
                payload_text,
                content_blob_id,
                input.workspace_id,
                input.role,
                input.tool_name,
                input.tool_call_id,
                input.turn,
            ],
        )
        .map_err(db_err)?;

        tx.execute(
            "INSERT INTO events_fts (event_id, session_id, content) VALUES (?1, ?2, ?3)",
            params![id, input.session_id, searchable_text(&input.event_type, &input.payload)],
        )
        .map_err(db_err)?;

        let is_message = matches!(
            input.event_type,
            EventType::MessageUser | EventType::MessageAssistant | EventType::MessageSystem
        );
        let is_turn_end = matches!(input.event_type, EventType::StreamTurnEnd);

        tx.execute(
            "UPDATE sessions SET
                head_event_id = ?1,
                event_count = event_count + 1,
                message_count = message_count + ?2,
                turn_count = turn_count + ?3
             WHERE id = ?4",
            params![id, is_message as i64, is_turn_end as i64, input.session_id],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;

        let event = Event {
            id,
            session_id: input.session_id,
            parent_id: input.expected_parent_id,
            sequence: next_seq as u64,
            depth: (depth + 1) as u64,
            event_type: input.event_type,
            timestamp: now,
            payload: input.payload,
            content_blob_id,
            workspace_id: input.workspace_id,
            role: input.role,
            tool_name: input.tool_name,
            tool_call_id: input.tool_call_id,
            turn: input.turn,
            checksum: None,
        };

        Ok(Appended { event })
    }

    /// Full replay of a session's chain in sequence order, optionally
    /// starting strictly after `after_sequence` (used for fan-out resume
    /// and for replaying only the tail since a compaction boundary).
    pub fn replay(&self, session_id: &str, after_sequence: Option<u64>) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, parent_id, sequence, depth, event_type, timestamp,
                        payload, content_blob_id, workspace_id, role, tool_name, tool_call_id, turn, checksum
                 FROM events WHERE session_id = ?1 AND sequence > ?2 ORDER BY sequence ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id, after_sequence.unwrap_or(0) as i64], row_to_event)
            .map_err(db_err)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(db_err)?);
        }
        Ok(out)
    }

    pub fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, session_id, parent_id, sequence, depth, event_type, timestamp,
                    payload, content_blob_id, workspace_id, role, tool_name, tool_call_id, turn, checksum
             FROM events WHERE id = ?1",
            [event_id],
            row_to_event,
        )
        .optional()
        .map_err(db_err)
    }

    /// Forks a new session whose root lineage is the parent's chain up
    /// to and including `from_event_id`. The new session shares no rows
    /// with the parent; events are copied so each session's chain is an
    /// independent, contiguous sequence from 1.
    pub fn fork(&self, parent_session_id: &str, from_event_id: &str, workspace_id: &str) -> Result<String> {
        let prefix = self.replay(parent_session_id, None)?;
        let cut = prefix
            .iter()
            .position(|e| e.id == from_event_id)
            .ok_or_else(|| Error::EventNotFound(from_event_id.to_string()))?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let new_session_id = sa_domain::event::new_id("sess");
        let now = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO sessions (id, workspace_id, parent_session_id, fork_from_event_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![new_session_id, workspace_id, parent_session_id, from_event_id, now],
        )
        .map_err(db_err)?;

        let mut last_id: Option<String> = None;
        for (i, src) in prefix[..=cut].iter().enumerate() {
            let new_id = sa_domain::event::new_id("evt");
            let payload_text = serde_json::to_string(&src.payload).map_err(Error::Json)?;
            tx.execute(
                "INSERT INTO events (
                    id, session_id, parent_id, sequence, depth, event_type, timestamp,
                    payload, content_blob_id, workspace_id, role, tool_name, tool_call_id, turn
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                params![
                    new_id,
                    new_session_id,
                    last_id,
                    (i + 1) as i64,
                    i as i64,
                    src.event_type.as_str(),
                    src.timestamp.to_rfc3339(),
                    payload_text,
                    Option::<String>::None,
                    src.workspace_id,
                    src.role,
                    src.tool_name,
                    src.tool_call_id,
                    src.turn,
                ],
            )
            .map_err(db_err)?;
            last_id = Some(new_id);
        }

        tx.execute(
            "UPDATE sessions SET head_event_id = ?1, event_count = ?2 WHERE id = ?3",
            params![last_id, (cut + 1) as i64, new_session_id],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        Ok(new_session_id)
    }

    pub fn search(&self, session_id: &str, query: &str, limit: u32) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT event_id FROM events_fts WHERE session_id = ?1 AND events_fts MATCH ?2 LIMIT ?3",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id, query, limit], |r| r.get::<_, String>(0))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r.map_err(db_err)?);
        }
        Ok(out)
    }
}

fn searchable_text(event_type: &EventType, payload: &serde_json::Value) -> String {
    let text = payload
        .get("text")
        .and_then(|v| v.as_str())
        .or_else(|| payload.get("content").and_then(|v| v.as_str()))
        .unwrap_or_default();
    format!("{} {}", event_type.as_str(), text)
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let event_type_str: String = row.get(5)?;
    let payload_str: String = row.get(7)?;
    Ok(Event {
        id: row.get(0)?,
        session_id: row.get(1)?,
        parent_id: row.get(2)?,
        sequence: row.get::<_, i64>(3)? as u64,
        depth: row.get::<_, i64>(4)? as u64,
        event_type: parse_event_type(&event_type_str),
        timestamp: chrono::DateTime::parse_from_rfc3339(&row.get::<_, String>(6)?)
            .unwrap()
            .with_timezone(&chrono::Utc),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        content_blob_id: row.get(8)?,
        workspace_id: row.get(9)?,
        role: row.get(10)?,
        tool_name: row.get(11)?,
        tool_call_id: row.get(12)?,
        turn: row.get(13)?,
        checksum: row.get(14)?,
    })
}

fn parse_event_type(s: &str) -> EventType {
    use EventType::*;
    match s {
        "session.started" => SessionStarted,
        "session.ended" => SessionEnded,
        "session.forked" => SessionForked,
        "message.user" => MessageUser,
        "message.assistant" => MessageAssistant,
        "message.system" => MessageSystem,
        "message.deleted" => MessageDeleted,
        "tool.call" => ToolCall,
        "tool.result" => ToolResult,
        "stream.turn_start" => StreamTurnStart,
        "stream.turn_end" => StreamTurnEnd,
        "stream.text_delta" => StreamTextDelta,
        "stream.thinking_delta" => StreamThinkingDelta,
        "compact.boundary" => CompactBoundary,
        "compact.summary" => CompactSummary,
        "context.cleared" => ContextCleared,
        "config.model_switch" => ConfigModelSwitch,
        "config.prompt_update" => ConfigPromptUpdate,
        "config.reasoning_level" => ConfigReasoningLevel,
        "metadata.update" => MetadataUpdate,
        "metadata.tag" => MetadataTag,
        "subagent.spawned" => SubagentSpawned,
        "subagent.status_update" => SubagentStatusUpdate,
        "subagent.completed" => SubagentCompleted,
        "subagent.failed" => SubagentFailed,
        "hook.triggered" => HookTriggered,
        "hook.completed" => HookCompleted,
        "hook.background_started" => HookBackgroundStarted,
        "hook.background_completed" => HookBackgroundCompleted,
        "error.agent" => ErrorAgent,
        "error.tool" => ErrorTool,
        "error.provider" => ErrorProvider,
        "turn.failed" => TurnFailed,
        "notification.interrupted" => NotificationInterrupted,
        _ => MemoryLedger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store() -> EventStore {
        EventStore::open_in_memory().unwrap()
    }

    #[test]
    fn append_assigns_monotonic_contiguous_sequence() {
        let store = new_store();
        let ws = store.create_workspace("/tmp/proj").unwrap();
        let sess = store.create_session(&ws, None, None).unwrap();

        let e1 = store
            .append(EventInput::new(&sess, &ws, EventType::SessionStarted, serde_json::json!({})))
            .unwrap()
            .event;
        assert_eq!(e1.sequence, 1);

        let e2 = store
            .append(
                EventInput::new(&sess, &ws, EventType::MessageUser, serde_json::json!({"text":"hi"}))
                    .with_parent(e1.id.clone()),
            )
            .unwrap()
            .event;
        assert_eq!(e2.sequence, 2);
        assert_eq!(e2.parent_id.as_deref(), Some(e1.id.as_str()));
    }

    #[test]
    fn append_rejects_stale_parent() {
        let store = new_store();
        let ws = store.create_workspace("/tmp/proj").unwrap();
        let sess = store.create_session(&ws, None, None).unwrap();
        store
            .append(EventInput::new(&sess, &ws, EventType::SessionStarted, serde_json::json!({})))
            .unwrap();

        let result = store.append(EventInput::new(
            &sess,
            &ws,
            EventType::MessageUser,
            serde_json::json!({"text":"hi"}),
        ));
        assert!(matches!(result, Err(Error::StoreConflict { .. })));
    }

    #[test]
    fn replay_returns_events_in_sequence_order() {
        let store = new_store();
        let ws = store.create_workspace("/tmp/proj").unwrap();
        let sess = store.create_session(&ws, None, None).unwrap();
        let mut parent = None;
        for i in 0..5 {
            let mut input = EventInput::new(&sess, &ws, EventType::MetadataUpdate, serde_json::json!({"i": i}));
            input.expected_parent_id = parent.clone();
            let appended = store.append(input).unwrap().event;
            parent = Some(appended.id);
        }
        let events = store.replay(&sess, None).unwrap();
        assert_eq!(events.len(), 5);
        for (i, e) in events.iter().enumerate() {
            assert_eq!(e.sequence, (i + 1) as u64);
        }
    }

    #[test]
    fn fork_shares_prefix_and_diverges() {
        let store = new_store();
        let ws = store.create_workspace("/tmp/proj").unwrap();
        let sess = store.create_session(&ws, None, None).unwrap();
        let e1 = store
            .append(EventInput::new(&sess, &ws, EventType::SessionStarted, serde_json::json!({})))
            .unwrap()
            .event;
        let e2 = store
            .append(
                EventInput::new(&sess, &ws, EventType::MessageUser, serde_json::json!({"text":"hi"}))
                    .with_parent(e1.id.clone()),
            )
            .unwrap()
            .event;

        let forked = store.fork(&sess, &e2.id, &ws).unwrap();
        let forked_events = store.replay(&forked, None).unwrap();
        assert_eq!(forked_events.len(), 2);
        assert_eq!(forked_events[1].event_type.as_str(), "message.user");
    }
}
