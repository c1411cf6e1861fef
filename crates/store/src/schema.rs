use rusqlite::Connection;
use sa_domain::Result;

/// Each entry is one forward-only migration: idempotent SQL plus a human
/// description recorded in `schema_version`. Migrations never drop or
/// recreate tables — session history must never be destroyed by a
/// schema bump, unlike the drop-and-recreate pattern some reference
/// stores use when `PRAGMA user_version` is stale.
struct Migration {
    version: i64,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: workspaces, sessions, events, blobs, branches, device_tokens, logs",
        sql: r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            last_activity_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL REFERENCES workspaces(id),
            head_event_id TEXT,
            root_event_id TEXT,
            parent_session_id TEXT,
            fork_from_event_id TEXT,
            spawning_session_id TEXT,
            spawn_type TEXT,
            spawn_task TEXT,
            model TEXT,
            working_directory TEXT,
            archived_at TEXT,
            event_count INTEGER NOT NULL DEFAULT 0,
            message_count INTEGER NOT NULL DEFAULT 0,
            turn_count INTEGER NOT NULL DEFAULT 0,
            cumulative_tokens INTEGER NOT NULL DEFAULT 0,
            last_turn_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            parent_id TEXT,
            sequence INTEGER NOT NULL,
            depth INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            payload TEXT NOT NULL,
            content_blob_id TEXT,
            workspace_id TEXT NOT NULL,
            role TEXT,
            tool_name TEXT,
            tool_call_id TEXT,
            turn INTEGER,
            checksum TEXT,
            UNIQUE(session_id, sequence)
        );

        CREATE INDEX IF NOT EXISTS idx_events_session_seq ON events(session_id, sequence);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events(session_id, event_type);

        CREATE TABLE IF NOT EXISTS blobs (
            id TEXT PRIMARY KEY,
            hash TEXT NOT NULL UNIQUE,
            bytes BLOB NOT NULL,
            mime_type TEXT NOT NULL,
            original_size INTEGER NOT NULL,
            compressed_size INTEGER NOT NULL,
            compression TEXT,
            refcount INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS branches (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            name TEXT NOT NULL,
            head_event_id TEXT NOT NULL,
            UNIQUE(session_id, name)
        );

        CREATE TABLE IF NOT EXISTS device_tokens (
            token_hash TEXT PRIMARY KEY,
            label TEXT,
            created_at TEXT NOT NULL,
            last_used_at TEXT
        );

        CREATE TABLE IF NOT EXISTS logs (
            id TEXT PRIMARY KEY,
            session_id TEXT,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
            event_id UNINDEXED,
            session_id UNINDEXED,
            content,
            tokenize = 'porter'
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS logs_fts USING fts5(
            log_id UNINDEXED,
            content,
            tokenize = 'porter'
        );
        "#,
    },
];

/// Applies every migration above `schema_version`'s current maximum, in
/// order, inside one transaction. Safe to call on every startup.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT NOT NULL
        );",
    )
    .map_err(db_err)?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))
        .map_err(db_err)?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(migration.sql).map_err(db_err)?;
        conn.execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                chrono::Utc::now().to_rfc3339(),
                migration.description,
            ],
        )
        .map_err(db_err)?;
        tracing::info!(version = migration.version, "applied event store migration");
    }

    Ok(())
}

pub(crate) fn db_err(e: rusqlite::Error) -> sa_domain::Error {
    sa_domain::Error::Database(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn core_tables_exist_after_migration() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        for table in ["workspaces", "sessions", "events", "blobs", "branches", "device_tokens", "logs"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
