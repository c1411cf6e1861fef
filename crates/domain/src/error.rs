/// Shared error type used across every crate in the orchestration core.
///
/// Every taxonomy category from the error-handling design maps to a
/// distinct variant so callers can match on retryability instead of
/// inspecting message strings.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("provider auth: {0}")]
    ProviderAuth(String),

    #[error("provider rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("SerialMemory: {0}")]
    SerialMemory(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    /// Optimistic-concurrency failure: the asserted parent event was not
    /// the session head at append time.
    #[error("store conflict: session {session_id} head is not {expected_parent}")]
    StoreConflict {
        session_id: String,
        expected_parent: String,
    },

    #[error("event not found: {0}")]
    EventNotFound(String),

    /// A session's event chain failed a checksum or structural check.
    /// The session is moved to read-only; the error is surfaced via logs,
    /// not to the conversation.
    #[error("event corruption in session {session_id}: {detail}")]
    EventCorruption { session_id: String, detail: String },

    #[error("tool {tool} timed out after {elapsed_ms}ms")]
    ToolTimeout { tool: String, elapsed_ms: u64 },

    #[error("tool {tool} rejected input: {message}")]
    ToolValidation { tool: String, message: String },

    #[error("tool {tool} denied: {message}")]
    Guardrail { tool: String, message: String },

    #[error("token budget exceeded: {context_window} tokens over max {max_tokens}")]
    TokenOverflow {
        context_window: u64,
        max_tokens: u64,
    },

    #[error("subagent {session_id} timed out after {elapsed_ms}ms")]
    SubagentTimeout { session_id: String, elapsed_ms: u64 },

    #[error("subagent spawn failed: {0}")]
    SubagentSpawn(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {session_id} already has a turn in progress")]
    SessionBusy { session_id: String },

    #[error("turn aborted: {0}")]
    Interrupted(String),

    #[error("max turns ({0}) exceeded")]
    MaxTurnsExceeded(u32),

    #[error("database: {0}")]
    Database(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a caller may reasonably retry the operation that produced
    /// this error. Matches the taxonomy table in the error-handling design:
    /// network/5xx/rate-limit are retryable, auth/validation/guardrail/
    /// conflict/corruption are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::RateLimited { .. } => true,
            Error::Provider { .. } => true,
            Error::Http(_) => true,
            Error::SubagentTimeout { .. } => true,
            Error::Io(_)
            | Error::Json(_)
            | Error::ProviderAuth(_)
            | Error::SerialMemory(_)
            | Error::SkillNotFound(_)
            | Error::Config(_)
            | Error::Auth(_)
            | Error::StoreConflict { .. }
            | Error::EventNotFound(_)
            | Error::EventCorruption { .. }
            | Error::ToolTimeout { .. }
            | Error::ToolValidation { .. }
            | Error::Guardrail { .. }
            | Error::TokenOverflow { .. }
            | Error::SubagentSpawn(_)
            | Error::SessionNotFound(_)
            | Error::SessionBusy { .. }
            | Error::Interrupted(_)
            | Error::MaxTurnsExceeded(_)
            | Error::Database(_)
            | Error::Other(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_categories_match_taxonomy() {
        assert!(Error::Timeout("x".into()).is_retryable());
        assert!(Error::RateLimited { retry_after_ms: Some(100) }.is_retryable());
        assert!(!Error::Auth("x".into()).is_retryable());
        assert!(!Error::Guardrail { tool: "exec".into(), message: "no".into() }.is_retryable());
        assert!(!Error::StoreConflict {
            session_id: "s1".into(),
            expected_parent: "e1".into()
        }
        .is_retryable());
    }
}
