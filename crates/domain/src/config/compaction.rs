use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow. Triggered by estimated token usage,
/// not turn count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable automatic compaction.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Compaction fires when estimated tokens exceed `max_tokens *
    /// compaction_threshold`.
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "d_compaction_threshold")]
    pub compaction_threshold: f64,
    /// Number of user/assistant message pairs to keep verbatim after the
    /// synthesized summary. `preserve_recent_count * 2` messages.
    #[serde(default = "d_6")]
    pub preserve_recent_count: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            max_tokens: d_max_tokens(),
            compaction_threshold: d_compaction_threshold(),
            preserve_recent_count: 6,
        }
    }
}

fn d_max_tokens() -> u64 {
    150_000
}
fn d_compaction_threshold() -> f64 {
    0.8
}
fn d_6() -> usize {
    6
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls automatic memory capture — the always-on behaviour that
/// makes the agent feel alive across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLifecycleConfig {
    /// Automatically capture each turn to long-term memory.
    #[serde(default = "d_true")]
    pub auto_capture: bool,
    /// Ingest a session summary to memory when compaction runs.
    #[serde(default = "d_true")]
    pub capture_on_compaction: bool,
}

impl Default for MemoryLifecycleConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            capture_on_compaction: true,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
