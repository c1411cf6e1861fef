//! Multi-agent runtime — manages sub-agents and delegates work.
//!
//! The master agent can delegate tasks to specialist sub-agents via the
//! `agent.run` internal tool.  Each sub-agent has its own workspace, skills,
//! tool policy, model mappings, and memory isolation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;

use sa_domain::config::{AgentConfig, ToolPolicy};
use sa_skills::registry::SkillsRegistry;

use crate::state::AppState;
use crate::workspace::files::WorkspaceReader;

use super::bus;
use super::{run_turn, TurnEvent, TurnInput};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentContext — per-agent overrides threaded into the turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-agent overrides that modify runtime behaviour inside a turn.
#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: String,
    pub workspace: Arc<WorkspaceReader>,
    pub skills: Arc<SkillsRegistry>,
    pub tool_policy: ToolPolicy,
    /// Role→model spec overrides (e.g. `{ "executor": "vllm/qwen2.5-coder-32b" }`).
    pub models: HashMap<String, String>,
    /// The cancel group this child belongs to (for cascading stop).
    pub cancel_group: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentRuntime — pre-built state for a single agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct AgentRuntime {
    pub id: String,
    pub config: AgentConfig,
    pub workspace: Arc<WorkspaceReader>,
    pub skills: Arc<SkillsRegistry>,
}

impl AgentRuntime {
    /// Build an `AgentContext` from this runtime's configuration.
    pub fn context(&self, cancel_group: Option<String>) -> AgentContext {
        AgentContext {
            agent_id: self.id.clone(),
            workspace: self.workspace.clone(),
            skills: self.skills.clone(),
            tool_policy: self.config.tool_policy.clone(),
            models: self.config.models.clone(),
            cancel_group,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentManager — registry of all configured sub-agents
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentManager {
    agents: HashMap<String, Arc<AgentRuntime>>,
}

impl AgentManager {
    /// Build the agent manager from config.
    ///
    /// For each configured agent, creates a scoped `WorkspaceReader` and
    /// `SkillsRegistry`.  Falls back to the global workspace/skills path
    /// when not overridden.
    pub fn from_config(state: &AppState) -> Self {
        let mut agents = HashMap::new();

        for (id, cfg) in &state.config.agents {
            let ws_path = cfg
                .workspace_path
                .clone()
                .unwrap_or_else(|| state.config.workspace.path.clone());
            let skills_path = cfg
                .skills_path
                .clone()
                .unwrap_or_else(|| state.config.skills.path.clone());

            let workspace = Arc::new(WorkspaceReader::new(ws_path));
            let skills = match SkillsRegistry::load(&skills_path) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    tracing::warn!(
                        agent_id = id,
                        error = %e,
                        "failed to load skills for agent, using empty registry"
                    );
                    Arc::new(SkillsRegistry::empty())
                }
            };

            let runtime = AgentRuntime {
                id: id.clone(),
                config: cfg.clone(),
                workspace,
                skills,
            };

            tracing::info!(
                agent_id = id,
                tools_allowed = ?cfg.tool_policy.allow,
                tools_denied = ?cfg.tool_policy.deny,
                models = ?cfg.models,
                "registered sub-agent"
            );

            agents.insert(id.clone(), Arc::new(runtime));
        }

        Self { agents }
    }

    /// Look up a sub-agent by ID.
    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        self.agents.get(agent_id).cloned()
    }

    /// List all registered agent IDs (sorted).
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SubagentTracker — status/result store for non-blocking dispatches
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a tracked sub-agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

/// Snapshot of a tracked sub-agent run, returned by `agent.query`.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentRecord {
    pub task_id: String,
    pub agent_id: String,
    pub parent_session_key: String,
    pub status: SubagentStatus,
    pub result: Option<String>,
    pub is_error: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Tracks non-blocking `agent.run` dispatches so the parent turn can
/// poll (`agent.query`) or block (`agent.wait_for`) on completion later.
///
/// Mirrors [`super::cancel::CancelMap`]'s shape: a `parking_lot::RwLock`
/// over a plain map, plus a side table of oneshot waiters so `wait_for`
/// doesn't have to poll.
pub struct SubagentTracker {
    records: RwLock<HashMap<String, SubagentRecord>>,
    waiters: RwLock<HashMap<String, Vec<oneshot::Sender<()>>>>,
    sequence: AtomicU64,
}

impl SubagentTracker {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            waiters: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a newly-spawned run as `Running`.
    pub fn spawn(&self, task_id: &str, agent_id: &str, parent_session_key: &str) {
        self.records.write().insert(
            task_id.to_string(),
            SubagentRecord {
                task_id: task_id.to_string(),
                agent_id: agent_id.to_string(),
                parent_session_key: parent_session_key.to_string(),
                status: SubagentStatus::Running,
                result: None,
                is_error: false,
                started_at: Utc::now(),
                completed_at: None,
            },
        );
    }

    /// Mark a run complete (or failed) and wake any `wait_for` callers.
    pub fn complete(&self, task_id: &str, result: String, is_error: bool) {
        {
            let mut records = self.records.write();
            if let Some(rec) = records.get_mut(task_id) {
                rec.status = if is_error {
                    SubagentStatus::Failed
                } else {
                    SubagentStatus::Completed
                };
                rec.result = Some(result);
                rec.is_error = is_error;
                rec.completed_at = Some(Utc::now());
            }
        }
        let waiters = self.waiters.write().remove(task_id);
        if let Some(waiters) = waiters {
            for tx in waiters {
                let _ = tx.send(());
            }
        }
    }

    /// Whether `task_id` is known to the tracker.
    pub fn has(&self, task_id: &str) -> bool {
        self.records.read().contains_key(task_id)
    }

    /// Current snapshot of a tracked run.
    pub fn query(&self, task_id: &str) -> Option<SubagentRecord> {
        self.records.read().get(task_id).cloned()
    }

    /// Block until `task_id` completes (or `timeout` elapses). Returns
    /// `None` if the task is unknown or the wait times out.
    pub async fn wait_for(&self, task_id: &str, timeout: Option<Duration>) -> Option<SubagentRecord> {
        if let Some(rec) = self.query(task_id) {
            if rec.status != SubagentStatus::Running {
                return Some(rec);
            }
        } else {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        self.waiters
            .write()
            .entry(task_id.to_string())
            .or_default()
            .push(tx);

        // Re-check after registering the waiter: the run may have
        // completed between the first `query` and the insert above.
        if let Some(rec) = self.query(task_id) {
            if rec.status != SubagentStatus::Running {
                return Some(rec);
            }
        }

        match timeout {
            Some(d) => {
                let _ = tokio::time::timeout(d, rx).await;
            }
            None => {
                let _ = rx.await;
            }
        }
        self.query(task_id)
    }

    fn publish_status(&self, bus: &bus::EventBus, rec: &SubagentRecord) {
        bus.publish(bus::Envelope {
            event_type: match rec.status {
                SubagentStatus::Running => "subagent.spawned".to_string(),
                SubagentStatus::Completed => "subagent.completed".to_string(),
                SubagentStatus::Failed => "subagent.failed".to_string(),
            },
            session_id: Some(rec.parent_session_key.clone()),
            sequence: self.next_sequence(),
            timestamp: Utc::now(),
            data: serde_json::json!({
                "task_id": rec.task_id,
                "agent_id": rec.agent_id,
                "status": rec.status,
                "result": rec.result,
                "is_error": rec.is_error,
            }),
        });
    }
}

impl Default for SubagentTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// agent.run — execute a task as a sub-agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of dispatching `agent.run`.
pub enum RunOutcome {
    /// `blocking: true` — the child turn ran to completion inline.
    Finished { result: String, is_error: bool },
    /// `blocking: false` — the child was spawned in the background;
    /// poll `agent.query`/`agent.wait_for` with `task_id` for the result.
    Spawned { task_id: String },
}

/// Execute a task as a sub-agent.
///
/// When `blocking` is `true`, drains the child turn inline and returns
/// once it finishes (subject to `timeout_ms`, after which the child is
/// cancelled via its cancel group and a timeout error is returned).
/// When `false`, spawns the drain loop on a background task and returns
/// the `task_id` immediately; the result lands in the [`SubagentTracker`]
/// once the child finishes.
pub async fn run_agent(
    state: &AppState,
    agent_id: &str,
    task: &str,
    model_override: Option<String>,
    parent_session_key: &str,
    blocking: bool,
    timeout_ms: Option<u64>,
) -> RunOutcome {
    let manager = match &state.agents {
        Some(m) => m,
        None => {
            return RunOutcome::Finished {
                result: "no agent manager configured".into(),
                is_error: true,
            }
        }
    };

    let runtime = match manager.get(agent_id) {
        Some(r) => r,
        None => {
            return RunOutcome::Finished {
                result: format!("agent '{agent_id}' not found. Available: {:?}", manager.list()),
                is_error: true,
            };
        }
    };

    // Child session key: agent:<agent_id>:task:<uuid>
    let task_id = uuid::Uuid::new_v4().to_string();
    let child_session_key = format!("agent:{agent_id}:task:{task_id}");
    let child_session_id = task_id.clone();

    // Register the child in the parent's cancel group.
    state
        .cancel_map
        .add_to_group(parent_session_key, &child_session_key);

    // Resolve model: run override → agent models → global.
    let model = model_override.or_else(|| runtime.config.models.get("executor").cloned());

    let input = TurnInput {
        session_key: child_session_key.clone(),
        session_id: child_session_id,
        user_message: task.to_string(),
        model,
        response_format: None,
        routing_profile: None,
        agent: Some(runtime.context(Some(parent_session_key.to_string()))),
    };

    state.subagent_tracker.spawn(&task_id, agent_id, parent_session_key);
    {
        let rec = state.subagent_tracker.query(&task_id).expect("just spawned");
        state.subagent_tracker.publish_status(&state.bus, &rec);
    }

    if !blocking {
        let state = state.clone();
        let parent_key = parent_session_key.to_string();
        let child_key = child_session_key.clone();
        let spawned_task_id = task_id.clone();
        tokio::spawn(async move {
            let (result, is_error) = drain_turn(&state, input).await;
            state.subagent_tracker.complete(&spawned_task_id, result, is_error);
            if let Some(rec) = state.subagent_tracker.query(&spawned_task_id) {
                state.subagent_tracker.publish_status(&state.bus, &rec);
            }
            state.cancel_map.remove_from_group(&parent_key, &child_key);
        });
        return RunOutcome::Spawned { task_id };
    }

    let drain = drain_turn(state, input);
    let (result, errored) = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), drain).await {
            Ok(outcome) => outcome,
            Err(_) => {
                state.cancel_map.cancel(&child_session_key);
                (
                    format!("agent '{agent_id}' timed out after {ms}ms"),
                    true,
                )
            }
        },
        None => drain.await,
    };

    state.subagent_tracker.complete(&task_id, result.clone(), errored);
    if let Some(rec) = state.subagent_tracker.query(&task_id) {
        state.subagent_tracker.publish_status(&state.bus, &rec);
    }
    state
        .cancel_map
        .remove_from_group(parent_session_key, &child_session_key);

    RunOutcome::Finished {
        result,
        is_error: errored,
    }
}

/// Drive a child turn's event stream to completion, collecting the
/// final text. Shared by both the blocking and background-spawn paths.
async fn drain_turn(state: &AppState, input: TurnInput) -> (String, bool) {
    let (_run_id, mut rx) = run_turn(state.clone(), input);

    let mut result = String::new();
    let mut errored = false;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Final { content } => result = content,
            TurnEvent::Stopped { content } => {
                result = if content.is_empty() {
                    "[agent stopped]".into()
                } else {
                    content
                };
            }
            TurnEvent::Error { message } => {
                result = message;
                errored = true;
            }
            _ => {}
        }
    }

    (result, errored)
}
