//! Wire message definitions for the agentmux control socket.
//!
//! Clients send [`ClientAction`] records tagged by `action`; the daemon
//! answers and broadcasts [`DaemonEvent`] records tagged by `event`. Both use
//! kebab-case tags and camelCase fields, one JSON object per line.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::EventEnvelope;
use crate::error::{ProtocolError, Result};

/// Current protocol version, reported in `connected`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Pane ids are strings on the wire, but some front ends send small integers.
mod pane_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    impl From<Raw> for String {
        fn from(raw: Raw) -> Self {
            match raw {
                Raw::Text(s) => s,
                Raw::Number(n) => n.to_string(),
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Raw::deserialize(d).map(String::from)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Option::<Raw>::deserialize(d).map(|raw| raw.map(String::from))
    }
}

/// Actions a client can ask the daemon to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ClientAction {
    /// Start (or restart) the terminal session for a pane.
    #[serde(rename_all = "camelCase")]
    Spawn {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default)]
        dry_run: bool,
        /// Agent runtime hint, exported to the child as an environment flag.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cols: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows: Option<u16>,
    },
    /// Forward input into a pane.
    #[serde(rename_all = "camelCase")]
    Write {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
        data: String,
    },
    /// Resize a pane's terminal.
    #[serde(rename_all = "camelCase")]
    Resize {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
        cols: u16,
        rows: u16,
    },
    /// Terminate a pane's session and forget it.
    #[serde(rename_all = "camelCase")]
    Kill {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
    },
    /// Full snapshot of every terminal.
    List,
    /// Scrollback and liveness for one pane.
    #[serde(rename_all = "camelCase")]
    Attach {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
    },
    /// Stop reading a pane's output (flow control).
    #[serde(rename_all = "camelCase")]
    Pause {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
    },
    /// Resume reading a pane's output.
    #[serde(rename_all = "camelCase")]
    Resume {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
    },
    /// Liveness observation.
    Ping,
    /// Daemon health summary.
    Health,
    /// Start the heartbeat watchdog.
    HeartbeatEnable,
    /// Stop the heartbeat watchdog.
    HeartbeatDisable,
    /// Report the heartbeat watchdog state.
    HeartbeatStatus,
    /// Run a heartbeat tick now.
    HeartbeatTrigger,
    /// Nudge a pane by hand.
    #[serde(rename_all = "camelCase")]
    NudgeAgent {
        #[serde(deserialize_with = "pane_id::deserialize")]
        pane_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Inspect nudge records.
    #[serde(rename_all = "camelCase")]
    NudgeStatus {
        #[serde(
            default,
            deserialize_with = "pane_id::deserialize_opt",
            skip_serializing_if = "Option::is_none"
        )]
        pane_id: Option<String>,
    },
    /// Forget nudge records (one pane or all).
    #[serde(rename_all = "camelCase")]
    NudgeReset {
        #[serde(
            default,
            deserialize_with = "pane_id::deserialize_opt",
            skip_serializing_if = "Option::is_none"
        )]
        pane_id: Option<String>,
    },
    /// Duplicate-input guard statistics.
    GhostStats,
    /// Report panes whose input clock is idle past `threshold` seconds.
    Stuck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<u64>,
    },
    /// Return the snapshot recovered at startup.
    GetSession,
    /// Write a snapshot now.
    SaveSession,
    /// Delete the snapshot.
    ClearSession,
    /// Shut the daemon down gracefully.
    Shutdown,
}

impl ClientAction {
    /// Every action name accepted on the wire.
    pub const NAMES: [&'static str; 25] = [
        "spawn",
        "write",
        "resize",
        "kill",
        "list",
        "attach",
        "pause",
        "resume",
        "ping",
        "health",
        "heartbeat-enable",
        "heartbeat-disable",
        "heartbeat-status",
        "heartbeat-trigger",
        "nudge-agent",
        "nudge-status",
        "nudge-reset",
        "ghost-stats",
        "stuck",
        "get-session",
        "save-session",
        "clear-session",
        "shutdown",
        // Aliases kept for older front ends.
        "heartbeat-state",
        "nudge",
    ];

    /// The wire name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::Spawn { .. } => "spawn",
            ClientAction::Write { .. } => "write",
            ClientAction::Resize { .. } => "resize",
            ClientAction::Kill { .. } => "kill",
            ClientAction::List => "list",
            ClientAction::Attach { .. } => "attach",
            ClientAction::Pause { .. } => "pause",
            ClientAction::Resume { .. } => "resume",
            ClientAction::Ping => "ping",
            ClientAction::Health => "health",
            ClientAction::HeartbeatEnable => "heartbeat-enable",
            ClientAction::HeartbeatDisable => "heartbeat-disable",
            ClientAction::HeartbeatStatus => "heartbeat-status",
            ClientAction::HeartbeatTrigger => "heartbeat-trigger",
            ClientAction::NudgeAgent { .. } => "nudge-agent",
            ClientAction::NudgeStatus { .. } => "nudge-status",
            ClientAction::NudgeReset { .. } => "nudge-reset",
            ClientAction::GhostStats => "ghost-stats",
            ClientAction::Stuck { .. } => "stuck",
            ClientAction::GetSession => "get-session",
            ClientAction::SaveSession => "save-session",
            ClientAction::ClearSession => "clear-session",
            ClientAction::Shutdown => "shutdown",
        }
    }

    /// The pane this action targets, if it targets one.
    pub fn pane_id(&self) -> Option<&str> {
        match self {
            ClientAction::Spawn { pane_id, .. }
            | ClientAction::Write { pane_id, .. }
            | ClientAction::Resize { pane_id, .. }
            | ClientAction::Kill { pane_id }
            | ClientAction::Attach { pane_id }
            | ClientAction::Pause { pane_id }
            | ClientAction::Resume { pane_id }
            | ClientAction::NudgeAgent { pane_id, .. } => Some(pane_id),
            ClientAction::NudgeStatus { pane_id } | ClientAction::NudgeReset { pane_id } => {
                pane_id.as_deref()
            }
            _ => None,
        }
    }
}

/// Decodes one wire record into a [`ClientAction`].
///
/// Distinguishes malformed JSON, a missing `action`, an unknown action and
/// bad fields for a known action so the daemon can name the exact problem.
pub fn parse_action(line: &str) -> Result<ClientAction> {
    let mut value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let action = match value.get("action") {
        Some(serde_json::Value::String(name)) => name.clone(),
        _ => return Err(ProtocolError::MissingAction),
    };

    if !ClientAction::NAMES.contains(&action.as_str()) {
        return Err(ProtocolError::UnknownAction(action));
    }

    let canonical = match action.as_str() {
        "heartbeat-state" => "heartbeat-status",
        "nudge" => "nudge-agent",
        other => other,
    };
    if canonical != action {
        value["action"] = serde_json::Value::String(canonical.to_string());
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFields {
        action,
        reason: e.to_string(),
    })
}

/// How a pane's session is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    /// A real pseudo-terminal child process.
    Pty,
    /// A simulated session.
    DryRun,
}

/// Result of forwarding input to a pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
    /// The bytes reached the session.
    Accepted,
    /// No session exists for the pane.
    RejectedTerminalMissing,
    /// The session exists but is no longer alive.
    RejectedNotAlive,
    /// The write itself failed.
    Error,
}

impl WriteStatus {
    /// Returns true if the bytes reached the session.
    pub fn is_accepted(&self) -> bool {
        matches!(self, WriteStatus::Accepted)
    }
}

/// Heartbeat watchdog states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatState {
    /// No pending work.
    Idle,
    /// Pending work and recent progress.
    Active,
    /// Pending work but the status file has gone stale.
    Overdue,
    /// A stuck pane is being nudged.
    Recovering,
}

/// Full per-pane snapshot used by `connected` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub pane_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub pid: u32,
    pub alive: bool,
    pub cwd: String,
    pub mode: SessionMode,
    pub dry_run: bool,
    pub paused: bool,
    pub cols: u16,
    pub rows: u16,
    pub scrollback: String,
    /// Epoch milliseconds.
    pub created_at: u64,
    pub last_activity: u64,
    pub last_meaningful_activity: u64,
    #[serde(default)]
    pub last_input_time: Option<u64>,
}

/// One terminal inside a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTerminal {
    pub pane_id: String,
    pub cwd: String,
    pub alive: bool,
    pub scrollback: String,
    /// Epoch milliseconds.
    pub last_activity: u64,
}

/// Registry state saved for crash/restart recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub terminals: Vec<SnapshotTerminal>,
    pub saved_at: DateTime<Utc>,
    pub daemon_pid: u32,
}

/// Pending-work figures read from the coordination files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub pending_tasks: usize,
    pub open_blockers: usize,
    pub open_errors: usize,
    /// Seconds since the status file was modified; `None` if it is missing.
    #[serde(default)]
    pub status_age_secs: Option<u64>,
}

impl PendingSummary {
    /// Total outstanding items.
    pub fn total(&self) -> usize {
        self.pending_tasks + self.open_blockers + self.open_errors
    }
}

/// Answer to `heartbeat-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStatusInfo {
    pub enabled: bool,
    pub state: HeartbeatState,
    pub interval_ms: u64,
    pub recovering: bool,
    pub attempts: u32,
    pub awaiting_response: bool,
    pub escalated: bool,
    pub lead_pane: String,
    #[serde(default)]
    pub last_response_at: Option<DateTime<Utc>>,
    pub pending: PendingSummary,
}

/// One nudge record, as reported by `nudge-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeInfo {
    pub pane_id: String,
    pub attempts: u32,
    /// Epoch milliseconds.
    pub last_nudge_at: u64,
    pub alerted: bool,
}

/// One pane reported by `stuck`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckPaneInfo {
    pub pane_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub input_idle_ms: u64,
    pub output_idle_ms: u64,
    pub meaningful_idle_ms: u64,
    /// Streaming output that has carried nothing meaningful for too long.
    pub churning: bool,
    /// The scrollback tail looks like an approval prompt.
    pub awaiting_approval: bool,
}

/// One duplicate input the guard dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostBlockInfo {
    pub pane_id: String,
    pub preview: String,
    pub length: usize,
    /// Epoch milliseconds.
    pub at: u64,
}

/// Answer to `ghost-stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostStatsInfo {
    pub checked: u64,
    pub blocked: u64,
    pub window_ms: u64,
    pub min_length: usize,
    pub blocked_by_pane: HashMap<String, u64>,
    pub recent: Vec<GhostBlockInfo>,
}

/// Answer to `health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    pub pid: u32,
    pub version: String,
    pub uptime_secs: u64,
    pub terminals: usize,
    pub alive: usize,
    pub dry_run: usize,
    pub clients: usize,
    /// Clients that are dropping events because they read too slowly.
    #[serde(default)]
    pub backpressured_clients: Vec<u64>,
    pub kernel_seq: u64,
    pub watchdog_enabled: bool,
    pub heartbeat_state: HeartbeatState,
}

/// Events sent from the daemon to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DaemonEvent {
    /// Sent once to each new connection.
    #[serde(rename_all = "camelCase")]
    Connected {
        terminals: Vec<TerminalInfo>,
        daemon_pid: u32,
        protocol_version: u8,
    },
    #[serde(rename_all = "camelCase")]
    Spawned {
        pane_id: String,
        pid: u32,
        dry_run: bool,
        mode: SessionMode,
        cwd: String,
    },
    #[serde(rename_all = "camelCase")]
    Data { pane_id: String, data: String },
    #[serde(rename_all = "camelCase")]
    Exit { pane_id: String, code: Option<i32> },
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Killed { pane_id: String },
    List { terminals: Vec<TerminalInfo> },
    #[serde(rename_all = "camelCase")]
    Attached {
        pane_id: String,
        pid: u32,
        alive: bool,
        scrollback: String,
    },
    #[serde(rename_all = "camelCase")]
    Resized { pane_id: String, cols: u16, rows: u16 },
    #[serde(rename_all = "camelCase")]
    Paused { pane_id: String },
    #[serde(rename_all = "camelCase")]
    Resumed { pane_id: String },
    #[serde(rename_all = "camelCase")]
    Pong { timestamp: DateTime<Utc>, uptime_ms: u64 },
    Health(HealthInfo),
    #[serde(rename_all = "camelCase")]
    KernelEvent { event_data: EventEnvelope },
    #[serde(rename_all = "camelCase")]
    HeartbeatStateChanged {
        state: HeartbeatState,
        /// Poll interval for the new state, milliseconds.
        interval: u64,
    },
    HeartbeatStatus(HeartbeatStatusInfo),
    #[serde(rename_all = "camelCase")]
    HeartbeatTriggered {
        sent: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AgentStuckDetected {
        pane_id: String,
        idle_ms: u64,
        attempt: u32,
        churning: bool,
    },
    #[serde(rename_all = "camelCase")]
    AgentStuckAlert {
        pane_id: String,
        attempts: u32,
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    WatchdogAlert {
        message: String,
        pending: PendingSummary,
    },
    #[serde(rename_all = "camelCase")]
    NudgeResult {
        pane_id: String,
        sent: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    NudgeStatus { entries: Vec<NudgeInfo> },
    NudgeReset { cleared: usize },
    #[serde(rename_all = "camelCase")]
    GhostBlocked {
        pane_id: String,
        reason: String,
        preview: String,
        window_ms: u64,
    },
    GhostStats(GhostStatsInfo),
    #[serde(rename_all = "camelCase")]
    Stuck {
        threshold_secs: u64,
        panes: Vec<StuckPaneInfo>,
    },
    Session { snapshot: Option<SessionSnapshot> },
    SessionSaved { path: String, terminals: usize },
    SessionCleared,
    Shutdown { message: String },
}

impl DaemonEvent {
    /// Convenience constructor for error events.
    pub fn error(pane_id: Option<&str>, message: impl Into<String>) -> Self {
        DaemonEvent::Error {
            pane_id: pane_id.map(str::to_string),
            message: message.into(),
        }
    }
}
