//! Causal event envelopes.
//!
//! The daemon wraps every protocol-relevant state change in an
//! [`EventEnvelope`]. Envelopes carry a per-daemon sequence number that is
//! strictly increasing, a correlation id shared by a request and its
//! acknowledgement, and an optional causation id naming the envelope that
//! triggered this one. Observers use these to rebuild "what caused what"
//! even though the socket gives no ordering guarantee across connections.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed vocabulary of kernel event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelEventType {
    /// A pane's terminal session came up.
    #[serde(rename = "pty.up")]
    PtyUp,
    /// A pane's terminal session went away (exit or kill).
    #[serde(rename = "pty.down")]
    PtyDown,
    /// Coalesced summary of output received from a pane.
    #[serde(rename = "pty.data.received")]
    PtyDataReceived,
    /// A resize was requested.
    #[serde(rename = "pty.resize.requested")]
    PtyResizeRequested,
    /// A resize was applied.
    #[serde(rename = "pty.resize.ack")]
    PtyResizeAck,
    /// Output reading for a pane was paused.
    #[serde(rename = "pty.paused")]
    PtyPaused,
    /// Output reading for a pane was resumed.
    #[serde(rename = "pty.resumed")]
    PtyResumed,
    /// A client asked to write input into a pane.
    #[serde(rename = "daemon.write.requested")]
    DaemonWriteRequested,
    /// The outcome of a write request.
    #[serde(rename = "daemon.write.ack")]
    DaemonWriteAck,
    /// A write was dropped as duplicate input.
    #[serde(rename = "daemon.write.blocked")]
    DaemonWriteBlocked,
    /// The heartbeat watchdog changed state.
    #[serde(rename = "watchdog.state.changed")]
    WatchdogStateChanged,
    /// A heartbeat request was delivered to the lead pane.
    #[serde(rename = "watchdog.heartbeat.sent")]
    WatchdogHeartbeatSent,
    /// A heartbeat request was answered.
    #[serde(rename = "watchdog.heartbeat.acknowledged")]
    WatchdogHeartbeatAcknowledged,
    /// The watchdog escalated to worker panes.
    #[serde(rename = "watchdog.escalated")]
    WatchdogEscalated,
    /// The watchdog raised a system-wide alert.
    #[serde(rename = "watchdog.alert")]
    WatchdogAlert,
    /// A stuck pane was nudged.
    #[serde(rename = "nudge.sent")]
    NudgeSent,
    /// A nudged pane responded.
    #[serde(rename = "nudge.acknowledged")]
    NudgeAcknowledged,
    /// A pane exhausted its nudges.
    #[serde(rename = "nudge.alert")]
    NudgeAlert,
    /// The session snapshot was written.
    #[serde(rename = "session.saved")]
    SessionSaved,
    /// The daemon began shutting down.
    #[serde(rename = "daemon.shutdown")]
    DaemonShutdown,
}

impl KernelEventType {
    /// Every event type, in declaration order.
    pub const ALL: [KernelEventType; 20] = [
        KernelEventType::PtyUp,
        KernelEventType::PtyDown,
        KernelEventType::PtyDataReceived,
        KernelEventType::PtyResizeRequested,
        KernelEventType::PtyResizeAck,
        KernelEventType::PtyPaused,
        KernelEventType::PtyResumed,
        KernelEventType::DaemonWriteRequested,
        KernelEventType::DaemonWriteAck,
        KernelEventType::DaemonWriteBlocked,
        KernelEventType::WatchdogStateChanged,
        KernelEventType::WatchdogHeartbeatSent,
        KernelEventType::WatchdogHeartbeatAcknowledged,
        KernelEventType::WatchdogEscalated,
        KernelEventType::WatchdogAlert,
        KernelEventType::NudgeSent,
        KernelEventType::NudgeAcknowledged,
        KernelEventType::NudgeAlert,
        KernelEventType::SessionSaved,
        KernelEventType::DaemonShutdown,
    ];

    /// The dotted wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelEventType::PtyUp => "pty.up",
            KernelEventType::PtyDown => "pty.down",
            KernelEventType::PtyDataReceived => "pty.data.received",
            KernelEventType::PtyResizeRequested => "pty.resize.requested",
            KernelEventType::PtyResizeAck => "pty.resize.ack",
            KernelEventType::PtyPaused => "pty.paused",
            KernelEventType::PtyResumed => "pty.resumed",
            KernelEventType::DaemonWriteRequested => "daemon.write.requested",
            KernelEventType::DaemonWriteAck => "daemon.write.ack",
            KernelEventType::DaemonWriteBlocked => "daemon.write.blocked",
            KernelEventType::WatchdogStateChanged => "watchdog.state.changed",
            KernelEventType::WatchdogHeartbeatSent => "watchdog.heartbeat.sent",
            KernelEventType::WatchdogHeartbeatAcknowledged => "watchdog.heartbeat.acknowledged",
            KernelEventType::WatchdogEscalated => "watchdog.escalated",
            KernelEventType::WatchdogAlert => "watchdog.alert",
            KernelEventType::NudgeSent => "nudge.sent",
            KernelEventType::NudgeAcknowledged => "nudge.acknowledged",
            KernelEventType::NudgeAlert => "nudge.alert",
            KernelEventType::SessionSaved => "session.saved",
            KernelEventType::DaemonShutdown => "daemon.shutdown",
        }
    }
}

impl fmt::Display for KernelEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kernel event wrapped with its causal metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique id of this envelope.
    pub event_id: String,
    /// Trace id shared by every envelope of one logical exchange.
    pub correlation_id: String,
    /// The envelope that caused this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Event type from the closed vocabulary.
    #[serde(rename = "type")]
    pub event_type: KernelEventType,
    /// Emitter: `daemon`, `pty`, `watchdog` or `client:<n>`.
    pub source: String,
    /// Pane the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
    /// Wall-clock emission time.
    pub timestamp: DateTime<Utc>,
    /// Per-daemon strictly increasing sequence number.
    pub seq: u64,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Returns true if `other` is this envelope's direct cause.
    pub fn is_caused_by(&self, other: &EventEnvelope) -> bool {
        self.causation_id.as_deref() == Some(other.event_id.as_str())
    }
}

/// Output classification carried by coalesced data summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    /// Only meaningful output in the window.
    Meaningful,
    /// Only cosmetic output (control sequences, whitespace, spinner glyphs).
    Cosmetic,
    /// Both kinds in the window.
    Mixed,
}

impl Activity {
    /// Classification of a single chunk.
    pub fn of(meaningful: bool) -> Self {
        if meaningful {
            Activity::Meaningful
        } else {
            Activity::Cosmetic
        }
    }

    /// Combines two classifications observed in the same window.
    pub fn merge(self, other: Activity) -> Activity {
        if self == other {
            self
        } else {
            Activity::Mixed
        }
    }
}

/// Payload of a coalesced `pty.data.received` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    /// Total bytes received in the window.
    pub bytes: usize,
    /// Number of chunks merged.
    pub chunks: usize,
    /// Meaningful, cosmetic or mixed.
    pub activity: Activity,
}
