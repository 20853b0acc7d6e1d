//! # agentmux Protocol Library
//!
//! Wire vocabulary shared by the agentmux daemon and its front ends.
//!
//! ## Overview
//!
//! - **Messages**: [`ClientAction`] records sent by clients and
//!   [`DaemonEvent`] records sent by the daemon
//! - **Envelopes**: causally linked [`EventEnvelope`]s wrapping daemon
//!   state changes
//! - **Framing**: newline-delimited JSON with per-connection reassembly
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     ClientAction / DaemonEvent          │  JSON objects
//! ├─────────────────────────────────────────┤
//! │     EventEnvelope (kernel-event)        │  seq, correlation, causation
//! ├─────────────────────────────────────────┤
//! │     Line framing                        │  one record per `\n`
//! ├─────────────────────────────────────────┤
//! │     Unix domain socket                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{parse_action, ClientAction, LineBuffer};
//!
//! let mut buffer = LineBuffer::new();
//! let mut actions = Vec::new();
//! for chunk in [&b"{\"action\":\"wr"[..], &b"ite\",\"paneId\":\"1\",\"data\":\"ls\"}\n"[..]] {
//!     for line in buffer.push(chunk) {
//!         actions.push(parse_action(&line.unwrap()).unwrap());
//!     }
//! }
//! assert_eq!(actions[0].name(), "write");
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: action and event definitions
//! - [`envelope`]: kernel event envelopes
//! - [`framing`]: line reassembly and encoding
//! - [`error`]: error types

pub mod envelope;
pub mod error;
pub mod framing;
pub mod messages;

pub use envelope::{Activity, DataSummary, EventEnvelope, KernelEventType};
pub use error::{ProtocolError, Result};
pub use framing::{encode_line, LineBuffer, DEFAULT_MAX_LINE_BYTES};
pub use messages::{
    parse_action, ClientAction, DaemonEvent, GhostBlockInfo, GhostStatsInfo, HealthInfo,
    HeartbeatState, HeartbeatStatusInfo, NudgeInfo, PendingSummary, SessionMode, SessionSnapshot,
    SnapshotTerminal, StuckPaneInfo, TerminalInfo, WriteStatus, PROTOCOL_VERSION,
};
