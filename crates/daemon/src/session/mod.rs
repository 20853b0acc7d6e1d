//! Terminal session management.
//!
//! This module owns every pane's terminal: real PTY-backed shells and
//! simulated dry-run sessions, their scrollback and activity clocks.
//! Sessions can be spawned, written to, resized, paused and killed.

pub mod dry_run;
pub mod environment;
pub mod pty;
pub mod registry;
pub mod scrollback;

pub use dry_run::DryRunSession;
pub use environment::CwdResolver;
pub use pty::{PtyProcess, PtySpawn};
pub use registry::{SessionRegistry, SpawnRequest, SpawnResult, TerminalSession, WriteOutcome};
pub use scrollback::Scrollback;

use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session exists for the pane.
    #[error("no terminal for pane {0}")]
    NotFound(String),

    /// The pane id cannot be used as a file name.
    #[error("invalid pane id {0:?}")]
    InvalidPaneId(String),

    /// The session exists but its process is gone.
    #[error("terminal for pane {0} is not alive")]
    NotAlive(String),

    /// Failed to spawn the PTY.
    #[error("failed to spawn PTY: {0}")]
    SpawnFailed(String),

    /// Failed to write to the PTY.
    #[error("failed to write to PTY: {0}")]
    WriteFailed(String),

    /// The shell is not reading its input and the queue is full.
    #[error("input queue full ({0} pending writes), the terminal is not reading")]
    InputBacklog(usize),

    /// Failed to resize the PTY.
    #[error("failed to resize PTY: {0}")]
    ResizeFailed(String),

    /// Failed to kill the session.
    #[error("failed to kill session: {0}")]
    KillFailed(String),
}

/// Output and exit notifications from session backends.
///
/// Every event carries the generation of the spawn that produced it, so a
/// late event from a replaced session is recognised and dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Output {
        pane_id: String,
        generation: u64,
        data: String,
    },
    Exit {
        pane_id: String,
        generation: u64,
        code: Option<i32>,
    },
}

impl ProcessEvent {
    pub fn pane_id(&self) -> &str {
        match self {
            ProcessEvent::Output { pane_id, .. } | ProcessEvent::Exit { pane_id, .. } => pane_id,
        }
    }
}
