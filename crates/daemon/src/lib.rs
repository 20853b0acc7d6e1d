//! # agentmux Daemon Library
//!
//! The supervisory daemon of an agentmux workspace. It owns one terminal per
//! agent pane, speaks a line-delimited JSON protocol to any number of front
//! ends, and keeps the agents moving.
//!
//! ## Overview
//!
//! - **Terminal Sessions**: one PTY (or simulated dry-run terminal) per pane,
//!   with bounded scrollback and input/output activity clocks
//! - **Event Kernel**: state changes wrapped in causal envelopes with a
//!   strictly increasing sequence, pane output coalesced into summaries
//! - **Watchdog**: an adaptive heartbeat to the lead pane with escalation to
//!   workers, plus stuck-pane detection and a capped nudge ladder
//! - **Ghost-input Guard**: identical writes to one pane in quick succession
//!   are dropped
//! - **Persistence**: periodic session snapshots, PID file and daemon log
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │   Session    │  │    Event     │  │     Watchdog       │  │
//! │  │   Registry   │  │    Kernel    │  │ heartbeat / nudges │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                     Action Router                      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │          IPC server + client hub (Unix socket)         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::ipc::{serve, IpcServer};
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let server = IpcServer::bind(&config.socket_path()).await?;
//!
//!     let orchestrator = DaemonOrchestrator::new(config)?;
//!     let handles = orchestrator.handles();
//!     tokio::spawn(serve(server, handles.hub, handles.clients, handles.server_stop));
//!
//!     // Runs until a client sends `shutdown` or `handles.shutdown` is cancelled.
//!     orchestrator.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Terminal session registry and backends
//! - [`kernel`]: Causal envelopes and output coalescing
//! - [`watchdog`]: Heartbeat, stuck detection and nudges
//! - [`dedup`]: Ghost-input guard
//! - [`persistence`]: Session snapshots
//! - [`ipc`]: Unix socket server, client hub and client
//! - [`router`]: Action dispatch
//! - [`orchestrator`]: The event loop that owns it all

pub mod classify;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod ipc;
pub mod kernel;
pub mod orchestrator;
pub mod persistence;
pub mod router;
pub mod session;
pub mod watchdog;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;
pub use orchestrator::{DaemonHandles, DaemonOrchestrator};
pub use session::{SessionError, SessionRegistry};
