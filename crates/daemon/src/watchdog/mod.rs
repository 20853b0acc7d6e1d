//! Watchdog: heartbeat escalation and stuck-pane nudging.
//!
//! - [`heartbeat`]: adaptive check-in loop with the lead pane
//! - [`nudge`]: per-pane stuck detection and nudge records
//! - [`signals`]: pending-work signals from the coordination files
//! - [`notice`]: durable alert log and trigger-file delivery
//!
//! Both machines are pure; the orchestrator feeds them clocks and file
//! readings and performs the deliveries they ask for.

pub mod heartbeat;
pub mod notice;
pub mod nudge;
pub mod signals;

pub use heartbeat::{Heartbeat, Observation, WatchdogAction};
pub use notice::{write_trigger, AlertLog};
pub use nudge::{assess, NudgeDecision, NudgeTracker, PaneClocks, StuckAssessment, StuckThresholds};
pub use signals::{CoordinationFiles, HeartbeatRequest};
