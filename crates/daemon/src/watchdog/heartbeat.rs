//! Adaptive heartbeat state machine.
//!
//! The watchdog holds one authoritative state (`idle`, `active`, `overdue`,
//! or the sticky `recovering`) and a single transition that re-arms the tick
//! timer for that state. Each tick asks the lead pane to check in; an
//! unanswered request is re-sent up to `max_retries` times, then escalated to
//! the worker panes, then raised as an alert.
//!
//! The machine performs no I/O. Callers pass in an [`Observation`] of what the
//! coordination files say and carry out the returned [`WatchdogAction`]s.

use std::time::Duration;

use chrono::{DateTime, Utc};
use protocol::{HeartbeatState, HeartbeatStatusInfo, PendingSummary};
use tokio::time::Instant;

use super::signals::classify;
use crate::config::WatchdogConfig;

/// What the caller observed since the last call.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub pending: PendingSummary,
    /// The outstanding request (lead or escalation) was answered.
    pub responded: bool,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogAction {
    /// The effective state changed; the tick was re-armed.
    StateChanged {
        state: HeartbeatState,
        interval: Duration,
    },
    /// Deliver a heartbeat request to the lead pane.
    SendHeartbeat { attempt: u32 },
    /// The lead never answered; message the workers.
    Escalate { pending: PendingSummary },
    /// Nobody answered the escalation either.
    Alert {
        message: String,
        pending: PendingSummary,
    },
    /// The outstanding request was answered.
    Acknowledged { attempts: u32, escalated: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Quiet,
    AwaitingLead { sent_at_ms: u64, deadline: Instant },
    AwaitingWorkers { sent_at_ms: u64, deadline: Instant },
    Alerted { sent_at_ms: u64 },
}

/// The heartbeat watchdog.
#[derive(Debug)]
pub struct Heartbeat {
    config: WatchdogConfig,
    enabled: bool,
    derived: HeartbeatState,
    recovering: bool,
    attempts: u32,
    phase: Phase,
    next_tick: Option<Instant>,
    last_response_at: Option<DateTime<Utc>>,
    pending: PendingSummary,
}

impl Heartbeat {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            enabled: false,
            derived: HeartbeatState::Active,
            recovering: false,
            attempts: 0,
            phase: Phase::Quiet,
            next_tick: None,
            last_response_at: None,
            pending: PendingSummary::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The state in force: `recovering` overrides the derived state.
    pub fn state(&self) -> HeartbeatState {
        if self.recovering {
            HeartbeatState::Recovering
        } else {
            self.derived
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn interval(&self) -> Duration {
        self.config.interval_for(self.state())
    }

    /// Epoch millis of the outstanding request, if one is awaiting an answer.
    pub fn awaiting_since(&self) -> Option<u64> {
        match self.phase {
            Phase::Quiet => None,
            Phase::AwaitingLead { sent_at_ms, .. }
            | Phase::AwaitingWorkers { sent_at_ms, .. }
            | Phase::Alerted { sent_at_ms } => Some(sent_at_ms),
        }
    }

    /// True once the lead has been bypassed and workers were messaged.
    pub fn is_escalated(&self) -> bool {
        matches!(
            self.phase,
            Phase::AwaitingWorkers { .. } | Phase::Alerted { .. }
        )
    }

    /// Earliest instant at which [`Heartbeat::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.enabled {
            return None;
        }
        let phase_deadline = match self.phase {
            Phase::AwaitingLead { deadline, .. } | Phase::AwaitingWorkers { deadline, .. } => {
                Some(deadline)
            }
            _ => None,
        };
        match (self.next_tick, phase_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Starts the watchdog. Always reports the initial state.
    pub fn enable(&mut self, now: Instant, pending: PendingSummary) -> Vec<WatchdogAction> {
        self.enabled = true;
        self.phase = Phase::Quiet;
        self.attempts = 0;
        self.pending = pending;
        self.derived = classify(&self.pending, self.config.status_stale_secs);
        vec![self.rearm(now)]
    }

    /// Stops the watchdog and forgets any outstanding request.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.phase = Phase::Quiet;
        self.attempts = 0;
        self.next_tick = None;
    }

    /// Enters or leaves `recovering`.
    pub fn set_recovering(&mut self, recovering: bool, now: Instant) -> Option<WatchdogAction> {
        if self.recovering == recovering {
            return None;
        }
        let before = self.state();
        self.recovering = recovering;
        self.transition_from(before, now)
    }

    /// Re-derives the state and checks for an answer, without ticking.
    pub fn recheck(&mut self, now: Instant, now_ms: u64, observation: Observation) -> Vec<WatchdogAction> {
        if !self.enabled {
            return Vec::new();
        }
        let mut actions = Vec::new();

        if observation.responded && self.awaiting_since().is_some() {
            actions.push(WatchdogAction::Acknowledged {
                attempts: self.attempts,
                escalated: self.is_escalated(),
            });
            self.phase = Phase::Quiet;
            self.attempts = 0;
            self.last_response_at = DateTime::from_timestamp_millis(now_ms as i64);
            if let Some(change) = self.set_recovering(false, now) {
                actions.push(change);
            }
        }

        let before = self.state();
        self.pending = observation.pending;
        self.derived = classify(&self.pending, self.config.status_stale_secs);
        if let Some(change) = self.transition_from(before, now) {
            actions.push(change);
        }

        actions
    }

    /// Handles every deadline that has passed.
    pub fn poll(&mut self, now: Instant, now_ms: u64, observation: Observation) -> Vec<WatchdogAction> {
        let mut actions = self.recheck(now, now_ms, observation);
        if !self.enabled {
            return actions;
        }

        match self.phase {
            Phase::AwaitingLead { deadline, .. } if deadline <= now => {
                if self.attempts < self.config.max_retries {
                    self.attempts += 1;
                    actions.push(self.send(now, now_ms));
                } else {
                    tracing::warn!(attempts = self.attempts, "Lead pane unresponsive, escalating to workers");
                    self.phase = Phase::AwaitingWorkers {
                        sent_at_ms: now_ms,
                        deadline: now + Duration::from_secs(self.config.worker_timeout_secs),
                    };
                    actions.push(WatchdogAction::Escalate {
                        pending: self.pending.clone(),
                    });
                }
            }
            Phase::AwaitingWorkers { sent_at_ms, deadline } if deadline <= now => {
                self.phase = Phase::Alerted { sent_at_ms };
                actions.push(WatchdogAction::Alert {
                    message: format!(
                        "No response from lead pane {} after {} retries or from workers after escalation",
                        self.config.lead_pane, self.attempts
                    ),
                    pending: self.pending.clone(),
                });
            }
            _ => {}
        }

        if self.next_tick.map(|t| t <= now).unwrap_or(false) {
            self.next_tick = Some(now + self.interval());
            if self.phase == Phase::Quiet {
                actions.push(self.send(now, now_ms));
            }
        }

        actions
    }

    /// Sends a heartbeat now, regardless of the timer.
    ///
    /// Returns `None` when disabled or while an escalation is in progress.
    pub fn trigger(&mut self, now: Instant, now_ms: u64) -> Option<WatchdogAction> {
        if !self.enabled || self.is_escalated() {
            return None;
        }
        Some(self.send(now, now_ms))
    }

    fn send(&mut self, now: Instant, now_ms: u64) -> WatchdogAction {
        self.phase = Phase::AwaitingLead {
            sent_at_ms: now_ms,
            deadline: now + Duration::from_secs(self.config.response_timeout_secs),
        };
        WatchdogAction::SendHeartbeat {
            attempt: self.attempts,
        }
    }

    /// Re-arms the tick if the effective state differs from `before`.
    fn transition_from(&mut self, before: HeartbeatState, now: Instant) -> Option<WatchdogAction> {
        if self.state() == before {
            return None;
        }
        if !self.enabled {
            return None;
        }
        Some(self.rearm(now))
    }

    /// The single side-effecting transition: arm the tick for the current state.
    fn rearm(&mut self, now: Instant) -> WatchdogAction {
        let interval = self.interval();
        self.next_tick = Some(now + interval);
        tracing::info!(state = ?self.state(), interval_secs = interval.as_secs(), "Heartbeat state");
        WatchdogAction::StateChanged {
            state: self.state(),
            interval,
        }
    }

    pub fn status(&self) -> HeartbeatStatusInfo {
        HeartbeatStatusInfo {
            enabled: self.enabled,
            state: self.state(),
            interval_ms: self.interval().as_millis() as u64,
            recovering: self.recovering,
            attempts: self.attempts,
            awaiting_response: self.awaiting_since().is_some(),
            escalated: self.is_escalated(),
            lead_pane: self.config.lead_pane.clone(),
            last_response_at: self.last_response_at,
            pending: self.pending.clone(),
        }
    }
}
