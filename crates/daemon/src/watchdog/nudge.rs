//! Stuck detection and nudge escalation.
//!
//! A pane is judged by its *input* clock: an agent can print a busy spinner
//! forever while wedged. Idle input is tolerated while the pane streams
//! output, unless that stream has carried nothing meaningful for the
//! churn-stall period.
//!
//! Each stuck pane gets a nudge record. The first detection nudges at once;
//! later nudges wait `nudge_interval`; after `max_nudges` the pane is marked
//! alerted and left for a human. Input that arrives within the ack grace
//! after a nudge is the nudge's own echo and does not count as an answer.

use std::collections::HashMap;

use protocol::NudgeInfo;

use crate::clock::elapsed;
use crate::config::StuckConfig;

/// Activity clocks of one pane, epoch millis.
#[derive(Debug, Clone, Copy)]
pub struct PaneClocks {
    pub last_activity: u64,
    pub last_meaningful_activity: u64,
    pub last_input_time: Option<u64>,
}

/// Idle figures for a pane judged stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StuckAssessment {
    pub input_idle_ms: u64,
    pub output_idle_ms: u64,
    pub meaningful_idle_ms: u64,
    /// Output is streaming but none of it has been meaningful for too long.
    pub churning: bool,
}

/// Stuck-detection thresholds, milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct StuckThresholds {
    pub input_idle_ms: u64,
    pub output_grace_ms: u64,
    pub churn_stall_ms: u64,
}

impl From<&StuckConfig> for StuckThresholds {
    fn from(config: &StuckConfig) -> Self {
        Self {
            input_idle_ms: config.input_idle_secs * 1000,
            output_grace_ms: config.output_grace_secs * 1000,
            churn_stall_ms: config.churn_stall_secs * 1000,
        }
    }
}

/// Judges whether a pane is stuck. Panes never written to are not judged.
pub fn assess(clocks: PaneClocks, now: u64, thresholds: StuckThresholds) -> Option<StuckAssessment> {
    let last_input = clocks.last_input_time?;
    let input_idle_ms = elapsed(now, last_input);
    if input_idle_ms < thresholds.input_idle_ms {
        return None;
    }

    let output_idle_ms = elapsed(now, clocks.last_activity);
    let meaningful_idle_ms = elapsed(now, clocks.last_meaningful_activity);
    let streaming = output_idle_ms < thresholds.output_grace_ms;
    let churning = streaming && meaningful_idle_ms >= thresholds.churn_stall_ms;

    if streaming && !churning {
        return None;
    }

    Some(StuckAssessment {
        input_idle_ms,
        output_idle_ms,
        meaningful_idle_ms,
        churning,
    })
}

/// What to do about a pane that is still stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeDecision {
    /// Deliver nudge number `attempt` (1-based).
    Nudge { attempt: u32 },
    /// Too soon since the last nudge.
    Wait,
    /// Nudges exhausted; raise the one-time alert.
    Alert { attempts: u32 },
    /// Already alerted; nothing more to do.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NudgeRecord {
    attempts: u32,
    last_nudge_at: u64,
    alerted: bool,
}

/// Nudge records for possibly-stuck panes. Never persisted.
#[derive(Debug)]
pub struct NudgeTracker {
    records: HashMap<String, NudgeRecord>,
    interval_ms: u64,
    max_nudges: u32,
    ack_grace_ms: u64,
}

impl NudgeTracker {
    pub fn new(config: &StuckConfig) -> Self {
        Self {
            records: HashMap::new(),
            interval_ms: config.nudge_interval_secs * 1000,
            max_nudges: config.max_nudges,
            ack_grace_ms: config.ack_grace_ms,
        }
    }

    /// Records a stuck detection and decides the next step.
    pub fn on_stuck(&mut self, pane_id: &str, now: u64) -> NudgeDecision {
        let Some(record) = self.records.get_mut(pane_id) else {
            self.records.insert(
                pane_id.to_string(),
                NudgeRecord {
                    attempts: 1,
                    last_nudge_at: now,
                    alerted: false,
                },
            );
            return NudgeDecision::Nudge { attempt: 1 };
        };

        if record.alerted {
            return NudgeDecision::Silent;
        }
        if elapsed(now, record.last_nudge_at) < self.interval_ms {
            return NudgeDecision::Wait;
        }
        if record.attempts >= self.max_nudges {
            record.alerted = true;
            return NudgeDecision::Alert {
                attempts: record.attempts,
            };
        }

        record.attempts += 1;
        record.last_nudge_at = now;
        NudgeDecision::Nudge {
            attempt: record.attempts,
        }
    }

    /// Clears a pane's record if its input clock moved after the grace
    /// period that follows the last nudge. Returns the attempts it took.
    pub fn check_ack(&mut self, pane_id: &str, last_input: Option<u64>) -> Option<u32> {
        let record = self.records.get(pane_id)?;
        let input = last_input?;
        if input > record.last_nudge_at + self.ack_grace_ms {
            let attempts = record.attempts;
            self.records.remove(pane_id);
            Some(attempts)
        } else {
            None
        }
    }

    /// Forgets one pane, or every pane. Returns how many records were cleared.
    pub fn reset(&mut self, pane_id: Option<&str>) -> usize {
        match pane_id {
            Some(id) => usize::from(self.records.remove(id).is_some()),
            None => {
                let cleared = self.records.len();
                self.records.clear();
                cleared
            }
        }
    }

    /// Pane ids with a record.
    pub fn panes(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records for one pane or all panes, ordered by pane id.
    pub fn status(&self, pane_id: Option<&str>) -> Vec<NudgeInfo> {
        let mut entries: Vec<NudgeInfo> = self
            .records
            .iter()
            .filter(|(id, _)| pane_id.map(|p| p == id.as_str()).unwrap_or(true))
            .map(|(id, r)| NudgeInfo {
                pane_id: id.clone(),
                attempts: r.attempts,
                last_nudge_at: r.last_nudge_at,
                alerted: r.alerted,
            })
            .collect();
        entries.sort_by(|a, b| a.pane_id.cmp(&b.pane_id));
        entries
    }
}
