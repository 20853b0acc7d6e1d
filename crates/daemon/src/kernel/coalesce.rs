//! Per-pane output coalescing.
//!
//! The first chunk from a quiet pane opens a window; every chunk that arrives
//! before the window closes is folded into one [`DataSummary`]. Windows are
//! independent per pane and flushed in deadline order, so the order of a
//! pane's summaries matches the order its output was produced.

use std::collections::HashMap;
use std::time::Duration;

use protocol::{Activity, DataSummary};
use tokio::time::Instant;

#[derive(Debug)]
struct Window {
    deadline: Instant,
    summary: DataSummary,
}

/// Folds bursts of output into one summary per pane per window.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    pending: HashMap<String, Window>,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Adds a chunk to the pane's open window, opening one if needed.
    pub fn record(&mut self, pane_id: &str, bytes: usize, meaningful: bool, now: Instant) {
        let activity = Activity::of(meaningful);
        match self.pending.get_mut(pane_id) {
            Some(window) => {
                window.summary.bytes += bytes;
                window.summary.chunks += 1;
                window.summary.activity = window.summary.activity.merge(activity);
            }
            None => {
                self.pending.insert(
                    pane_id.to_string(),
                    Window {
                        deadline: now + self.window,
                        summary: DataSummary {
                            bytes,
                            chunks: 1,
                            activity,
                        },
                    },
                );
            }
        }
    }

    /// Earliest deadline among open windows.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|w| w.deadline).min()
    }

    /// Closes every window whose deadline has passed, earliest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<(String, DataSummary)> {
        let mut due: Vec<(Instant, String)> = self
            .pending
            .iter()
            .filter(|(_, w)| w.deadline <= now)
            .map(|(id, w)| (w.deadline, id.clone()))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| self.pending.remove(&id).map(|w| (id, w.summary)))
            .collect()
    }

    /// Closes one pane's window early.
    pub fn flush_pane(&mut self, pane_id: &str) -> Option<DataSummary> {
        self.pending.remove(pane_id).map(|w| w.summary)
    }

    /// Closes every window, earliest deadline first.
    pub fn flush_all(&mut self) -> Vec<(String, DataSummary)> {
        let mut all: Vec<(Instant, String, DataSummary)> = self
            .pending
            .drain()
            .map(|(id, w)| (w.deadline, id, w.summary))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        all.into_iter().map(|(_, id, s)| (id, s)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
