//! Duplicate-input ("ghost text") guard.
//!
//! Front ends occasionally submit the same text twice in quick succession.
//! The guard drops identical input sent to the *same* pane within a short
//! window; identical input to different panes is a legitimate broadcast and
//! always passes. Inputs shorter than the minimum length are never checked,
//! so repeated keystrokes go through.

use std::collections::{HashMap, VecDeque};

use protocol::{GhostBlockInfo, GhostStatsInfo};

use crate::config::DedupConfig;

/// Characters of blocked input kept for reporting.
const PREVIEW_CHARS: usize = 40;

/// Verdict for one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    Allow,
    /// Dropped; the same input reached this pane `age_ms` ago.
    Block { age_ms: u64, preview: String },
}

/// Per-pane memory of the last checked input.
#[derive(Debug)]
pub struct DedupGuard {
    window_ms: u64,
    min_length: usize,
    recent_limit: usize,
    last: HashMap<String, (String, u64)>,
    checked: u64,
    blocked: u64,
    blocked_by_pane: HashMap<String, u64>,
    recent: VecDeque<GhostBlockInfo>,
}

impl DedupGuard {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            window_ms: config.window_ms,
            min_length: config.min_length,
            recent_limit: config.recent_limit,
            last: HashMap::new(),
            checked: 0,
            blocked: 0,
            blocked_by_pane: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    /// Checks one write against the pane's last delivered input.
    ///
    /// Only [`commit`](Self::commit) arms the guard, so a write that never
    /// reached the pane cannot block its retry.
    pub fn check(&mut self, pane_id: &str, data: &str, now: u64) -> DedupVerdict {
        if data.len() < self.min_length {
            return DedupVerdict::Allow;
        }
        self.checked += 1;

        if let Some((previous, at)) = self.last.get(pane_id) {
            let age_ms = now.saturating_sub(*at);
            if previous == data && age_ms < self.window_ms {
                let preview = preview(data);
                self.record_block(pane_id, &preview, data.len(), now);
                return DedupVerdict::Block { age_ms, preview };
            }
        }
        DedupVerdict::Allow
    }

    /// Remembers input that was delivered to the pane.
    pub fn commit(&mut self, pane_id: &str, data: &str, now: u64) {
        if data.len() >= self.min_length {
            self.last.insert(pane_id.to_string(), (data.to_string(), now));
        }
    }

    fn record_block(&mut self, pane_id: &str, preview: &str, length: usize, now: u64) {
        self.blocked += 1;
        *self.blocked_by_pane.entry(pane_id.to_string()).or_insert(0) += 1;
        self.recent.push_back(GhostBlockInfo {
            pane_id: pane_id.to_string(),
            preview: preview.to_string(),
            length,
            at: now,
        });
        while self.recent.len() > self.recent_limit {
            self.recent.pop_front();
        }
        tracing::info!(pane_id = %pane_id, length = length, "Blocked duplicate input");
    }

    /// Forgets a pane's last input.
    pub fn forget_pane(&mut self, pane_id: &str) {
        self.last.remove(pane_id);
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn stats(&self) -> GhostStatsInfo {
        GhostStatsInfo {
            checked: self.checked,
            blocked: self.blocked,
            window_ms: self.window_ms,
            min_length: self.min_length,
            blocked_by_pane: self.blocked_by_pane.clone(),
            recent: self.recent.iter().cloned().collect(),
        }
    }
}

fn preview(data: &str) -> String {
    let mut out: String = data
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if data.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> DedupGuard {
        DedupGuard::new(&DedupConfig::default())
    }

    /// Checks a write and commits it when allowed, like a delivered write.
    fn submit(g: &mut DedupGuard, pane_id: &str, data: &str, now: u64) -> DedupVerdict {
        let verdict = g.check(pane_id, data, now);
        if verdict == DedupVerdict::Allow {
            g.commit(pane_id, data, now);
        }
        verdict
    }

    #[test]
    fn test_undelivered_write_does_not_arm_guard() {
        let mut g = guard();
        assert_eq!(g.check("1", "ABCDE", 1_000), DedupVerdict::Allow);
        assert_eq!(g.check("1", "ABCDE", 1_010), DedupVerdict::Allow);
        g.commit("1", "ABCDE", 1_020);
        assert!(matches!(g.check("1", "ABCDE", 1_030), DedupVerdict::Block { .. }));
    }

    #[test]
    fn test_forget_pane_clears_memory() {
        let mut g = guard();
        submit(&mut g, "1", "ABCDE", 1_000);
        g.forget_pane("1");
        assert_eq!(g.check("1", "ABCDE", 1_010), DedupVerdict::Allow);
    }

    #[test]
    fn test_same_pane_within_window_is_blocked() {
        let mut g = guard();
        assert_eq!(submit(&mut g, "1", "ABCDE", 1_000), DedupVerdict::Allow);
        assert_eq!(
            submit(&mut g, "1", "ABCDE", 1_040),
            DedupVerdict::Block {
                age_ms: 40,
                preview: "ABCDE".to_string()
            }
        );
    }

    #[test]
    fn test_other_pane_is_allowed() {
        let mut g = guard();
        assert_eq!(submit(&mut g, "1", "ABCDE", 1_000), DedupVerdict::Allow);
        assert_eq!(submit(&mut g, "2", "ABCDE", 1_010), DedupVerdict::Allow);
    }

    #[test]
    fn test_after_window_is_allowed() {
        let mut g = guard();
        submit(&mut g, "1", "ABCDE", 1_000);
        assert_eq!(submit(&mut g, "1", "ABCDE", 1_500), DedupVerdict::Allow);
    }

    #[test]
    fn test_short_input_is_never_checked() {
        let mut g = guard();
        for t in 0..5 {
            assert_eq!(submit(&mut g, "1", "\r", 1_000 + t), DedupVerdict::Allow);
            assert_eq!(submit(&mut g, "1", "y", 1_000 + t), DedupVerdict::Allow);
        }
        assert_eq!(g.stats().checked, 0);
    }

    #[test]
    fn test_different_text_resets_memory() {
        let mut g = guard();
        submit(&mut g, "1", "first", 1_000);
        submit(&mut g, "1", "second", 1_100);
        assert_eq!(submit(&mut g, "1", "first", 1_200), DedupVerdict::Allow);
    }

    #[test]
    fn test_stats_and_recent_limit() {
        let mut g = DedupGuard::new(&DedupConfig {
            window_ms: 500,
            min_length: 3,
            recent_limit: 2,
        });
        submit(&mut g, "1", "again", 0);
        for t in 1..=3 {
            submit(&mut g, "1", "again", t);
        }
        let stats = g.stats();
        assert_eq!(stats.checked, 4);
        assert_eq!(stats.blocked, 3);
        assert_eq!(stats.blocked_by_pane.get("1"), Some(&3));
        assert_eq!(stats.recent.len(), 2);
        assert_eq!(stats.recent[1].at, 3);
    }

    #[test]
    fn test_preview_is_truncated_and_sanitised() {
        let long = format!("{}\r", "x".repeat(60));
        let p = preview(&long);
        assert!(p.ends_with('…'));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert_eq!(preview("a\rb"), "a b");
    }
}
