//! Wall-clock helpers.
//!
//! Activity clocks, nudge records and dedup windows are all epoch
//! milliseconds. Logic that compares them takes `now` as an argument so it can
//! be tested without sleeping; only the event loop reads the real clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds elapsed between `then` and `now`, saturating at zero.
pub fn elapsed(now: u64, then: u64) -> u64 {
    now.saturating_sub(then)
}
