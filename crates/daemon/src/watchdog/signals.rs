//! Pending-work signals read from the shared coordination directory.
//!
//! Agents keep a task list, blocker and error logs and a status file in a
//! directory they all share. The watchdog only reads them, apart from the
//! heartbeat request marker which it writes and the lead clears.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use protocol::{HeartbeatState, PendingSummary};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Task statuses that mean the task is no longer pending.
const FINISHED_STATUSES: &[&str] = &["completed", "complete", "done", "cancelled", "canceled"];

/// Marker written alongside every heartbeat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub request_id: String,
    pub sent_at: DateTime<Utc>,
    pub attempt: u32,
}

/// Paths of the coordination files.
#[derive(Debug, Clone)]
pub struct CoordinationFiles {
    tasks: PathBuf,
    blockers: PathBuf,
    errors: PathBuf,
    status: PathBuf,
    ack: PathBuf,
    request: PathBuf,
    /// Whether the marker for the current request is on disk, so that its
    /// absence means the lead cleared it.
    marker_written: bool,
}

impl CoordinationFiles {
    pub fn from_config(config: &Config) -> Self {
        let dir = config.coordination_dir();
        let w = &config.watchdog;
        Self {
            tasks: dir.join(&w.tasks_file),
            blockers: dir.join(&w.blockers_file),
            errors: dir.join(&w.errors_file),
            status: dir.join(&w.status_file),
            ack: dir.join(&w.ack_file),
            request: dir.join(&w.request_file),
            marker_written: false,
        }
    }

    /// Reads every pending-work signal. Unreadable files count as empty.
    pub fn read_pending(&self, now: SystemTime) -> PendingSummary {
        PendingSummary {
            pending_tasks: read_optional(&self.tasks)
                .map(|s| count_pending_tasks(&s))
                .unwrap_or(0),
            open_blockers: read_optional(&self.blockers)
                .map(|s| count_open_items(&s))
                .unwrap_or(0),
            open_errors: read_optional(&self.errors)
                .map(|s| count_open_items(&s))
                .unwrap_or(0),
            status_age_secs: modified(&self.status)
                .map(|m| now.duration_since(m).map(|d| d.as_secs()).unwrap_or(0)),
        }
    }

    /// True if the lead answered a request sent at `sent_at_ms`: the ack
    /// file was modified afterwards, or the request marker we wrote was
    /// removed.
    pub fn responded_since(&self, sent_at_ms: u64) -> bool {
        let acked = modified(&self.ack)
            .map(|m| epoch_millis(m) >= sent_at_ms)
            .unwrap_or(false);
        acked || (self.marker_written && !self.request.exists())
    }

    /// Writes the heartbeat request marker.
    ///
    /// On failure only the ack file can signal a response to this request.
    pub fn write_request(&mut self, request: &HeartbeatRequest) -> anyhow::Result<()> {
        self.marker_written = false;
        if let Some(parent) = self.request.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(request)?;
        fs::write(&self.request, contents)?;
        self.marker_written = true;
        Ok(())
    }

    pub fn request_path(&self) -> &Path {
        &self.request
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Unreadable coordination file");
            None
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Counts pending tasks in a task list.
///
/// Accepts a bare array or an object with a `tasks` array. An entry is
/// pending unless its `status` is a finished status. Anything unparseable
/// counts as zero.
pub fn count_pending_tasks(json: &str) -> usize {
    let value: serde_json::Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let tasks = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.get("tasks") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return 0,
        },
        _ => return 0,
    };

    tasks
        .iter()
        .filter(|task| {
            let status = task
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("")
                .to_lowercase();
            !FINISHED_STATUSES.contains(&status.as_str())
        })
        .count()
}

/// Counts open items in a markdown log: `- ` lines not marked resolved.
pub fn count_open_items(markdown: &str) -> usize {
    markdown
        .lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with("- "))
        .filter(|line| {
            let body = &line[2..];
            !(body.starts_with("[x]")
                || body.starts_with("[X]")
                || body.contains("RESOLVED")
                || body.starts_with("~~"))
        })
        .count()
}

/// Derives the heartbeat state from pending-work signals.
///
/// A missing status file yields `active`: with no evidence either way the
/// watchdog keeps a moderate cadence rather than going quiet.
pub fn classify(pending: &PendingSummary, status_stale_secs: u64) -> HeartbeatState {
    let Some(age) = pending.status_age_secs else {
        return HeartbeatState::Active;
    };
    if pending.total() == 0 {
        HeartbeatState::Idle
    } else if age >= status_stale_secs {
        HeartbeatState::Overdue
    } else {
        HeartbeatState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn files(dir: &TempDir) -> CoordinationFiles {
        let mut config = Config::default();
        config.watchdog.coordination_dir = Some(dir.path().to_path_buf());
        CoordinationFiles::from_config(&config)
    }

    #[test]
    fn test_count_pending_tasks() {
        let tasks = r#"[
            {"id": 1, "status": "pending"},
            {"id": 2, "status": "in_progress"},
            {"id": 3, "status": "completed"},
            {"id": 4, "status": "Done"},
            {"id": 5}
        ]"#;
        assert_eq!(count_pending_tasks(tasks), 3);
        assert_eq!(
            count_pending_tasks(r#"{"tasks": [{"status": "cancelled"}, {"status": "todo"}]}"#),
            1
        );
        assert_eq!(count_pending_tasks("not json"), 0);
        assert_eq!(count_pending_tasks(r#"{"other": 1}"#), 0);
    }

    #[test]
    fn test_count_open_items() {
        let log = "# Blockers\n\
                   - waiting on API key\n\
                   - [x] flaky test\n\
                   - RESOLVED: disk full\n\
                   - ~~old thing~~\n\
                     - nested open item\n\
                   plain text line\n";
        assert_eq!(count_open_items(log), 2);
        assert_eq!(count_open_items(""), 0);
    }

    #[test]
    fn test_classify() {
        let mut pending = PendingSummary::default();
        assert_eq!(classify(&pending, 900), HeartbeatState::Active);

        pending.status_age_secs = Some(10);
        assert_eq!(classify(&pending, 900), HeartbeatState::Idle);

        pending.pending_tasks = 2;
        assert_eq!(classify(&pending, 900), HeartbeatState::Active);

        pending.status_age_secs = Some(900);
        assert_eq!(classify(&pending, 900), HeartbeatState::Overdue);
    }

    #[test]
    fn test_read_pending_from_files() {
        let dir = TempDir::new().unwrap();
        let f = files(&dir);
        let empty = f.read_pending(SystemTime::now());
        assert_eq!(empty, PendingSummary::default());

        fs::write(dir.path().join("tasks.json"), r#"[{"status":"pending"}]"#).unwrap();
        fs::write(dir.path().join("errors.md"), "- boom\n").unwrap();
        fs::write(dir.path().join("status.md"), "working").unwrap();

        let later = SystemTime::now() + Duration::from_secs(120);
        let pending = f.read_pending(later);
        assert_eq!(pending.pending_tasks, 1);
        assert_eq!(pending.open_blockers, 0);
        assert_eq!(pending.open_errors, 1);
        assert!(pending.status_age_secs.unwrap() >= 119);
    }

    #[test]
    fn test_request_marker_and_ack() {
        let dir = TempDir::new().unwrap();
        let mut f = files(&dir);
        let request = HeartbeatRequest {
            request_id: "r1".to_string(),
            sent_at: Utc::now(),
            attempt: 0,
        };
        f.write_request(&request).unwrap();
        let written: HeartbeatRequest =
            serde_json::from_str(&fs::read_to_string(f.request_path()).unwrap()).unwrap();
        assert_eq!(written, request);

        let sent_at = crate::clock::now_millis() + 60_000;
        assert!(!f.responded_since(sent_at));

        // Lead clears the marker.
        fs::remove_file(f.request_path()).unwrap();
        assert!(f.responded_since(sent_at));

        // Or writes an ack after the request.
        f.write_request(&request).unwrap();
        fs::write(dir.path().join("heartbeat-ack.json"), "{}").unwrap();
        assert!(f.responded_since(crate::clock::now_millis() - 60_000));
    }

    #[test]
    fn test_missing_marker_is_no_response_when_write_failed() {
        let dir = TempDir::new().unwrap();
        // A regular file where the coordination directory should be.
        let blocked = dir.path().join("workspace");
        fs::write(&blocked, "not a directory").unwrap();
        let mut config = Config::default();
        config.watchdog.coordination_dir = Some(blocked);
        let mut f = CoordinationFiles::from_config(&config);

        let request = HeartbeatRequest {
            request_id: "r2".to_string(),
            sent_at: Utc::now(),
            attempt: 0,
        };
        assert!(f.write_request(&request).is_err());
        assert!(!f.request_path().exists());
        assert!(!f.responded_since(crate::clock::now_millis()));
    }
}
