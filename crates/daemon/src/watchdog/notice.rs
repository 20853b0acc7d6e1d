//! Durable notices and file-based delivery.
//!
//! Alerts are written to an append-only log as well as broadcast, so an alert
//! raised while no client is connected is not lost. Trigger files let an
//! external injector type watchdog text into a pane when direct PTY writes
//! are not wanted.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Append-only alert log.
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped line.
    pub fn append(&self, at: DateTime<Utc>, kind: &str, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create alert directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open alert log: {}", self.path.display()))?;

        let line = format!(
            "{} [{}] {}\n",
            at.to_rfc3339(),
            kind,
            message.replace('\n', " ")
        );
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to write alert log: {}", self.path.display()))?;
        Ok(())
    }
}

/// Writes `<dir>/<pane_id>.txt` for an external injector to pick up.
pub fn write_trigger(dir: &Path, pane_id: &str, text: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create trigger directory: {}", dir.display()))?;
    let path = dir.join(format!("{}.txt", pane_id));
    let temp = dir.join(format!(".{}.txt.tmp", pane_id));
    fs::write(&temp, text).with_context(|| format!("Failed to write trigger: {}", temp.display()))?;
    fs::rename(&temp, &path).with_context(|| format!("Failed to publish trigger: {}", path.display()))?;
    Ok(path)
}
