//! Session snapshot persistence.
//!
//! The registry's state is written to a JSON file periodically and at
//! shutdown so the supervising application can offer recovery after a crash
//! or restart. The daemon itself only reads the snapshot once at startup and
//! never respawns anything from it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use protocol::{SessionSnapshot, SnapshotTerminal};
use thiserror::Error;

/// Errors that can occur while saving or loading the snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid snapshot {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads and writes the session snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a snapshot of `terminals`.
    ///
    /// Uses atomic write (write to temp file, then rename) so a crash never
    /// leaves a truncated snapshot behind.
    pub fn save(&self, terminals: Vec<SnapshotTerminal>) -> Result<SessionSnapshot, PersistenceError> {
        let snapshot = SessionSnapshot {
            terminals,
            saved_at: Utc::now(),
            daemon_pid: std::process::id(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(parent, source))?;
        }

        let contents = serde_json::to_string_pretty(&snapshot).map_err(|source| {
            PersistenceError::Json {
                path: self.path.clone(),
                source,
            }
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(|source| self.io_error(&temp_path, source))?;
        fs::rename(&temp_path, &self.path).map_err(|source| self.io_error(&self.path, source))?;

        tracing::debug!(
            path = %self.path.display(),
            terminals = snapshot.terminals.len(),
            "Session snapshot saved"
        );
        Ok(snapshot)
    }

    /// Loads the snapshot. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<SessionSnapshot>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(&self.path, source)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| PersistenceError::Json {
                path: self.path.clone(),
                source,
            })
    }

    /// Deletes the snapshot. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool, PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(&self.path, source)),
        }
    }

    fn io_error(&self, path: &Path, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn terminal(pane_id: &str) -> SnapshotTerminal {
        SnapshotTerminal {
            pane_id: pane_id.to_string(),
            cwd: "/work".to_string(),
            alive: true,
            scrollback: "$ cargo test\r\n".to_string(),
            last_activity: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("session-state.json"));

        let saved = store.save(vec![terminal("1"), terminal("2")]).unwrap();
        assert_eq!(saved.daemon_pid, std::process::id());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("session-state.json"));
        store.save(vec![terminal("1"), terminal("2")]).unwrap();
        store.save(vec![terminal("3")]).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.terminals.len(), 1);
        assert_eq!(loaded.terminals[0].pane_id, "3");
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session-state.json");
        fs::write(&path, "{ not json").unwrap();
        let err = SnapshotStore::new(path).load().unwrap_err();
        assert!(matches!(err, PersistenceError::Json { .. }));
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("session-state.json"));
        assert!(!store.clear().unwrap());
        store.save(Vec::new()).unwrap();
        assert!(store.clear().unwrap());
        assert!(store.load().unwrap().is_none());
    }
}
