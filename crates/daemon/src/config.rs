//! Configuration management for the agentmux daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/agentmux/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::DEFAULT_SPINNER_GLYPHS;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("scrollback_bytes must be between 1 KiB and 64 MiB, got {0}")]
    InvalidScrollback(usize),

    #[error("{name} must be greater than 0")]
    ZeroDuration { name: &'static str },

    #[error("dry-run response delay range is inverted: min {min}ms > max {max}ms")]
    InvalidDryRunDelays { min: u64, max: u64 },

    #[error("max_nudges must be between 1 and 20, got {0}")]
    InvalidMaxNudges(u32),

    #[error("min_length must be at least 2 so single keystrokes are never deduplicated, got {0}")]
    InvalidDedupLength(usize),

    #[error("lead_pane must not be empty")]
    EmptyLeadPane,

    #[error("default_shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the agentmux daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Terminal session configuration.
    pub session: SessionConfig,

    /// Per-pane display names and working directories, keyed by pane id.
    pub panes: BTreeMap<String, PaneConfig>,

    /// Event kernel configuration.
    pub kernel: KernelConfig,

    /// Duplicate-input guard configuration.
    pub dedup: DedupConfig,

    /// Heartbeat watchdog configuration.
    pub watchdog: WatchdogConfig,

    /// Stuck detection and nudge configuration.
    pub stuck: StuckConfig,

    /// Session snapshot configuration.
    pub persistence: PersistenceConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for the PID file, daemon log, snapshot and alerts.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Control socket path. Defaults to the XDG runtime location.
    pub socket_path: Option<PathBuf>,

    /// Upper bound on the graceful shutdown sequence, milliseconds.
    pub shutdown_grace_ms: u64,
}

/// Terminal session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell launched in every pane.
    pub default_shell: String,

    /// Initial terminal width.
    pub cols: u16,

    /// Initial terminal height.
    pub rows: u16,

    /// Scrollback cap per pane, in bytes. Only the most recent bytes are kept.
    pub scrollback_bytes: usize,

    /// Directories prepended to the child's search path.
    pub extra_path: Vec<PathBuf>,

    /// Read-only install locations a pane must never start inside.
    pub install_dirs: Vec<PathBuf>,

    /// Working directory used when resolution lands inside an install location.
    pub fallback_cwd: Option<PathBuf>,

    /// Environment variable carrying the spawn `mode` hint to the child.
    pub agent_env_var: String,

    /// Delay before a dry-run pane prints its welcome banner.
    pub dry_run_welcome_delay_ms: u64,

    /// Lower bound of the dry-run scripted response delay.
    pub dry_run_response_min_ms: u64,

    /// Upper bound of the dry-run scripted response delay.
    pub dry_run_response_max_ms: u64,
}

/// Per-pane settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PaneConfig {
    /// Display name used in nudges and alerts.
    pub name: Option<String>,

    /// Default working directory.
    pub cwd: Option<PathBuf>,
}

/// Event kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    /// Output coalescing window per pane, milliseconds.
    pub coalesce_window_ms: u64,
}

/// Duplicate-input guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Identical input to the same pane within this window is dropped.
    pub window_ms: u64,

    /// Inputs shorter than this are never checked.
    pub min_length: usize,

    /// Number of recent blocks kept for `ghost-stats`.
    pub recent_limit: usize,
}

/// How watchdog text reaches a pane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Write the text into the pane's terminal, followed by a carriage return.
    #[default]
    Pty,
    /// Drop the text into `<trigger_dir>/<pane>.txt` for an external injector.
    TriggerFile,
}

/// Heartbeat watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Start the watchdog with the daemon.
    pub enabled_on_start: bool,

    /// Pane that receives heartbeat requests.
    pub lead_pane: String,

    /// Panes messaged on escalation. Empty means every other live pane.
    pub worker_panes: Vec<String>,

    /// Directory holding the shared coordination files.
    pub coordination_dir: Option<PathBuf>,

    pub tasks_file: String,
    pub blockers_file: String,
    pub errors_file: String,
    pub status_file: String,
    pub ack_file: String,
    pub request_file: String,

    /// Durable alert log. Defaults to `<data_dir>/alerts.log`.
    pub alerts_file: Option<PathBuf>,

    pub idle_interval_secs: u64,
    pub active_interval_secs: u64,
    pub overdue_interval_secs: u64,
    pub recovering_interval_secs: u64,

    /// Status file age after which pending work counts as overdue.
    pub status_stale_secs: u64,

    /// Wait for the lead pane to answer a heartbeat.
    pub response_timeout_secs: u64,

    /// Re-nudges of the lead pane before escalating to workers.
    pub max_retries: u32,

    /// Wait for workers to answer an escalation before alerting.
    pub worker_timeout_secs: u64,

    /// Period of the state re-derivation and stuck scan.
    pub state_recheck_secs: u64,

    pub delivery: DeliveryMode,

    /// Trigger file directory. Defaults to `<coordination_dir>/triggers`.
    pub trigger_dir: Option<PathBuf>,

    /// Text of the heartbeat request.
    pub heartbeat_message: String,
}

/// Stuck detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StuckConfig {
    /// Input idle time after which a pane may be stuck.
    pub input_idle_secs: u64,

    /// Output newer than this excuses idle input...
    pub output_grace_secs: u64,

    /// ...unless nothing meaningful was printed for this long.
    pub churn_stall_secs: u64,

    /// Minimum time between nudges to one pane.
    pub nudge_interval_secs: u64,

    /// Nudges before a pane is marked alerted.
    pub max_nudges: u32,

    /// Input arriving sooner than this after a nudge is the nudge's own echo.
    pub ack_grace_ms: u64,

    /// Glyphs treated as cosmetic spinner output.
    pub spinner_glyphs: String,

    /// Text of an automatic nudge.
    pub nudge_message: String,
}

/// Session snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Period between snapshots.
    pub interval_secs: u64,

    /// Snapshot path. Defaults to `<data_dir>/session-state.json`.
    pub file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            socket_path: None,
            shutdown_grace_ms: 5000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            cols: 120,
            rows: 32,
            scrollback_bytes: 256 * 1024,
            extra_path: Vec::new(),
            install_dirs: Vec::new(),
            fallback_cwd: None,
            agent_env_var: "AGENTMUX_AGENT_MODE".to_string(),
            dry_run_welcome_delay_ms: 300,
            dry_run_response_min_ms: 150,
            dry_run_response_max_ms: 600,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 32,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: 500,
            min_length: 3,
            recent_limit: 50,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled_on_start: false,
            lead_pane: "1".to_string(),
            worker_panes: Vec::new(),
            coordination_dir: None,
            tasks_file: "tasks.json".to_string(),
            blockers_file: "blockers.md".to_string(),
            errors_file: "errors.md".to_string(),
            status_file: "status.md".to_string(),
            ack_file: "heartbeat-ack.json".to_string(),
            request_file: "heartbeat-request.json".to_string(),
            alerts_file: None,
            idle_interval_secs: 600,
            active_interval_secs: 300,
            overdue_interval_secs: 60,
            recovering_interval_secs: 60,
            status_stale_secs: 900,
            response_timeout_secs: 60,
            max_retries: 3,
            worker_timeout_secs: 120,
            state_recheck_secs: 15,
            delivery: DeliveryMode::Pty,
            trigger_dir: None,
            heartbeat_message: "[heartbeat] Lead check-in: review pending tasks, update the status file, \
                                and acknowledge this heartbeat."
                .to_string(),
        }
    }
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            input_idle_secs: 120,
            output_grace_secs: 30,
            churn_stall_secs: 300,
            nudge_interval_secs: 90,
            max_nudges: 3,
            ack_grace_ms: 2000,
            spinner_glyphs: DEFAULT_SPINNER_GLYPHS.to_string(),
            nudge_message: "[watchdog] No input received for a while. If you are blocked, \
                            say what you need; otherwise continue with your current task."
                .to_string(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            file: None,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentmux")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentmux")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

impl WatchdogConfig {
    /// Poll interval for each heartbeat state.
    pub fn interval_for(&self, state: protocol::HeartbeatState) -> Duration {
        use protocol::HeartbeatState::*;
        let secs = match state {
            Idle => self.idle_interval_secs,
            Active => self.active_interval_secs,
            Overdue => self.overdue_interval_secs,
            Recovering => self.recovering_interval_secs,
        };
        Duration::from_secs(secs)
    }
}

impl Config {
    /// Control socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .clone()
            .unwrap_or_else(crate::ipc::get_socket_path)
    }

    /// PID file path.
    pub fn pid_file_path(&self) -> PathBuf {
        self.daemon.data_dir.join("daemon.pid")
    }

    /// Append-only daemon log path.
    pub fn log_file_path(&self) -> PathBuf {
        self.daemon.data_dir.join("daemon.log")
    }

    /// Session snapshot path.
    pub fn snapshot_path(&self) -> PathBuf {
        self.persistence
            .file
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("session-state.json"))
    }

    /// Durable alert log path.
    pub fn alerts_path(&self) -> PathBuf {
        self.watchdog
            .alerts_file
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("alerts.log"))
    }

    /// Shared coordination directory.
    pub fn coordination_dir(&self) -> PathBuf {
        self.watchdog
            .coordination_dir
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("workspace"))
    }

    /// Trigger file directory.
    pub fn trigger_dir(&self) -> PathBuf {
        self.watchdog
            .trigger_dir
            .clone()
            .unwrap_or_else(|| self.coordination_dir().join("triggers"))
    }

    /// Display name for a pane, if configured.
    pub fn pane_name(&self, pane_id: &str) -> Option<&str> {
        self.panes.get(pane_id).and_then(|p| p.name.as_deref())
    }

    /// Display label for a pane: its name, or `pane <id>`.
    pub fn pane_label(&self, pane_id: &str) -> String {
        match self.pane_name(pane_id) {
            Some(name) => format!("{} (pane {})", name, pane_id),
            None => format!("pane {}", pane_id),
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - AGENTMUX_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - AGENTMUX_SOCKET: Override the control socket path
    /// - AGENTMUX_DATA_DIR: Override the data directory
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("AGENTMUX_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(socket) = std::env::var("AGENTMUX_SOCKET") {
            if !socket.is_empty() {
                tracing::info!("Overriding socket_path from environment: {}", socket);
                self.daemon.socket_path = Some(PathBuf::from(socket));
            }
        }

        if let Ok(dir) = std::env::var("AGENTMUX_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.daemon.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scrollback = self.session.scrollback_bytes;
        if !(1024..=64 * 1024 * 1024).contains(&scrollback) {
            return Err(ConfigError::InvalidScrollback(scrollback));
        }

        let durations: [(&'static str, u64); 11] = [
            ("coalesce_window_ms", self.kernel.coalesce_window_ms),
            ("dedup.window_ms", self.dedup.window_ms),
            ("idle_interval_secs", self.watchdog.idle_interval_secs),
            ("active_interval_secs", self.watchdog.active_interval_secs),
            ("overdue_interval_secs", self.watchdog.overdue_interval_secs),
            ("recovering_interval_secs", self.watchdog.recovering_interval_secs),
            ("response_timeout_secs", self.watchdog.response_timeout_secs),
            ("worker_timeout_secs", self.watchdog.worker_timeout_secs),
            ("state_recheck_secs", self.watchdog.state_recheck_secs),
            ("input_idle_secs", self.stuck.input_idle_secs),
            ("persistence.interval_secs", self.persistence.interval_secs),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { name });
            }
        }

        if self.session.dry_run_response_min_ms > self.session.dry_run_response_max_ms {
            return Err(ConfigError::InvalidDryRunDelays {
                min: self.session.dry_run_response_min_ms,
                max: self.session.dry_run_response_max_ms,
            });
        }

        if !(1..=20).contains(&self.stuck.max_nudges) {
            return Err(ConfigError::InvalidMaxNudges(self.stuck.max_nudges));
        }

        if self.dedup.min_length < 2 {
            return Err(ConfigError::InvalidDedupLength(self.dedup.min_length));
        }

        if self.watchdog.lead_pane.trim().is_empty() {
            return Err(ConfigError::EmptyLeadPane);
        }

        // Validate default_shell path exists
        let shell_path = Path::new(&self.session.default_shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(
                    self.session.default_shell.clone(),
                ));
            }
        } else if which::which(&self.session.default_shell).is_err() {
            return Err(ConfigError::InvalidShellPath(
                self.session.default_shell.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.session.default_shell = "/bin/sh".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.session.scrollback_bytes, 256 * 1024);
        assert_eq!(config.kernel.coalesce_window_ms, 32);
        assert_eq!(config.dedup.window_ms, 500);
        assert_eq!(config.dedup.min_length, 3);
        assert_eq!(config.watchdog.lead_pane, "1");
        assert_eq!(config.watchdog.max_retries, 3);
        assert_eq!(config.stuck.max_nudges, 3);
        assert_eq!(config.persistence.interval_secs, 30);
        assert!(config.panes.is_empty());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[daemon]
log_level = "debug"

[session]
scrollback_bytes = 4096

[panes."2"]
name = "Backend"
cwd = "/srv/backend"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.session.scrollback_bytes, 4096);
        assert_eq!(config.pane_name("2"), Some("Backend"));
        assert_eq!(
            config.panes["2"].cwd.as_deref(),
            Some(Path::new("/srv/backend"))
        );
        assert_eq!(config.kernel, KernelConfig::default());
    }

    #[test]
    fn test_from_toml_watchdog() {
        let toml = r#"
[watchdog]
lead_pane = "4"
worker_panes = ["5", "6"]
delivery = "trigger-file"
overdue_interval_secs = 30

[stuck]
spinner_glyphs = "|/-\\"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.watchdog.lead_pane, "4");
        assert_eq!(config.watchdog.worker_panes, vec!["5", "6"]);
        assert_eq!(config.watchdog.delivery, DeliveryMode::TriggerFile);
        assert_eq!(
            config.watchdog.interval_for(protocol::HeartbeatState::Overdue),
            Duration::from_secs(30)
        );
        assert_eq!(config.stuck.spinner_glyphs, "|/-\\");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[daemon\nlog_level = ");
        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Invalid TOML configuration"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[session]\nscrollback_bytes = \"lots\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut config = valid_config();
        config.panes.insert(
            "1".to_string(),
            PaneConfig {
                name: Some("Lead".to_string()),
                cwd: None,
            },
        );
        let toml = config.to_toml().unwrap();
        let parsed = Config::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/agentmux/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = valid_config();
        config.dedup.window_ms = 750;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.dedup.window_ms, 750);
    }

    #[test]
    fn test_derived_paths() {
        let mut config = valid_config();
        config.daemon.data_dir = PathBuf::from("/data/agentmux");

        assert_eq!(config.pid_file_path(), PathBuf::from("/data/agentmux/daemon.pid"));
        assert_eq!(config.log_file_path(), PathBuf::from("/data/agentmux/daemon.log"));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/data/agentmux/session-state.json")
        );
        assert_eq!(config.alerts_path(), PathBuf::from("/data/agentmux/alerts.log"));
        assert_eq!(
            config.trigger_dir(),
            PathBuf::from("/data/agentmux/workspace/triggers")
        );

        config.daemon.socket_path = Some(PathBuf::from("/run/test.sock"));
        assert_eq!(config.socket_path(), PathBuf::from("/run/test.sock"));
    }

    #[test]
    fn test_pane_label() {
        let mut config = valid_config();
        config.panes.insert(
            "2".to_string(),
            PaneConfig {
                name: Some("Frontend".to_string()),
                cwd: None,
            },
        );
        assert_eq!(config.pane_label("2"), "Frontend (pane 2)");
        assert_eq!(config.pane_label("9"), "pane 9");
    }

    #[test]
    fn test_validate_default_is_ok() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_scrollback_bounds() {
        let mut config = valid_config();
        config.session.scrollback_bytes = 10;
        assert_eq!(config.validate(), Err(ConfigError::InvalidScrollback(10)));
    }

    #[test]
    fn test_validate_zero_durations() {
        let mut config = valid_config();
        config.kernel.coalesce_window_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                name: "coalesce_window_ms"
            })
        );
    }

    #[test]
    fn test_validate_dry_run_delays() {
        let mut config = valid_config();
        config.session.dry_run_response_min_ms = 900;
        config.session.dry_run_response_max_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDryRunDelays { .. })
        ));
    }

    #[test]
    fn test_validate_dedup_length() {
        let mut config = valid_config();
        config.dedup.min_length = 1;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDedupLength(1)));
    }

    #[test]
    fn test_validate_shell_path() {
        let mut config = valid_config();
        config.session.default_shell = "/definitely/not/a/shell".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidShellPath(_))
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = valid_config();
        config.daemon.log_level = "chatty".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("chatty".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("AGENTMUX_LOG_LEVEL", "trace");
        std::env::set_var("AGENTMUX_SOCKET", "/tmp/agentmux-test.sock");
        std::env::set_var("AGENTMUX_DATA_DIR", "/tmp/agentmux-data");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.daemon.log_level, "trace");
        assert_eq!(
            config.daemon.socket_path,
            Some(PathBuf::from("/tmp/agentmux-test.sock"))
        );
        assert_eq!(config.daemon.data_dir, PathBuf::from("/tmp/agentmux-data"));

        std::env::remove_var("AGENTMUX_LOG_LEVEL");
        std::env::remove_var("AGENTMUX_SOCKET");
        std::env::remove_var("AGENTMUX_DATA_DIR");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("AGENTMUX_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "info");

        std::env::remove_var("AGENTMUX_LOG_LEVEL");
    }
}
