//! Launch environment for pane processes.
//!
//! Resolves the working directory a pane starts in and the environment its
//! shell sees. Agents are usually launched from a desktop session whose PATH
//! is minimal, so the search path is augmented with the usual user-level
//! install locations.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// User-level bin directories prepended after the configured `extra_path`.
const HOME_BIN_DIRS: &[&str] = &[".local/bin", ".cargo/bin", ".npm-global/bin"];

/// System bin directories commonly missing from GUI launch environments.
const SYSTEM_BIN_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin"];

/// Shells that accept `-l` to run as a login shell.
const LOGIN_SHELLS: &[&str] = &["bash", "zsh", "fish"];

/// Working-directory resolution for panes.
#[derive(Debug, Clone)]
pub struct CwdResolver {
    pane_cwds: BTreeMap<String, PathBuf>,
    daemon_cwd: PathBuf,
    install_dirs: Vec<PathBuf>,
    fallbacks: Vec<PathBuf>,
}

impl CwdResolver {
    /// Builds a resolver from configuration and the daemon's own cwd.
    pub fn from_config(config: &Config) -> Self {
        let pane_cwds = config
            .panes
            .iter()
            .filter_map(|(id, pane)| pane.cwd.clone().map(|cwd| (id.clone(), cwd)))
            .collect();

        let mut install_dirs = config.session.install_dirs.clone();
        if let Some(bundle) = current_app_bundle() {
            install_dirs.push(bundle);
        }

        let mut fallbacks = Vec::new();
        if let Some(dir) = &config.session.fallback_cwd {
            fallbacks.push(dir.clone());
        }
        if let Some(home) = dirs::home_dir() {
            fallbacks.push(home);
        }
        fallbacks.push(config.daemon.data_dir.clone());

        let daemon_cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));

        Self {
            pane_cwds,
            daemon_cwd,
            install_dirs,
            fallbacks,
        }
    }

    #[cfg(test)]
    fn new(
        pane_cwds: BTreeMap<String, PathBuf>,
        daemon_cwd: PathBuf,
        install_dirs: Vec<PathBuf>,
        fallbacks: Vec<PathBuf>,
    ) -> Self {
        Self {
            pane_cwds,
            daemon_cwd,
            install_dirs,
            fallbacks,
        }
    }

    /// Resolves the cwd for a pane.
    ///
    /// Order: explicit argument, the pane's configured cwd, the daemon's cwd.
    /// Candidates that are not existing directories are skipped. If the result
    /// lies inside an install location, the first usable fallback replaces it.
    pub fn resolve(&self, pane_id: &str, explicit: Option<&str>) -> PathBuf {
        let candidates = explicit
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .into_iter()
            .chain(self.pane_cwds.get(pane_id).cloned())
            .chain(std::iter::once(self.daemon_cwd.clone()));

        let mut chosen = None;
        for candidate in candidates {
            if candidate.is_dir() {
                chosen = Some(candidate);
                break;
            }
            tracing::warn!(pane_id = %pane_id, cwd = %candidate.display(), "Skipping missing working directory");
        }
        let chosen = chosen.unwrap_or_else(|| self.daemon_cwd.clone());

        if self.is_install_dir(&chosen) {
            if let Some(fallback) = self.fallbacks.iter().find(|d| d.is_dir()) {
                tracing::info!(
                    pane_id = %pane_id,
                    from = %chosen.display(),
                    to = %fallback.display(),
                    "Working directory is inside the install location, using fallback"
                );
                return fallback.clone();
            }
        }

        chosen
    }

    fn is_install_dir(&self, path: &Path) -> bool {
        self.install_dirs.iter().any(|dir| path.starts_with(dir))
    }
}

/// The enclosing `*.app` bundle of the running executable, if any.
fn current_app_bundle() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.ancestors()
        .find(|p| p.extension().map(|e| e == "app").unwrap_or(false))
        .map(Path::to_path_buf)
}

/// Builds the child's PATH: configured extras, then user and system bin
/// directories, then the inherited PATH, with duplicates removed.
pub fn augmented_path(extra: &[PathBuf], home: Option<&Path>, inherited: Option<OsString>) -> OsString {
    let mut dirs: Vec<PathBuf> = extra.to_vec();
    if let Some(home) = home {
        dirs.extend(HOME_BIN_DIRS.iter().map(|d| home.join(d)));
    }
    dirs.extend(SYSTEM_BIN_DIRS.iter().map(PathBuf::from));
    if let Some(inherited) = inherited {
        dirs.extend(std::env::split_paths(&inherited));
    }

    let mut seen = Vec::with_capacity(dirs.len());
    for dir in dirs {
        if !dir.as_os_str().is_empty() && !seen.contains(&dir) {
            seen.push(dir);
        }
    }

    std::env::join_paths(seen).unwrap_or_default()
}

/// Environment variables for a pane's shell.
///
/// Caller-supplied variables are applied last and win over everything else.
pub fn pane_env(
    config: &Config,
    pane_id: &str,
    mode: Option<&str>,
    caller_env: &HashMap<String, String>,
) -> Vec<(String, OsString)> {
    let path = augmented_path(
        &config.session.extra_path,
        dirs::home_dir().as_deref(),
        std::env::var_os("PATH"),
    );

    let mut env: Vec<(String, OsString)> = vec![
        ("PATH".to_string(), path),
        ("TERM".to_string(), "xterm-256color".into()),
        ("COLORTERM".to_string(), "truecolor".into()),
        ("AGENTMUX_PANE_ID".to_string(), pane_id.into()),
    ];

    if let Some(mode) = mode.filter(|m| !m.is_empty()) {
        env.push((config.session.agent_env_var.clone(), mode.into()));
    }

    for (key, value) in caller_env {
        env.retain(|(k, _)| k != key);
        env.push((key.clone(), value.into()));
    }

    env
}

/// Arguments for launching `shell`: login shells get `-l`.
pub fn shell_args(shell: &str) -> Vec<String> {
    let name = Path::new(shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(shell);
    if LOGIN_SHELLS.contains(&name) {
        vec!["-l".to_string()]
    } else {
        Vec::new()
    }
}
