//! Terminal session registry.
//!
//! Maps pane ids to their live session. The registry is owned by the daemon's
//! event loop and mutated only from there, which is what enforces the
//! one-process-per-pane rule and the scrollback cap without locks.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use protocol::{SessionMode, SnapshotTerminal, TerminalInfo, WriteStatus};
use tokio::sync::mpsc;

use super::dry_run::{welcome_banner, DryRunSession, DryRunTiming};
use super::environment::{pane_env, shell_args, CwdResolver};
use super::pty::{PtyProcess, PtySpawn};
use super::scrollback::Scrollback;
use super::{ProcessEvent, SessionError};
use crate::classify::{tail, ActivityClassifier, APPROVAL_TAIL_BYTES};
use crate::config::Config;

/// First synthetic pid handed to a dry-run session.
pub const SYNTHETIC_PID_BASE: u32 = 90_000;

enum Backend {
    Pty(PtyProcess),
    DryRun(DryRunSession),
}

/// One pane's terminal and its activity clocks.
pub struct TerminalSession {
    pub pane_id: String,
    pub generation: u64,
    pub pid: u32,
    pub mode: SessionMode,
    pub alive: bool,
    pub paused: bool,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub created_at: u64,
    /// Any output.
    pub last_activity: u64,
    /// Output classified as meaningful.
    pub last_meaningful_activity: u64,
    /// Input forwarded by the daemon; `None` until the first write.
    pub last_input_time: Option<u64>,
    scrollback: Scrollback,
    backend: Backend,
}

impl TerminalSession {
    pub fn scrollback(&self) -> &str {
        self.scrollback.as_str()
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == SessionMode::DryRun
    }

    fn shutdown(&mut self) {
        self.alive = false;
        match &mut self.backend {
            Backend::Pty(process) => {
                if let Err(e) = process.kill() {
                    tracing::debug!(pane_id = %self.pane_id, error = %e, "Kill failed, process likely gone");
                }
            }
            Backend::DryRun(session) => session.stop(),
        }
    }
}

/// Parameters of a `spawn` action.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    pub pane_id: String,
    pub cwd: Option<String>,
    pub dry_run: bool,
    pub mode: Option<String>,
    pub env: HashMap<String, String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// What `spawn` produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnResult {
    pub pane_id: String,
    pub pid: u32,
    pub mode: SessionMode,
    pub dry_run: bool,
    pub cwd: String,
    pub generation: u64,
    /// Pid of a session that was torn down to make room, if any.
    pub replaced: Option<u32>,
}

/// What `write` produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub status: WriteStatus,
    /// Immediate echo from a dry-run session.
    pub echo: Option<String>,
    /// Reason for a non-accepted status.
    pub error: Option<String>,
}

impl WriteOutcome {
    fn rejected(status: WriteStatus, reason: String) -> Self {
        Self {
            status,
            echo: None,
            error: Some(reason),
        }
    }
}

/// Pane ids name files under the trigger directory, so they must stay a
/// single path component.
pub fn is_valid_pane_id(pane_id: &str) -> bool {
    !pane_id.is_empty() && !pane_id.contains(['/', '\\']) && !pane_id.contains("..")
}

/// Registry of every pane's terminal session.
pub struct SessionRegistry {
    config: Arc<Config>,
    resolver: CwdResolver,
    sessions: HashMap<String, TerminalSession>,
    events: mpsc::Sender<ProcessEvent>,
    next_generation: u64,
    next_synthetic_pid: u32,
}

impl SessionRegistry {
    /// Creates an empty registry whose sessions report into `events`.
    pub fn new(config: Arc<Config>, events: mpsc::Sender<ProcessEvent>) -> Self {
        let resolver = CwdResolver::from_config(&config);
        Self {
            config,
            resolver,
            sessions: HashMap::new(),
            events,
            next_generation: 1,
            next_synthetic_pid: SYNTHETIC_PID_BASE,
        }
    }

    /// Starts a session for a pane, tearing down any existing one first.
    pub fn spawn(&mut self, req: SpawnRequest, now: u64) -> Result<SpawnResult, SessionError> {
        if !is_valid_pane_id(&req.pane_id) {
            return Err(SessionError::InvalidPaneId(req.pane_id));
        }
        let replaced = self.remove(&req.pane_id).map(|old| old.pid);
        if let Some(pid) = replaced {
            tracing::info!(pane_id = %req.pane_id, old_pid = pid, "Replacing existing session");
        }

        let cwd = self.resolver.resolve(&req.pane_id, req.cwd.as_deref());
        let cols = req.cols.unwrap_or(self.config.session.cols);
        let rows = req.rows.unwrap_or(self.config.session.rows);
        let generation = self.next_generation;
        self.next_generation += 1;

        let (pid, mode, backend) = if req.dry_run {
            let pid = self.next_synthetic_pid;
            self.next_synthetic_pid += 1;
            let banner = welcome_banner(
                &req.pane_id,
                self.config.pane_name(&req.pane_id),
                &cwd.display().to_string(),
            );
            let timing = DryRunTiming {
                welcome_delay: Duration::from_millis(self.config.session.dry_run_welcome_delay_ms),
                response_min: Duration::from_millis(self.config.session.dry_run_response_min_ms),
                response_max: Duration::from_millis(self.config.session.dry_run_response_max_ms),
            };
            let session =
                DryRunSession::start(&req.pane_id, generation, banner, timing, self.events.clone());
            tracing::info!(pane_id = %req.pane_id, pid = pid, "Started dry-run session");
            (pid, SessionMode::DryRun, Backend::DryRun(session))
        } else {
            let shell = self.config.session.default_shell.clone();
            let params = PtySpawn {
                pane_id: req.pane_id.clone(),
                generation,
                args: shell_args(&shell),
                shell,
                cwd: cwd.clone(),
                env: pane_env(&self.config, &req.pane_id, req.mode.as_deref(), &req.env),
                cols,
                rows,
            };
            let process = PtyProcess::spawn(params, self.events.clone())?;
            let pid = process.pid().unwrap_or(0);
            (pid, SessionMode::Pty, Backend::Pty(process))
        };

        let session = TerminalSession {
            pane_id: req.pane_id.clone(),
            generation,
            pid,
            mode,
            alive: true,
            paused: false,
            cwd: cwd.clone(),
            cols,
            rows,
            created_at: now,
            last_activity: now,
            last_meaningful_activity: now,
            last_input_time: None,
            scrollback: Scrollback::new(self.config.session.scrollback_bytes),
            backend,
        };
        self.sessions.insert(req.pane_id.clone(), session);

        Ok(SpawnResult {
            pane_id: req.pane_id,
            pid,
            dry_run: mode == SessionMode::DryRun,
            mode,
            cwd: cwd.display().to_string(),
            generation,
            replaced,
        })
    }

    /// Forwards input to a pane. Never fails; the outcome says what happened.
    pub fn write(&mut self, pane_id: &str, data: &str, now: u64) -> WriteOutcome {
        let Some(session) = self.sessions.get_mut(pane_id) else {
            return WriteOutcome::rejected(
                WriteStatus::RejectedTerminalMissing,
                format!("no terminal for pane {}", pane_id),
            );
        };
        if !session.alive {
            return WriteOutcome::rejected(
                WriteStatus::RejectedNotAlive,
                format!("terminal for pane {} is not alive", pane_id),
            );
        }

        let echo = match &mut session.backend {
            Backend::Pty(process) => {
                match process.write(data.as_bytes()) {
                    Ok(()) => {}
                    Err(e @ SessionError::InputBacklog(_)) => {
                        tracing::warn!(pane_id = %pane_id, error = %e, "Write dropped, input backlog full");
                        return WriteOutcome::rejected(WriteStatus::Error, e.to_string());
                    }
                    Err(e) => {
                        tracing::warn!(pane_id = %pane_id, error = %e, "Write failed, marking pane dead");
                        session.alive = false;
                        return WriteOutcome::rejected(WriteStatus::Error, e.to_string());
                    }
                }
                None
            }
            Backend::DryRun(dry) => Some(dry.input(data)).filter(|echo| !echo.is_empty()),
        };

        session.last_input_time = Some(now);
        WriteOutcome {
            status: WriteStatus::Accepted,
            echo,
            error: None,
        }
    }

    /// Records output from a session. Returns whether it was meaningful, or
    /// `None` if the event belongs to a session that no longer exists.
    pub fn record_output(
        &mut self,
        pane_id: &str,
        generation: u64,
        data: &str,
        now: u64,
        classifier: &dyn ActivityClassifier,
    ) -> Option<bool> {
        let session = self
            .sessions
            .get_mut(pane_id)
            .filter(|s| s.generation == generation)?;

        let meaningful = classifier.is_meaningful(data);
        session.scrollback.push(data);
        session.last_activity = now;
        if meaningful {
            session.last_meaningful_activity = now;
        }
        Some(meaningful)
    }

    /// Removes a session whose process exited. Stale generations are ignored.
    pub fn on_exit(&mut self, pane_id: &str, generation: u64) -> Option<TerminalSession> {
        match self.sessions.get(pane_id) {
            Some(s) if s.generation == generation => self.sessions.remove(pane_id),
            _ => None,
        }
    }

    /// Kills a pane's session and deletes its record.
    pub fn kill(&mut self, pane_id: &str) -> Result<TerminalSession, SessionError> {
        self.remove(pane_id)
            .ok_or_else(|| SessionError::NotFound(pane_id.to_string()))
    }

    fn remove(&mut self, pane_id: &str) -> Option<TerminalSession> {
        let mut session = self.sessions.remove(pane_id)?;
        session.shutdown();
        Some(session)
    }

    /// Kills every session. Returns the pane ids that were running.
    pub fn kill_all(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.sessions.keys().cloned().collect();
        for id in &ids {
            self.remove(id);
        }
        ids
    }

    pub fn resize(&mut self, pane_id: &str, cols: u16, rows: u16) -> Result<(), SessionError> {
        let session = self.live_mut(pane_id)?;
        if let Backend::Pty(process) = &session.backend {
            process.resize(cols, rows)?;
        }
        session.cols = cols;
        session.rows = rows;
        Ok(())
    }

    /// Pauses or resumes output reading for a pane.
    pub fn set_paused(&mut self, pane_id: &str, paused: bool) -> Result<(), SessionError> {
        let session = self.live_mut(pane_id)?;
        if let Backend::Pty(process) = &session.backend {
            process.set_paused(paused);
        }
        session.paused = paused;
        Ok(())
    }

    fn live_mut(&mut self, pane_id: &str) -> Result<&mut TerminalSession, SessionError> {
        let session = self
            .sessions
            .get_mut(pane_id)
            .ok_or_else(|| SessionError::NotFound(pane_id.to_string()))?;
        if !session.alive {
            return Err(SessionError::NotAlive(pane_id.to_string()));
        }
        Ok(session)
    }

    pub fn get(&self, pane_id: &str) -> Option<&TerminalSession> {
        self.sessions.get(pane_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions in pane order (numeric ids first, then lexical).
    pub fn sessions(&self) -> Vec<&TerminalSession> {
        let ordered: BTreeMap<(u64, &str), &TerminalSession> = self
            .sessions
            .iter()
            .map(|(id, s)| ((id.parse::<u64>().unwrap_or(u64::MAX), id.as_str()), s))
            .collect();
        ordered.into_values().collect()
    }

    /// Full snapshot of every terminal.
    pub fn list(&self) -> Vec<TerminalInfo> {
        self.sessions()
            .into_iter()
            .map(|s| TerminalInfo {
                pane_id: s.pane_id.clone(),
                name: self.config.pane_name(&s.pane_id).map(str::to_string),
                pid: s.pid,
                alive: s.alive,
                cwd: s.cwd.display().to_string(),
                mode: s.mode,
                dry_run: s.is_dry_run(),
                paused: s.paused,
                cols: s.cols,
                rows: s.rows,
                scrollback: s.scrollback().to_string(),
                created_at: s.created_at,
                last_activity: s.last_activity,
                last_meaningful_activity: s.last_meaningful_activity,
                last_input_time: s.last_input_time,
            })
            .collect()
    }

    /// Terminals as persisted in the session snapshot.
    pub fn snapshot(&self) -> Vec<SnapshotTerminal> {
        self.sessions()
            .into_iter()
            .map(|s| SnapshotTerminal {
                pane_id: s.pane_id.clone(),
                cwd: s.cwd.display().to_string(),
                alive: s.alive,
                scrollback: s.scrollback().to_string(),
                last_activity: s.last_activity,
            })
            .collect()
    }

    /// Returns true if the tail of the pane's scrollback shows an approval prompt.
    pub fn awaiting_approval(&self, pane_id: &str, classifier: &dyn ActivityClassifier) -> bool {
        self.sessions
            .get(pane_id)
            .map(|s| classifier.awaiting_approval(tail(s.scrollback(), APPROVAL_TAIL_BYTES)))
            .unwrap_or(false)
    }

    /// Live pane ids, in pane order.
    pub fn live_panes(&self) -> Vec<String> {
        self.sessions()
            .into_iter()
            .filter(|s| s.alive)
            .map(|s| s.pane_id.clone())
            .collect()
    }

    /// Moves a pane's output clocks back in time.
    #[cfg(test)]
    pub(crate) fn backdate_activity(&mut self, pane_id: &str, at: u64) {
        if let Some(session) = self.sessions.get_mut(pane_id) {
            session.last_activity = at;
            session.last_meaningful_activity = at;
        }
    }
}
