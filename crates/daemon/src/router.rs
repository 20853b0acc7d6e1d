//! Action router.
//!
//! Turns each client action into registry, kernel and watchdog calls on the
//! orchestrator. Answers to the requester are unicast; state changes other
//! front ends must see (spawned, killed, resized, ...) are broadcast.
//! Every rejection reaches the requester as an `error` event with a reason.

use chrono::Utc;
use protocol::{
    ClientAction, DaemonEvent, HealthInfo, KernelEventType, StuckPaneInfo, WriteStatus,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::{elapsed, now_millis};
use crate::dedup::DedupVerdict;
use crate::ipc::ClientId;
use crate::kernel::{client_source, Cause, SOURCE_PTY, SOURCE_WATCHDOG};
use crate::orchestrator::DaemonOrchestrator;
use crate::session::{SessionError, SpawnRequest};

impl DaemonOrchestrator {
    /// Handles one action from `client`.
    pub(crate) fn route(&mut self, client: ClientId, action: ClientAction) {
        debug!(client_id = client, action = action.name(), pane_id = ?action.pane_id(), "Routing action");

        match action {
            ClientAction::Spawn {
                pane_id,
                cwd,
                dry_run,
                mode,
                env,
                cols,
                rows,
            } => self.handle_spawn(
                client,
                SpawnRequest {
                    pane_id,
                    cwd,
                    dry_run,
                    mode,
                    env,
                    cols,
                    rows,
                },
            ),
            ClientAction::Write { pane_id, data } => self.handle_write(client, &pane_id, &data),
            ClientAction::Resize { pane_id, cols, rows } => {
                self.handle_resize(client, &pane_id, cols, rows)
            }
            ClientAction::Kill { pane_id } => self.handle_kill(client, &pane_id),
            ClientAction::List => self.reply(
                client,
                DaemonEvent::List {
                    terminals: self.registry.list(),
                },
            ),
            ClientAction::Attach { pane_id } => self.handle_attach(client, &pane_id),
            ClientAction::Pause { pane_id } => self.handle_pause(client, &pane_id, true),
            ClientAction::Resume { pane_id } => self.handle_pause(client, &pane_id, false),
            ClientAction::Ping => self.reply(
                client,
                DaemonEvent::Pong {
                    timestamp: Utc::now(),
                    uptime_ms: self.started.elapsed().as_millis() as u64,
                },
            ),
            ClientAction::Health => self.reply(client, DaemonEvent::Health(self.health())),
            ClientAction::HeartbeatEnable => {
                self.enable_watchdog();
                self.reply(client, DaemonEvent::HeartbeatStatus(self.heartbeat.status()));
            }
            ClientAction::HeartbeatDisable => {
                self.heartbeat.disable();
                info!("Watchdog disabled");
                self.reply(client, DaemonEvent::HeartbeatStatus(self.heartbeat.status()));
            }
            ClientAction::HeartbeatStatus => {
                self.reply(client, DaemonEvent::HeartbeatStatus(self.heartbeat.status()))
            }
            ClientAction::HeartbeatTrigger => self.handle_heartbeat_trigger(client),
            ClientAction::NudgeAgent { pane_id, message } => {
                self.handle_nudge_agent(client, &pane_id, message)
            }
            ClientAction::NudgeStatus { pane_id } => self.reply(
                client,
                DaemonEvent::NudgeStatus {
                    entries: self.nudges.status(pane_id.as_deref()),
                },
            ),
            ClientAction::NudgeReset { pane_id } => {
                let cleared = self.nudges.reset(pane_id.as_deref());
                info!(pane_id = ?pane_id, cleared = cleared, "Nudge records reset");
                self.leave_recovering_if_settled();
                self.reply(client, DaemonEvent::NudgeReset { cleared });
            }
            ClientAction::GhostStats => {
                self.reply(client, DaemonEvent::GhostStats(self.dedup.stats()))
            }
            ClientAction::Stuck { threshold } => self.handle_stuck(client, threshold),
            ClientAction::GetSession => self.reply(
                client,
                DaemonEvent::Session {
                    snapshot: self.recovered.clone(),
                },
            ),
            ClientAction::SaveSession => self.handle_save_session(client),
            ClientAction::ClearSession => self.handle_clear_session(client),
            ClientAction::Shutdown => {
                info!(client_id = client, "Shutdown requested by client");
                self.request_shutdown(format!("shutdown requested by client {}", client));
            }
        }
    }

    fn handle_spawn(&mut self, client: ClientId, request: SpawnRequest) {
        let pane_id = request.pane_id.clone();
        let spawned = match self.registry.spawn(request, now_millis()) {
            Ok(spawned) => spawned,
            Err(e) => {
                warn!(pane_id = %pane_id, error = %e, "Spawn failed");
                self.reply(client, DaemonEvent::error(Some(&pane_id), e.to_string()));
                return;
            }
        };

        if let Some(old_pid) = spawned.replaced {
            if let Some(summary) = self.coalescer.flush_pane(&pane_id) {
                debug!(pane_id = %pane_id, bytes = summary.bytes, "Dropping output window of replaced session");
            }
            self.publish(
                KernelEventType::PtyDown,
                SOURCE_PTY,
                Some(&pane_id),
                json!({ "pid": old_pid, "code": null, "reason": "replaced" }),
                Cause::Root,
            );
            self.forget_pane(&pane_id);
        }
        self.dedup.forget_pane(&pane_id);

        info!(
            pane_id = %pane_id,
            pid = spawned.pid,
            dry_run = spawned.dry_run,
            cwd = %spawned.cwd,
            "Terminal spawned"
        );
        self.broadcast(DaemonEvent::Spawned {
            pane_id: pane_id.clone(),
            pid: spawned.pid,
            dry_run: spawned.dry_run,
            mode: spawned.mode,
            cwd: spawned.cwd.clone(),
        });
        self.publish(
            KernelEventType::PtyUp,
            &client_source(client),
            Some(&pane_id),
            json!({
                "pid": spawned.pid,
                "mode": spawned.mode,
                "dryRun": spawned.dry_run,
                "cwd": spawned.cwd,
                "generation": spawned.generation,
            }),
            Cause::Root,
        );
    }

    fn handle_write(&mut self, client: ClientId, pane_id: &str, data: &str) {
        let source = client_source(client);
        let requested = self.publish(
            KernelEventType::DaemonWriteRequested,
            &source,
            Some(pane_id),
            json!({ "bytes": data.len() }),
            Cause::Root,
        );

        let now = now_millis();
        if let DedupVerdict::Block { age_ms, preview } = self.dedup.check(pane_id, data, now) {
            self.publish(
                KernelEventType::DaemonWriteBlocked,
                &source,
                Some(pane_id),
                json!({ "reason": "duplicate", "ageMs": age_ms, "preview": preview }),
                Cause::Envelope(&requested),
            );
            self.broadcast(DaemonEvent::GhostBlocked {
                pane_id: pane_id.to_string(),
                reason: format!("identical input repeated after {} ms", age_ms),
                preview,
                window_ms: self.dedup.window_ms(),
            });
            return;
        }

        let outcome = self.write_input(pane_id, data);
        self.publish(
            KernelEventType::DaemonWriteAck,
            &source,
            Some(pane_id),
            json!({ "bytes": data.len(), "status": outcome.status }),
            Cause::Envelope(&requested),
        );

        if outcome.status == WriteStatus::Accepted {
            self.dedup.commit(pane_id, data, now);
            self.check_nudge_acks();
        } else {
            let reason = outcome
                .error
                .unwrap_or_else(|| format!("write to pane {} failed", pane_id));
            debug!(pane_id = %pane_id, status = ?outcome.status, reason = %reason, "Write rejected");
            self.reply(client, DaemonEvent::error(Some(pane_id), reason));
        }
    }

    fn handle_resize(&mut self, client: ClientId, pane_id: &str, cols: u16, rows: u16) {
        let source = client_source(client);
        let requested = self.publish(
            KernelEventType::PtyResizeRequested,
            &source,
            Some(pane_id),
            json!({ "cols": cols, "rows": rows }),
            Cause::Root,
        );

        match self.registry.resize(pane_id, cols, rows) {
            Ok(()) => {
                self.broadcast(DaemonEvent::Resized {
                    pane_id: pane_id.to_string(),
                    cols,
                    rows,
                });
                self.publish(
                    KernelEventType::PtyResizeAck,
                    SOURCE_PTY,
                    Some(pane_id),
                    json!({ "cols": cols, "rows": rows }),
                    Cause::Envelope(&requested),
                );
            }
            Err(e) => self.reply(client, DaemonEvent::error(Some(pane_id), e.to_string())),
        }
    }

    fn handle_kill(&mut self, client: ClientId, pane_id: &str) {
        let session = match self.registry.kill(pane_id) {
            Ok(session) => session,
            Err(e) => {
                self.reply(client, DaemonEvent::error(Some(pane_id), e.to_string()));
                return;
            }
        };
        info!(pane_id = %pane_id, pid = session.pid, "Terminal killed");

        if let Some(summary) = self.coalescer.flush_pane(pane_id) {
            debug!(pane_id = %pane_id, bytes = summary.bytes, "Discarding output window of killed session");
        }
        self.broadcast(DaemonEvent::Killed {
            pane_id: pane_id.to_string(),
        });
        self.publish(
            KernelEventType::PtyDown,
            &client_source(client),
            Some(pane_id),
            json!({ "pid": session.pid, "code": null, "reason": "killed" }),
            Cause::Root,
        );
        self.forget_pane(pane_id);
    }

    fn handle_attach(&mut self, client: ClientId, pane_id: &str) {
        let event = match self.registry.get(pane_id) {
            Some(session) => DaemonEvent::Attached {
                pane_id: pane_id.to_string(),
                pid: session.pid,
                alive: session.alive,
                scrollback: session.scrollback().to_string(),
            },
            None => DaemonEvent::error(
                Some(pane_id),
                SessionError::NotFound(pane_id.to_string()).to_string(),
            ),
        };
        self.reply(client, event);
    }

    fn handle_pause(&mut self, client: ClientId, pane_id: &str, paused: bool) {
        if let Err(e) = self.registry.set_paused(pane_id, paused) {
            self.reply(client, DaemonEvent::error(Some(pane_id), e.to_string()));
            return;
        }

        let pane = pane_id.to_string();
        let (event, event_type) = if paused {
            (DaemonEvent::Paused { pane_id: pane }, KernelEventType::PtyPaused)
        } else {
            (DaemonEvent::Resumed { pane_id: pane }, KernelEventType::PtyResumed)
        };
        self.broadcast(event);
        self.publish(
            event_type,
            &client_source(client),
            Some(pane_id),
            json!({}),
            Cause::Root,
        );
    }

    fn health(&self) -> HealthInfo {
        let sessions = self.registry.sessions();
        HealthInfo {
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            terminals: sessions.len(),
            alive: sessions.iter().filter(|s| s.alive).count(),
            dry_run: sessions.iter().filter(|s| s.is_dry_run()).count(),
            clients: self.hub.len(),
            backpressured_clients: self.hub.backpressured(),
            kernel_seq: self.kernel.seq(),
            watchdog_enabled: self.heartbeat.is_enabled(),
            heartbeat_state: self.heartbeat.state(),
        }
    }

    fn handle_heartbeat_trigger(&mut self, client: ClientId) {
        let event = if !self.heartbeat.is_enabled() {
            DaemonEvent::HeartbeatTriggered {
                sent: false,
                reason: Some("watchdog is disabled".to_string()),
            }
        } else if self.trigger_heartbeat() {
            DaemonEvent::HeartbeatTriggered {
                sent: true,
                reason: None,
            }
        } else {
            DaemonEvent::HeartbeatTriggered {
                sent: false,
                reason: Some("escalation to workers is in progress".to_string()),
            }
        };
        self.reply(client, event);
    }

    /// A hand-delivered nudge. It is not tracked as an escalation attempt.
    fn handle_nudge_agent(&mut self, client: ClientId, pane_id: &str, message: Option<String>) {
        let text = message.unwrap_or_else(|| self.config.stuck.nudge_message.clone());
        let result = match self.registry.get(pane_id).map(|s| s.alive) {
            None => Err(SessionError::NotFound(pane_id.to_string()).to_string()),
            Some(false) => Err(SessionError::NotAlive(pane_id.to_string()).to_string()),
            Some(true) => self.deliver(pane_id, &text),
        };

        if result.is_ok() {
            info!(pane_id = %pane_id, "Manual nudge delivered");
            self.publish(
                KernelEventType::NudgeSent,
                SOURCE_WATCHDOG,
                Some(pane_id),
                json!({ "manual": true, "client": client }),
                Cause::Root,
            );
        }
        self.reply(
            client,
            DaemonEvent::NudgeResult {
                pane_id: pane_id.to_string(),
                sent: result.is_ok(),
                reason: result.err(),
            },
        );
    }

    fn handle_stuck(&mut self, client: ClientId, threshold: Option<u64>) {
        let threshold_secs = threshold.unwrap_or(self.config.stuck.input_idle_secs);
        let now = now_millis();
        let thresholds = self.thresholds;

        let panes = self
            .registry
            .sessions()
            .into_iter()
            .filter(|s| s.alive)
            .filter_map(|s| {
                let input_idle_ms = elapsed(now, s.last_input_time.unwrap_or(s.created_at));
                if input_idle_ms < threshold_secs * 1000 {
                    return None;
                }
                let output_idle_ms = elapsed(now, s.last_activity);
                let meaningful_idle_ms = elapsed(now, s.last_meaningful_activity);
                Some(StuckPaneInfo {
                    pane_id: s.pane_id.clone(),
                    name: self.config.pane_name(&s.pane_id).map(str::to_string),
                    input_idle_ms,
                    output_idle_ms,
                    meaningful_idle_ms,
                    churning: output_idle_ms < thresholds.output_grace_ms
                        && meaningful_idle_ms >= thresholds.churn_stall_ms,
                    awaiting_approval: self.registry.awaiting_approval(&s.pane_id, &self.classifier),
                })
            })
            .collect();

        self.reply(client, DaemonEvent::Stuck { threshold_secs, panes });
    }

    fn handle_save_session(&mut self, client: ClientId) {
        match self.save_snapshot(None) {
            Ok(snapshot) => {
                let event = DaemonEvent::SessionSaved {
                    path: self.snapshots.path().display().to_string(),
                    terminals: snapshot.terminals.len(),
                };
                self.reply(client, event);
            }
            Err(e) => {
                warn!(error = %e, "Snapshot save failed");
                self.reply(client, DaemonEvent::error(None, e.to_string()));
            }
        }
    }

    fn handle_clear_session(&mut self, client: ClientId) {
        match self.snapshots.clear() {
            Ok(existed) => {
                self.recovered = None;
                info!(existed = existed, "Session snapshot cleared");
                self.reply(client, DaemonEvent::SessionCleared);
            }
            Err(e) => self.reply(client, DaemonEvent::error(None, e.to_string())),
        }
    }
}
