//! Daemon orchestrator: the single owner of all daemon state.
//!
//! Every input reaches the orchestrator as a message: client actions and
//! connection changes from the IPC tasks, output and exit notices from the
//! session backends, and timer deadlines (output coalescing, heartbeat ticks,
//! the periodic snapshot and the watchdog recheck). Each one is handled to
//! completion before the next, so the registry needs no locks and the
//! one-process-per-pane rule holds trivially.
//!
//! ```text
//!   ipc::serve ──ClientMessage──┐
//!                               ├──▶ DaemonOrchestrator ──▶ ClientHub ──▶ clients
//!   PTY / dry-run ─ProcessEvent─┘        │ registry, kernel, coalescer,
//!                                        │ dedup, heartbeat, nudges
//!   timers ──────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use protocol::{DaemonEvent, DataSummary, EventEnvelope, KernelEventType, SessionSnapshot, PROTOCOL_VERSION};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::classify::PatternClassifier;
use crate::clock::now_millis;
use crate::config::{Config, DeliveryMode};
use crate::dedup::DedupGuard;
use crate::ipc::{ClientHub, ClientId, ClientMessage};
use crate::kernel::{Cause, Coalescer, EventKernel, SOURCE_DAEMON, SOURCE_PTY, SOURCE_WATCHDOG};
use crate::persistence::{PersistenceError, SnapshotStore};
use crate::session::{ProcessEvent, SessionRegistry, WriteOutcome};
use crate::watchdog::{
    assess, write_trigger, AlertLog, CoordinationFiles, Heartbeat, HeartbeatRequest, NudgeDecision,
    NudgeTracker, Observation, PaneClocks, StuckThresholds, WatchdogAction,
};

/// Capacity of the queue between session backends and the event loop.
const PROCESS_QUEUE: usize = 1024;

/// Capacity of the queue between connection readers and the event loop.
const CLIENT_QUEUE: usize = 256;

/// Handles the outside world needs to drive a running orchestrator.
#[derive(Clone)]
pub struct DaemonHandles {
    pub hub: Arc<ClientHub>,
    pub clients: mpsc::Sender<ClientMessage>,
    /// Cancel to request a graceful shutdown.
    pub shutdown: CancellationToken,
    /// Cancelled by the orchestrator once clients were told it is going away.
    pub server_stop: CancellationToken,
}

struct Inbox {
    clients: mpsc::Receiver<ClientMessage>,
    processes: mpsc::Receiver<ProcessEvent>,
}

/// Owner of the registry, the kernel and the watchdog.
pub struct DaemonOrchestrator {
    pub(crate) config: Arc<Config>,
    pub(crate) hub: Arc<ClientHub>,
    pub(crate) registry: SessionRegistry,
    pub(crate) kernel: EventKernel,
    pub(crate) coalescer: Coalescer,
    pub(crate) dedup: DedupGuard,
    pub(crate) classifier: PatternClassifier,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) nudges: NudgeTracker,
    pub(crate) thresholds: StuckThresholds,
    pub(crate) coordination: CoordinationFiles,
    pub(crate) alerts: AlertLog,
    pub(crate) snapshots: SnapshotStore,
    /// Snapshot found at startup, offered through `get-session`.
    pub(crate) recovered: Option<SessionSnapshot>,
    pub(crate) started: std::time::Instant,
    pub(crate) shutdown: CancellationToken,
    pub(crate) shutdown_message: Option<String>,
    server_stop: CancellationToken,
    client_tx: mpsc::Sender<ClientMessage>,
    inbox: Option<Inbox>,
}

impl DaemonOrchestrator {
    /// Builds the daemon state from a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let classifier = PatternClassifier::new(&config.stuck.spinner_glyphs)
            .context("Failed to build activity classifier")?;

        let snapshots = SnapshotStore::new(config.snapshot_path());
        let recovered = match snapshots.load() {
            Ok(Some(snapshot)) => {
                info!(
                    terminals = snapshot.terminals.len(),
                    saved_at = %snapshot.saved_at,
                    "Found previous session snapshot"
                );
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable session snapshot");
                None
            }
        };

        let (process_tx, process_rx) = mpsc::channel(PROCESS_QUEUE);
        let (client_tx, client_rx) = mpsc::channel(CLIENT_QUEUE);

        Ok(Self {
            registry: SessionRegistry::new(Arc::clone(&config), process_tx),
            hub: Arc::new(ClientHub::new()),
            kernel: EventKernel::new(),
            coalescer: Coalescer::new(Duration::from_millis(config.kernel.coalesce_window_ms)),
            dedup: DedupGuard::new(&config.dedup),
            classifier,
            heartbeat: Heartbeat::new(config.watchdog.clone()),
            nudges: NudgeTracker::new(&config.stuck),
            thresholds: StuckThresholds::from(&config.stuck),
            coordination: CoordinationFiles::from_config(&config),
            alerts: AlertLog::new(config.alerts_path()),
            snapshots,
            recovered,
            started: std::time::Instant::now(),
            shutdown: CancellationToken::new(),
            shutdown_message: None,
            server_stop: CancellationToken::new(),
            client_tx,
            inbox: Some(Inbox {
                clients: client_rx,
                processes: process_rx,
            }),
            config,
        })
    }

    pub fn handles(&self) -> DaemonHandles {
        DaemonHandles {
            hub: Arc::clone(&self.hub),
            clients: self.client_tx.clone(),
            shutdown: self.shutdown.clone(),
            server_stop: self.server_stop.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the event loop until shutdown is requested, then tears down.
    pub async fn run(mut self) -> Result<()> {
        let Some(mut inbox) = self.inbox.take() else {
            anyhow::bail!("Orchestrator is already running");
        };

        let now = Instant::now();
        let save_period = Duration::from_secs(self.config.persistence.interval_secs);
        let mut save_tick = interval_at(now + save_period, save_period);
        save_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let recheck_period = Duration::from_secs(self.config.watchdog.state_recheck_secs);
        let mut recheck_tick = interval_at(now + recheck_period, recheck_period);
        recheck_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if self.config.watchdog.enabled_on_start {
            self.enable_watchdog();
        }

        let shutdown = self.shutdown.clone();
        info!(pid = std::process::id(), "Daemon event loop running");

        loop {
            let coalesce_deadline = self.coalescer.next_deadline();
            let heartbeat_deadline = self.heartbeat.next_deadline();

            // Polled fairly; no source may starve the others.
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(message) = inbox.clients.recv() => self.handle_client(message),
                Some(event) = inbox.processes.recv() => self.handle_process(event),
                _ = sleep_until_opt(coalesce_deadline) => self.flush_due_output(),
                _ = sleep_until_opt(heartbeat_deadline) => self.poll_heartbeat(),
                _ = recheck_tick.tick() => self.recheck_watchdog(),
                _ = save_tick.tick() => self.periodic_save(),
            }
        }

        self.shutdown_sequence();
        Ok(())
    }

    fn handle_client(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Connected(client) => {
                self.reply(
                    client,
                    DaemonEvent::Connected {
                        terminals: self.registry.list(),
                        daemon_pid: std::process::id(),
                        protocol_version: PROTOCOL_VERSION,
                    },
                );
            }
            ClientMessage::Action { client, action } => self.route(client, action),
            ClientMessage::Invalid { client, error } => {
                debug!(client_id = client, error = %error, "Rejected client record");
                self.reply(client, DaemonEvent::error(None, error.to_string()));
            }
            ClientMessage::Disconnected(client) => {
                self.hub.unregister(client);
                debug!(client_id = client, "Client disconnected");
            }
        }
    }

    pub(crate) fn handle_process(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output {
                pane_id,
                generation,
                data,
            } => self.on_output(&pane_id, generation, &data),
            ProcessEvent::Exit {
                pane_id,
                generation,
                code,
            } => self.on_exit(&pane_id, generation, code),
        }
    }

    fn on_output(&mut self, pane_id: &str, generation: u64, data: &str) {
        let now = now_millis();
        let Some(meaningful) =
            self.registry
                .record_output(pane_id, generation, data, now, &self.classifier)
        else {
            trace!(pane_id = %pane_id, generation = generation, "Dropping output from stale session");
            return;
        };

        self.broadcast(DaemonEvent::Data {
            pane_id: pane_id.to_string(),
            data: data.to_string(),
        });
        self.coalescer
            .record(pane_id, data.len(), meaningful, Instant::now());
    }

    fn on_exit(&mut self, pane_id: &str, generation: u64, code: Option<i32>) {
        let Some(session) = self.registry.on_exit(pane_id, generation) else {
            trace!(pane_id = %pane_id, generation = generation, "Ignoring exit of stale session");
            return;
        };
        info!(pane_id = %pane_id, pid = session.pid, code = ?code, "Terminal exited");

        if let Some(summary) = self.coalescer.flush_pane(pane_id) {
            self.publish_output_summary(pane_id, summary);
        }
        self.broadcast(DaemonEvent::Exit {
            pane_id: pane_id.to_string(),
            code,
        });
        self.publish(
            KernelEventType::PtyDown,
            SOURCE_PTY,
            Some(pane_id),
            json!({ "pid": session.pid, "code": code, "reason": "exit" }),
            Cause::Root,
        );
        self.forget_pane(pane_id);
    }

    /// Drops per-pane memory once a pane's session is gone.
    pub(crate) fn forget_pane(&mut self, pane_id: &str) {
        self.kernel.forget_pane(pane_id);
        self.dedup.forget_pane(pane_id);
        if self.nudges.reset(Some(pane_id)) > 0 {
            self.leave_recovering_if_settled();
        }
    }

    fn flush_due_output(&mut self) {
        for (pane_id, summary) in self.coalescer.drain_due(Instant::now()) {
            self.publish_output_summary(&pane_id, summary);
        }
    }

    /// Announces a coalesced output window, caused by the pane's latest write.
    fn publish_output_summary(&mut self, pane_id: &str, summary: DataSummary) {
        let ack = self.kernel.last_write_ack(pane_id).cloned();
        let cause = match &ack {
            Some(ack) => Cause::Envelope(ack),
            None => Cause::Root,
        };
        self.publish(
            KernelEventType::PtyDataReceived,
            SOURCE_PTY,
            Some(pane_id),
            json!({
                "bytes": summary.bytes,
                "chunks": summary.chunks,
                "activity": summary.activity,
            }),
            cause,
        );
    }

    /// Writes to a pane and turns a dry-run echo into output.
    pub(crate) fn write_input(&mut self, pane_id: &str, data: &str) -> WriteOutcome {
        let outcome = self.registry.write(pane_id, data, now_millis());
        if let Some(echo) = &outcome.echo {
            if let Some(generation) = self.registry.get(pane_id).map(|s| s.generation) {
                self.on_output(pane_id, generation, echo);
            }
        }
        outcome
    }

    /// Delivers watchdog text to a pane: typed into its terminal and
    /// submitted, or dropped as a trigger file for an external injector.
    pub(crate) fn deliver(&mut self, pane_id: &str, text: &str) -> std::result::Result<(), String> {
        match self.config.watchdog.delivery {
            DeliveryMode::Pty => {
                let typed = self.write_input(pane_id, text);
                if !typed.status.is_accepted() {
                    return Err(typed.error.unwrap_or_else(|| format!("write to pane {} failed", pane_id)));
                }
                let submitted = self.write_input(pane_id, "\r");
                if !submitted.status.is_accepted() {
                    return Err(submitted.error.unwrap_or_else(|| format!("write to pane {} failed", pane_id)));
                }
                Ok(())
            }
            DeliveryMode::TriggerFile => write_trigger(&self.config.trigger_dir(), pane_id, text)
                .map(|path| debug!(pane_id = %pane_id, path = %path.display(), "Wrote trigger file"))
                .map_err(|e| e.to_string()),
        }
    }

    pub(crate) fn enable_watchdog(&mut self) {
        let pending = self.coordination.read_pending(SystemTime::now());
        let actions = self.heartbeat.enable(Instant::now(), pending);
        info!(lead_pane = %self.config.watchdog.lead_pane, "Watchdog enabled");
        self.apply_watchdog(actions);
    }

    /// What the coordination files and worker panes say right now.
    fn observe(&self) -> Observation {
        let pending = self.coordination.read_pending(SystemTime::now());
        let responded = match self.heartbeat.awaiting_since() {
            Some(sent_at) => {
                self.coordination.responded_since(sent_at)
                    || (self.heartbeat.is_escalated() && self.workers_responded(sent_at))
            }
            None => false,
        };
        Observation { pending, responded }
    }

    /// True if any worker typed something after the escalation settled.
    fn workers_responded(&self, since: u64) -> bool {
        let after = since + self.config.stuck.ack_grace_ms;
        self.config.watchdog.worker_panes.iter().any(|pane| {
            self.registry
                .get(pane)
                .and_then(|s| s.last_input_time)
                .map(|t| t > after)
                .unwrap_or(false)
        })
    }

    fn poll_heartbeat(&mut self) {
        let observation = self.observe();
        let actions = self.heartbeat.poll(Instant::now(), now_millis(), observation);
        self.apply_watchdog(actions);
    }

    /// Runs a heartbeat now. Returns false if the watchdog refused.
    pub(crate) fn trigger_heartbeat(&mut self) -> bool {
        match self.heartbeat.trigger(Instant::now(), now_millis()) {
            Some(action) => {
                self.apply_watchdog(vec![action]);
                true
            }
            None => false,
        }
    }

    fn recheck_watchdog(&mut self) {
        self.check_nudge_acks();
        if !self.heartbeat.is_enabled() {
            return;
        }
        self.detect_stuck();
        let observation = self.observe();
        let actions = self.heartbeat.recheck(Instant::now(), now_millis(), observation);
        self.apply_watchdog(actions);
    }

    /// Clears nudge records of panes whose input clock moved since the nudge.
    pub(crate) fn check_nudge_acks(&mut self) {
        if self.nudges.is_empty() {
            return;
        }
        let mut cleared = false;
        for pane_id in self.nudges.panes() {
            let last_input = self.registry.get(&pane_id).and_then(|s| s.last_input_time);
            if let Some(attempts) = self.nudges.check_ack(&pane_id, last_input) {
                info!(pane_id = %pane_id, attempts = attempts, "Nudged pane responded");
                self.publish(
                    KernelEventType::NudgeAcknowledged,
                    SOURCE_WATCHDOG,
                    Some(&pane_id),
                    json!({ "attempts": attempts }),
                    Cause::Root,
                );
                cleared = true;
            }
        }
        if cleared {
            self.leave_recovering_if_settled();
        }
    }

    pub(crate) fn leave_recovering_if_settled(&mut self) {
        if self.nudges.is_empty() {
            if let Some(action) = self.heartbeat.set_recovering(false, Instant::now()) {
                self.apply_watchdog(vec![action]);
            }
        }
    }

    fn detect_stuck(&mut self) {
        let now = now_millis();
        for pane_id in self.registry.live_panes() {
            let Some(session) = self.registry.get(&pane_id) else {
                continue;
            };
            let clocks = PaneClocks {
                last_activity: session.last_activity,
                last_meaningful_activity: session.last_meaningful_activity,
                last_input_time: session.last_input_time,
            };
            let Some(assessment) = assess(clocks, now, self.thresholds) else {
                continue;
            };

            match self.nudges.on_stuck(&pane_id, now) {
                NudgeDecision::Nudge { attempt } => {
                    warn!(
                        pane_id = %pane_id,
                        attempt = attempt,
                        input_idle_ms = assessment.input_idle_ms,
                        churning = assessment.churning,
                        "Pane looks stuck, nudging"
                    );
                    self.broadcast(DaemonEvent::AgentStuckDetected {
                        pane_id: pane_id.clone(),
                        idle_ms: assessment.input_idle_ms,
                        attempt,
                        churning: assessment.churning,
                    });
                    let message = self.config.stuck.nudge_message.clone();
                    let delivered = self.deliver(&pane_id, &message);
                    if let Err(e) = &delivered {
                        warn!(pane_id = %pane_id, error = %e, "Nudge delivery failed");
                    }
                    self.publish(
                        KernelEventType::NudgeSent,
                        SOURCE_WATCHDOG,
                        Some(&pane_id),
                        json!({
                            "attempt": attempt,
                            "inputIdleMs": assessment.input_idle_ms,
                            "churning": assessment.churning,
                            "delivered": delivered.is_ok(),
                        }),
                        Cause::Root,
                    );
                    if attempt == 1 {
                        if let Some(action) = self.heartbeat.set_recovering(true, Instant::now()) {
                            self.apply_watchdog(vec![action]);
                        }
                    }
                }
                NudgeDecision::Alert { attempts } => {
                    let message = format!(
                        "Pane {} is unresponsive after {} nudges",
                        self.config.pane_label(&pane_id),
                        attempts
                    );
                    error!(pane_id = %pane_id, attempts = attempts, "{}", message);
                    self.record_alert("nudge", &message);
                    self.broadcast(DaemonEvent::AgentStuckAlert {
                        pane_id: pane_id.clone(),
                        attempts,
                        message: message.clone(),
                    });
                    self.publish(
                        KernelEventType::NudgeAlert,
                        SOURCE_WATCHDOG,
                        Some(&pane_id),
                        json!({ "attempts": attempts, "message": message }),
                        Cause::Root,
                    );
                }
                NudgeDecision::Wait | NudgeDecision::Silent => {}
            }
        }
    }

    /// Carries out what the heartbeat machine asked for.
    pub(crate) fn apply_watchdog(&mut self, actions: Vec<WatchdogAction>) {
        for action in actions {
            match action {
                WatchdogAction::StateChanged { state, interval } => {
                    let interval_ms = interval.as_millis() as u64;
                    self.broadcast(DaemonEvent::HeartbeatStateChanged {
                        state,
                        interval: interval_ms,
                    });
                    self.publish(
                        KernelEventType::WatchdogStateChanged,
                        SOURCE_WATCHDOG,
                        None,
                        json!({ "state": state, "intervalMs": interval_ms }),
                        Cause::Root,
                    );
                }
                WatchdogAction::SendHeartbeat { attempt } => self.send_heartbeat(attempt),
                WatchdogAction::Escalate { pending } => {
                    let lead = self.config.pane_label(&self.config.watchdog.lead_pane);
                    let message = format!(
                        "Lead pane {} is not responding. Pending: {} tasks, {} blockers, {} errors. Please check in.",
                        lead, pending.pending_tasks, pending.open_blockers, pending.open_errors
                    );
                    let workers = self.config.watchdog.worker_panes.clone();
                    let mut reached = Vec::new();
                    for worker in &workers {
                        match self.deliver(worker, &message) {
                            Ok(()) => reached.push(worker.clone()),
                            Err(e) => warn!(pane_id = %worker, error = %e, "Escalation delivery failed"),
                        }
                    }
                    warn!(workers = ?reached, "Escalated heartbeat to workers");
                    self.publish(
                        KernelEventType::WatchdogEscalated,
                        SOURCE_WATCHDOG,
                        None,
                        json!({ "workers": reached, "pending": pending }),
                        Cause::Root,
                    );
                }
                WatchdogAction::Alert { message, pending } => {
                    error!(pending = pending.total(), "{}", message);
                    self.record_alert("watchdog", &message);
                    self.broadcast(DaemonEvent::WatchdogAlert {
                        message: message.clone(),
                        pending: pending.clone(),
                    });
                    self.publish(
                        KernelEventType::WatchdogAlert,
                        SOURCE_WATCHDOG,
                        None,
                        json!({ "message": message, "pending": pending }),
                        Cause::Root,
                    );
                }
                WatchdogAction::Acknowledged { attempts, escalated } => {
                    info!(attempts = attempts, escalated = escalated, "Heartbeat acknowledged");
                    self.publish(
                        KernelEventType::WatchdogHeartbeatAcknowledged,
                        SOURCE_WATCHDOG,
                        None,
                        json!({ "attempts": attempts, "escalated": escalated }),
                        Cause::Root,
                    );
                }
            }
        }
    }

    fn send_heartbeat(&mut self, attempt: u32) {
        let request = HeartbeatRequest {
            request_id: Uuid::new_v4().to_string(),
            sent_at: Utc::now(),
            attempt,
        };
        if let Err(e) = self.coordination.write_request(&request) {
            warn!(error = %e, path = %self.coordination.request_path().display(), "Failed to write heartbeat marker");
        }

        let lead = self.config.watchdog.lead_pane.clone();
        let message = self.config.watchdog.heartbeat_message.clone();
        let delivered = self.deliver(&lead, &message);
        match &delivered {
            Ok(()) => info!(pane_id = %lead, attempt = attempt, "Heartbeat sent"),
            Err(e) => warn!(pane_id = %lead, attempt = attempt, error = %e, "Heartbeat delivery failed"),
        }
        self.publish(
            KernelEventType::WatchdogHeartbeatSent,
            SOURCE_WATCHDOG,
            Some(&lead),
            json!({
                "requestId": request.request_id,
                "attempt": attempt,
                "delivered": delivered.is_ok(),
            }),
            Cause::Root,
        );
    }

    fn record_alert(&self, kind: &str, message: &str) {
        if let Err(e) = self.alerts.append(Utc::now(), kind, message) {
            error!(error = %e, path = %self.alerts.path().display(), "Failed to write alert log");
        }
    }

    fn periodic_save(&mut self) {
        // An empty registry would only overwrite what a previous run left.
        if self.registry.is_empty() {
            trace!("Skipping snapshot of empty registry");
            return;
        }
        if let Err(e) = self.save_snapshot(None) {
            error!(error = %e, "Periodic snapshot failed");
        }
    }

    pub(crate) fn save_snapshot(
        &mut self,
        cause: Option<&EventEnvelope>,
    ) -> std::result::Result<SessionSnapshot, PersistenceError> {
        let snapshot = self.snapshots.save(self.registry.snapshot())?;
        debug!(terminals = snapshot.terminals.len(), path = %self.snapshots.path().display(), "Saved session snapshot");
        self.publish(
            KernelEventType::SessionSaved,
            SOURCE_DAEMON,
            None,
            json!({
                "path": self.snapshots.path().display().to_string(),
                "terminals": snapshot.terminals.len(),
            }),
            cause.map(Cause::Envelope).unwrap_or(Cause::Root),
        );
        Ok(snapshot)
    }

    /// Asks the event loop to stop after the current message.
    pub(crate) fn request_shutdown(&mut self, message: String) {
        self.shutdown_message = Some(message);
        self.shutdown.cancel();
    }

    fn shutdown_sequence(&mut self) {
        let message = self
            .shutdown_message
            .take()
            .unwrap_or_else(|| "daemon shutting down".to_string());
        info!(message = %message, "Shutting down");

        for (pane_id, summary) in self.coalescer.flush_all() {
            self.publish_output_summary(&pane_id, summary);
        }
        self.publish(
            KernelEventType::DaemonShutdown,
            SOURCE_DAEMON,
            None,
            json!({ "message": message, "terminals": self.registry.len() }),
            Cause::Root,
        );
        self.broadcast(DaemonEvent::Shutdown { message });

        if let Err(e) = self.save_snapshot(None) {
            error!(error = %e, "Final snapshot failed");
        }
        let killed = self.registry.kill_all();
        info!(count = killed.len(), "Killed terminal sessions");
        self.heartbeat.disable();

        self.server_stop.cancel();
    }

    /// Issues a kernel envelope and broadcasts it as a `kernel-event`.
    pub(crate) fn publish(
        &mut self,
        event_type: KernelEventType,
        source: &str,
        pane_id: Option<&str>,
        payload: serde_json::Value,
        cause: Cause<'_>,
    ) -> EventEnvelope {
        let envelope = self.kernel.emit(event_type, source, pane_id, payload, cause);
        self.hub.broadcast(&DaemonEvent::KernelEvent {
            event_data: envelope.clone(),
        });
        envelope
    }

    pub(crate) fn broadcast(&self, event: DaemonEvent) {
        self.hub.broadcast(&event);
    }

    pub(crate) fn reply(&self, client: ClientId, event: DaemonEvent) {
        self.hub.send_to(client, &event);
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
