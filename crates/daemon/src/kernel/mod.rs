//! Event kernel.
//!
//! Wraps protocol-relevant state changes in [`EventEnvelope`]s with a
//! strictly increasing sequence number, a correlation id and an optional
//! causation id, and coalesces bursty pane output before it is announced.

pub mod coalesce;

pub use coalesce::Coalescer;

use std::collections::HashMap;

use chrono::Utc;
use protocol::{EventEnvelope, KernelEventType};
use uuid::Uuid;

/// Envelope source for events the daemon originates itself.
pub const SOURCE_DAEMON: &str = "daemon";
/// Envelope source for events produced by a pane's process.
pub const SOURCE_PTY: &str = "pty";
/// Envelope source for watchdog and nudge events.
pub const SOURCE_WATCHDOG: &str = "watchdog";

/// Envelope source naming a client connection.
pub fn client_source(client_id: u64) -> String {
    format!("client:{}", client_id)
}

/// The envelope an event is linked to.
#[derive(Debug, Clone, Copy)]
pub enum Cause<'a> {
    /// Starts a new exchange; the envelope is its own correlation root.
    Root,
    /// Continues `parent`'s exchange, naming it as the direct cause.
    Envelope(&'a EventEnvelope),
}

/// Issues envelopes for one daemon lifetime.
#[derive(Debug, Default)]
pub struct EventKernel {
    seq: u64,
    /// Latest write acknowledgement per pane, used as the cause of output.
    last_write_ack: HashMap<String, EventEnvelope>,
}

impl EventKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the most recent envelope (0 before the first).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Issues the next envelope.
    pub fn emit(
        &mut self,
        event_type: KernelEventType,
        source: &str,
        pane_id: Option<&str>,
        payload: serde_json::Value,
        cause: Cause<'_>,
    ) -> EventEnvelope {
        self.seq += 1;
        let event_id = Uuid::new_v4().to_string();
        let (correlation_id, causation_id) = match cause {
            Cause::Root => (event_id.clone(), None),
            Cause::Envelope(parent) => (
                parent.correlation_id.clone(),
                Some(parent.event_id.clone()),
            ),
        };

        let envelope = EventEnvelope {
            event_id,
            correlation_id,
            causation_id,
            event_type,
            source: source.to_string(),
            pane_id: pane_id.map(str::to_string),
            timestamp: Utc::now(),
            seq: self.seq,
            payload,
        };

        if event_type == KernelEventType::DaemonWriteAck {
            if let Some(pane) = pane_id {
                self.last_write_ack.insert(pane.to_string(), envelope.clone());
            }
        }

        tracing::trace!(seq = envelope.seq, event_type = %event_type, pane_id = ?pane_id, "Kernel event");
        envelope
    }

    /// The most recent write acknowledgement for a pane, if any.
    pub fn last_write_ack(&self, pane_id: &str) -> Option<&EventEnvelope> {
        self.last_write_ack.get(pane_id)
    }

    /// Forgets per-pane causal state when a pane goes away.
    pub fn forget_pane(&mut self, pane_id: &str) {
        self.last_write_ack.remove(pane_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seq_strictly_increases() {
        let mut kernel = EventKernel::new();
        let mut last = kernel.seq();
        for i in 0..100 {
            let pane = (i % 3).to_string();
            let env = kernel.emit(
                KernelEventType::PtyDataReceived,
                SOURCE_PTY,
                Some(&pane),
                json!({}),
                Cause::Root,
            );
            assert!(env.seq > last);
            last = env.seq;
        }
        assert_eq!(kernel.seq(), 100);
    }

    #[test]
    fn test_root_is_its_own_correlation() {
        let mut kernel = EventKernel::new();
        let env = kernel.emit(KernelEventType::PtyUp, SOURCE_DAEMON, Some("1"), json!({}), Cause::Root);
        assert_eq!(env.correlation_id, env.event_id);
        assert!(env.causation_id.is_none());
        assert_eq!(env.seq, 1);
    }

    #[test]
    fn test_request_ack_chain() {
        let mut kernel = EventKernel::new();
        let request = kernel.emit(
            KernelEventType::DaemonWriteRequested,
            &client_source(4),
            Some("1"),
            json!({"bytes": 5}),
            Cause::Root,
        );
        let ack = kernel.emit(
            KernelEventType::DaemonWriteAck,
            SOURCE_DAEMON,
            Some("1"),
            json!({"status": "accepted"}),
            Cause::Envelope(&request),
        );

        assert_eq!(request.source, "client:4");
        assert_eq!(ack.correlation_id, request.correlation_id);
        assert!(ack.is_caused_by(&request));
        assert!(ack.seq > request.seq);
        assert_eq!(kernel.last_write_ack("1"), Some(&ack));
        assert!(kernel.last_write_ack("2").is_none());

        kernel.forget_pane("1");
        assert!(kernel.last_write_ack("1").is_none());
    }
}
