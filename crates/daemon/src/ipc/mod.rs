//! Unix Domain Socket control channel.
//!
//! Front ends talk to the daemon over a local Unix socket using
//! newline-delimited JSON: [`protocol::ClientAction`] records in,
//! [`protocol::DaemonEvent`] records out. Many clients may be connected at
//! once; every one of them receives broadcast events.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/agentmux/daemon.sock`
//! - Fallback: `/tmp/agentmux-$UID/daemon.sock`
//!
//! `daemon.socket_path` in the config (or `AGENTMUX_SOCKET`) overrides both.
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{get_socket_path, IpcClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     let uptime = client.ping().await?;
//!     println!("daemon up for {} ms", uptime);
//!     Ok(())
//! }
//! ```

mod client;
pub mod hub;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use hub::ClientHub;
pub use server::{serve, IpcError, IpcServer};

use std::path::PathBuf;

use protocol::{ClientAction, ProtocolError};

/// Connection-scoped client identifier.
pub type ClientId = u64;

/// What the connection tasks report to the orchestrator.
#[derive(Debug)]
pub enum ClientMessage {
    /// A client connected; its queue is already registered with the hub.
    Connected(ClientId),
    /// A client sent a well-formed action.
    Action { client: ClientId, action: ClientAction },
    /// A client sent a record that could not be decoded.
    Invalid { client: ClientId, error: ProtocolError },
    /// A client went away.
    Disconnected(ClientId),
}

impl ClientMessage {
    pub fn client(&self) -> ClientId {
        match self {
            ClientMessage::Connected(id) | ClientMessage::Disconnected(id) => *id,
            ClientMessage::Action { client, .. } | ClientMessage::Invalid { client, .. } => *client,
        }
    }
}

/// Default socket path.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/agentmux/daemon.sock`
/// 2. Otherwise: `/tmp/agentmux-$UID/daemon.sock`
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("agentmux").join("daemon.sock")
    } else {
        let uid = std::fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0);
        PathBuf::from(format!("/tmp/agentmux-{}", uid)).join("daemon.sock")
    }
}

#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/agentmux-unsupported/daemon.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_socket_path_with_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let path = get_socket_path();
        assert_eq!(path, PathBuf::from("/run/user/1000/agentmux/daemon.sock"));

        match original {
            Some(val) => std::env::set_var("XDG_RUNTIME_DIR", val),
            None => std::env::remove_var("XDG_RUNTIME_DIR"),
        }
    }

    #[test]
    #[serial]
    fn test_get_socket_path_without_xdg_runtime_dir() {
        let original = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::remove_var("XDG_RUNTIME_DIR");
        let path = get_socket_path();
        let text = path.to_string_lossy();
        assert!(text.starts_with("/tmp/agentmux-"));
        assert!(text.ends_with("/daemon.sock"));

        if let Some(val) = original {
            std::env::set_var("XDG_RUNTIME_DIR", val);
        }
    }

    #[test]
    fn test_client_message_id() {
        assert_eq!(ClientMessage::Connected(3).client(), 3);
        let msg = ClientMessage::Action {
            client: 9,
            action: ClientAction::Ping,
        };
        assert_eq!(msg.client(), 9);
    }
}
