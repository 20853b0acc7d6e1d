//! IPC client used by the CLI and by integration tests.
//!
//! The daemon's socket is not strictly request/response: a connection first
//! receives `connected`, and broadcasts may arrive at any time. Request
//! helpers therefore read events until one answers the request, skipping the
//! rest. An `error` event is taken as the answer.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::{encode_line, ClientAction, DaemonEvent, HealthInfo, HeartbeatStatusInfo, TerminalInfo};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// A connection to the daemon's control socket.
pub struct IpcClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl IpcClient {
    /// Connects to the daemon at the socket path.
    ///
    /// Fails if the daemon is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        Self::connect_with_timeout(path, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connects with a custom timeout, also used for every later request.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| timed_out("connection timed out"))??;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer: write_half,
            timeout,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends one action without waiting for an answer.
    pub async fn send(&mut self, action: &ClientAction) -> Result<(), IpcError> {
        let line = encode_line(action)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Sends raw bytes, for exercising the daemon's framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), IpcError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Reads the next event, whatever it is.
    pub async fn next_event(&mut self) -> Result<DaemonEvent, IpcError> {
        tokio::time::timeout(self.timeout, self.read_event())
            .await
            .map_err(|_| timed_out("operation timed out"))?
    }

    /// Reads events until `pick` accepts one.
    pub async fn wait_for<T>(
        &mut self,
        mut pick: impl FnMut(&DaemonEvent) -> Option<T>,
    ) -> Result<T, IpcError> {
        let timeout = self.timeout;
        let wait = async {
            loop {
                let event = self.read_event().await?;
                if let Some(found) = pick(&event) {
                    return Ok::<T, IpcError>(found);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| timed_out("operation timed out"))?
    }

    /// Sends an action and waits for its answer.
    pub async fn request<T>(
        &mut self,
        action: &ClientAction,
        mut pick: impl FnMut(&DaemonEvent) -> Option<T>,
    ) -> Result<T, IpcError> {
        self.send(action).await?;
        let answer = self
            .wait_for(|event| match event {
                DaemonEvent::Error { message, .. } => Some(Err(message.clone())),
                other => pick(other).map(Ok),
            })
            .await?;
        answer.map_err(IpcError::Daemon)
    }

    /// Checks liveness. Returns the daemon's uptime in milliseconds.
    pub async fn ping(&mut self) -> Result<u64, IpcError> {
        self.request(&ClientAction::Ping, |event| match event {
            DaemonEvent::Pong { uptime_ms, .. } => Some(*uptime_ms),
            _ => None,
        })
        .await
    }

    pub async fn health(&mut self) -> Result<HealthInfo, IpcError> {
        self.request(&ClientAction::Health, |event| match event {
            DaemonEvent::Health(info) => Some(info.clone()),
            _ => None,
        })
        .await
    }

    pub async fn heartbeat_status(&mut self) -> Result<HeartbeatStatusInfo, IpcError> {
        self.request(&ClientAction::HeartbeatStatus, |event| match event {
            DaemonEvent::HeartbeatStatus(info) => Some(info.clone()),
            _ => None,
        })
        .await
    }

    pub async fn list(&mut self) -> Result<Vec<TerminalInfo>, IpcError> {
        self.request(&ClientAction::List, |event| match event {
            DaemonEvent::List { terminals } => Some(terminals.clone()),
            _ => None,
        })
        .await
    }

    /// Asks the daemon to shut down. Returns its farewell message.
    pub async fn shutdown(&mut self) -> Result<String, IpcError> {
        self.request(&ClientAction::Shutdown, |event| match event {
            DaemonEvent::Shutdown { message } => Some(message.clone()),
            _ => None,
        })
        .await
    }

    async fn read_event(&mut self) -> Result<DaemonEvent, IpcError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await?
                .ok_or_else(|| IpcError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "daemon closed connection")))?;
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(&line)?);
        }
    }
}

fn timed_out(message: &str) -> IpcError {
    IpcError::Io(io::Error::new(io::ErrorKind::TimedOut, message.to_string()))
}
