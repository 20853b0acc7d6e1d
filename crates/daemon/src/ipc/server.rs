//! IPC server for front-end connections over a Unix Domain Socket.
//!
//! Each accepted connection gets two tasks: a reader that reassembles
//! records and forwards decoded actions to the orchestrator, and a writer
//! that drains the connection's queue in the [`ClientHub`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use protocol::{parse_action, LineBuffer, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{ClientHub, ClientId, ClientMessage};

const READ_CHUNK_BYTES: usize = 8192;

/// How long queued events may take to flush once the server stops.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record could not be framed or encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Another daemon is answering on the socket.
    #[error("daemon already running on {}", .0.display())]
    AlreadyRunning(PathBuf),

    /// The daemon answered with an error event.
    #[error("daemon error: {0}")]
    Daemon(String),
}

/// A listener on the daemon's Unix socket. The socket file is removed on drop.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Binds the server to the socket path.
    ///
    /// Parent directories are created. A leftover socket file from a dead
    /// daemon is removed, but if something still accepts connections on it
    /// the bind fails with [`IpcError::AlreadyRunning`].
    pub async fn bind(path: &Path) -> Result<Self, IpcError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            if UnixStream::connect(path).await.is_ok() {
                return Err(IpcError::AlreadyRunning(path.to_path_buf()));
            }
            tracing::debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accepts the next connection.
    pub async fn accept(&self) -> Result<UnixStream, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Runs the accept loop until `shutdown` is cancelled.
///
/// On shutdown every client queue is closed and writers get a short window
/// to flush what was already queued (the final `shutdown` event included).
pub async fn serve(
    server: IpcServer,
    hub: Arc<ClientHub>,
    messages: mpsc::Sender<ClientMessage>,
    shutdown: CancellationToken,
) {
    let mut next_id: ClientId = 1;
    let mut readers = JoinSet::new();
    let mut writers = JoinSet::new();

    tracing::info!(path = %server.path().display(), "Listening for clients");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let id = next_id;
                    next_id += 1;
                    let (read_half, write_half) = stream.into_split();

                    let queue = hub.register(id);
                    writers.spawn(write_loop(id, write_half, queue));

                    // Connected must reach the orchestrator before any action.
                    if messages.send(ClientMessage::Connected(id)).await.is_err() {
                        break;
                    }
                    readers.spawn(read_loop(id, read_half, messages.clone()));
                    tracing::debug!(client_id = id, "Client connected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
            Some(_) = writers.join_next(), if !writers.is_empty() => {}
        }
    }

    readers.abort_all();
    hub.clear();
    let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async {
        while writers.join_next().await.is_some() {}
    })
    .await;
    if flushed.is_err() {
        tracing::warn!("Timed out flushing client queues");
    }
    tracing::info!("IPC server stopped");
}

async fn read_loop(id: ClientId, mut reader: OwnedReadHalf, messages: mpsc::Sender<ClientMessage>) {
    let mut buffer = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(client_id = id, error = %e, "Client read failed");
                break;
            }
        };

        for line in buffer.push(&chunk[..n]) {
            let message = match line.and_then(|l| parse_action(&l)) {
                Ok(action) => ClientMessage::Action { client: id, action },
                Err(error) => ClientMessage::Invalid { client: id, error },
            };
            if messages.send(message).await.is_err() {
                return;
            }
        }
    }

    let _ = messages.send(ClientMessage::Disconnected(id)).await;
}

async fn write_loop(id: ClientId, mut writer: OwnedWriteHalf, mut queue: mpsc::Receiver<Arc<str>>) {
    while let Some(line) = queue.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::debug!(client_id = id, error = %e, "Client write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ClientAction, DaemonEvent};
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_server_bind_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nested").join("dir").join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_bind_removes_stale_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        // A std listener leaves its socket file behind when dropped.
        drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
        assert!(socket_path.exists());

        let _server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_bind_detects_running_daemon() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let _first = IpcServer::bind(&socket_path).await.unwrap();
        let second = IpcServer::bind(&socket_path).await;
        assert!(matches!(second, Err(IpcError::AlreadyRunning(_))));
    }

    #[tokio::test]
    async fn test_serve_forwards_actions_and_events() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let hub = Arc::new(ClientHub::new());
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(server, Arc::clone(&hub), tx, shutdown.clone()));

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let id = match rx.recv().await.unwrap() {
            ClientMessage::Connected(id) => id,
            other => panic!("unexpected: {:?}", other),
        };

        // One record split across two writes, then a bad record.
        write_half.write_all(b"{\"action\":").await.unwrap();
        write_half.write_all(b"\"ping\"}\n{oops}\n").await.unwrap();

        match rx.recv().await.unwrap() {
            ClientMessage::Action { client, action } => {
                assert_eq!(client, id);
                assert_eq!(action, ClientAction::Ping);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientMessage::Invalid {
                error: ProtocolError::Malformed(_),
                ..
            }
        ));

        assert!(hub.send_to(id, &DaemonEvent::SessionCleared));
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"event":"session-cleared"}"#);

        drop(write_half);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientMessage::Disconnected(d) if d == id
        ));

        shutdown.cancel();
        task.await.unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_shutdown_flushes_queued_events() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let hub = Arc::new(ClientHub::new());
        let (tx, mut rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(server, Arc::clone(&hub), tx, shutdown.clone()));

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        assert!(matches!(rx.recv().await.unwrap(), ClientMessage::Connected(_)));

        hub.broadcast(&DaemonEvent::Shutdown {
            message: "bye".to_string(),
        });
        shutdown.cancel();
        task.await.unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.contains("\"event\":\"shutdown\""));
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
