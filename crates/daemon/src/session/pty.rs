//! Pseudo-terminal process adapter.
//!
//! Spawns a shell in a PTY, streams its output into the daemon's process
//! channel and reports its exit. The adapter owns no shared state: the
//! registry holds the [`PtyProcess`] and the reader task only holds the
//! sending side of the channel.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, watch};

use super::{ProcessEvent, SessionError};

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

/// Input chunks queued for a shell that is not reading its stdin.
pub const WRITE_QUEUE_CAPACITY: usize = 64;

/// Everything needed to launch one pane's shell.
#[derive(Debug, Clone)]
pub struct PtySpawn {
    pub pane_id: String,
    pub generation: u64,
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, OsString)>,
    pub cols: u16,
    pub rows: u16,
}

/// A live PTY-backed child process.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    input_tx: mpsc::Sender<Vec<u8>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    pause_tx: watch::Sender<bool>,
}

impl PtyProcess {
    /// Spawns the shell and starts its reader task.
    ///
    /// Output arrives as [`ProcessEvent::Output`] tagged with the spawn's
    /// generation; a single [`ProcessEvent::Exit`] follows end of stream.
    pub fn spawn(params: PtySpawn, events: mpsc::Sender<ProcessEvent>) -> Result<Self, SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: params.rows,
                cols: params.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&params.shell);
        cmd.args(&params.args);
        cmd.cwd(&params.cwd);
        for (key, value) in &params.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        // The child holds its own copy; ours would keep the stream open after exit.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        let (pause_tx, pause_rx) = watch::channel(false);
        let (input_tx, input_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        // A shell that stops reading blocks the master's writer, so writes
        // happen on a thread of their own and never on the event loop.
        std::thread::Builder::new()
            .name(format!("pty-writer-{}", params.pane_id))
            .spawn({
                let pane_id = params.pane_id.clone();
                move || write_loop(pane_id, writer, input_rx)
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        tokio::spawn(read_loop(
            params.pane_id.clone(),
            params.generation,
            reader,
            child,
            pause_rx,
            events,
        ));

        tracing::info!(
            pane_id = %params.pane_id,
            pid = ?pid,
            shell = %params.shell,
            cwd = %params.cwd.display(),
            "Spawned PTY session"
        );

        Ok(Self {
            master: pair.master,
            input_tx,
            killer,
            pid,
            pause_tx,
        })
    }

    /// Process ID of the shell, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Queues input for the shell. Returns once the bytes are queued.
    pub fn write(&mut self, data: &[u8]) -> Result<(), SessionError> {
        self.input_tx
            .try_send(data.to_vec())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SessionError::InputBacklog(WRITE_QUEUE_CAPACITY),
                mpsc::error::TrySendError::Closed(_) => {
                    SessionError::WriteFailed("input stream closed".to_string())
                }
            })
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::ResizeFailed(e.to_string()))
    }

    /// Stops (`true`) or restarts (`false`) reading output.
    ///
    /// While paused the kernel's PTY buffer fills and the child blocks on
    /// its own writes.
    pub fn set_paused(&self, paused: bool) {
        self.pause_tx.send_replace(paused);
    }

    /// Terminates the child. Never waits; the reader task reaps it.
    pub fn kill(&mut self) -> Result<(), SessionError> {
        self.set_paused(false);
        self.killer
            .kill()
            .map_err(|e| SessionError::KillFailed(e.to_string()))
    }
}

fn write_loop(pane_id: String, mut writer: Box<dyn Write + Send>, mut input: mpsc::Receiver<Vec<u8>>) {
    while let Some(chunk) = input.blocking_recv() {
        let result = writer.write_all(&chunk).and_then(|()| writer.flush());
        if let Err(e) = result {
            tracing::debug!(pane_id = %pane_id, error = %e, "PTY write ended");
            return;
        }
    }
}

async fn read_loop(
    pane_id: String,
    generation: u64,
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    mut pause_rx: watch::Receiver<bool>,
    events: mpsc::Sender<ProcessEvent>,
) {
    let mut carry = Utf8Carry::default();

    loop {
        while *pause_rx.borrow_and_update() {
            if pause_rx.changed().await.is_err() {
                break;
            }
        }

        let result = tokio::task::spawn_blocking(move || {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            let read = reader.read(&mut buffer);
            (reader, buffer, read)
        })
        .await;

        let (returned, mut buffer, read) = match result {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(pane_id = %pane_id, error = %e, "PTY read task panicked");
                return;
            }
        };
        reader = returned;

        match read {
            Ok(0) => break,
            Ok(n) => {
                buffer.truncate(n);
                let data = carry.decode(&buffer);
                if data.is_empty() {
                    continue;
                }
                let event = ProcessEvent::Output {
                    pane_id: pane_id.clone(),
                    generation,
                    data,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                // EIO is how Linux reports the slave side closing.
                tracing::debug!(pane_id = %pane_id, error = %e, "PTY read ended");
                break;
            }
        }
    }

    let rest = carry.finish();
    if !rest.is_empty() {
        let _ = events
            .send(ProcessEvent::Output {
                pane_id: pane_id.clone(),
                generation,
                data: rest,
            })
            .await;
    }

    let code = tokio::task::spawn_blocking(move || child.wait())
        .await
        .ok()
        .and_then(|status| status.ok())
        .map(|status| status.exit_code() as i32);

    tracing::info!(pane_id = %pane_id, code = ?code, "PTY process exited");
    let _ = events
        .send(ProcessEvent::Exit {
            pane_id,
            generation,
            code,
        })
        .await;
}

/// Decodes a byte stream as UTF-8 across chunk boundaries.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk completes it. Invalid bytes are replaced.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let complete = complete_prefix_len(&self.pending);
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }

    /// Flushes whatever is held back, replacing it if incomplete.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_utf8_carry_across_chunks() {
        let mut carry = Utf8Carry::default();
        let bytes = "a⠋b".as_bytes();
        // Split inside the three-byte spinner glyph.
        assert_eq!(carry.decode(&bytes[..2]), "a");
        assert_eq!(carry.decode(&bytes[2..3]), "");
        assert_eq!(carry.decode(&bytes[3..]), "⠋b");
        assert_eq!(carry.finish(), "");
    }

    #[test]
    fn test_utf8_carry_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.decode(&[b'x', 0x80, b'y']), "x\u{fffd}y");
        assert_eq!(carry.decode(&[0xE2]), "");
        assert_eq!(carry.finish(), "\u{fffd}");
    }

    fn params(pane_id: &str) -> PtySpawn {
        PtySpawn {
            pane_id: pane_id.to_string(),
            generation: 1,
            shell: "/bin/sh".to_string(),
            args: Vec::new(),
            cwd: std::env::temp_dir(),
            env: vec![("TERM".to_string(), "dumb".into())],
            cols: 80,
            rows: 24,
        }
    }

    #[tokio::test]
    async fn test_spawn_echo_and_exit() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut process = PtyProcess::spawn(params("1"), tx).unwrap();
        assert!(process.pid().is_some());

        process.write(b"echo agentmux-marker\n").unwrap();
        process.write(b"exit 3\n").unwrap();

        let mut output = String::new();
        let mut exit_code = None;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            match event {
                ProcessEvent::Output { data, generation, .. } => {
                    assert_eq!(generation, 1);
                    output.push_str(&data);
                }
                ProcessEvent::Exit { code, .. } => {
                    exit_code = code;
                    break;
                }
            }
        }

        assert!(output.contains("agentmux-marker"));
        assert_eq!(exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_write_does_not_wait_for_a_shell_that_is_not_reading() {
        let (tx, _rx) = mpsc::channel(64);
        let mut launch = params("3");
        launch.args = vec!["-c".to_string(), "stty raw -echo; sleep 30".to_string()];
        let mut process = PtyProcess::spawn(launch, tx).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let started = std::time::Instant::now();
        process.write("x".repeat(256 * 1024).as_bytes()).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        // The writer thread is stuck on the first chunk; the queue fills up.
        let mut result = Ok(());
        for _ in 0..=WRITE_QUEUE_CAPACITY + 1 {
            result = process.write(b"y");
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SessionError::InputBacklog(_))));
        assert!(started.elapsed() < Duration::from_secs(1));

        process.kill().unwrap();
    }

    #[tokio::test]
    async fn test_kill_reports_exit() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut process = PtyProcess::spawn(params("2"), tx).unwrap();
        process.resize(100, 30).unwrap();
        process.kill().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let mut exited = false;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if let ProcessEvent::Exit { pane_id, .. } = event {
                assert_eq!(pane_id, "2");
                exited = true;
                break;
            }
        }
        assert!(exited);
    }
}
