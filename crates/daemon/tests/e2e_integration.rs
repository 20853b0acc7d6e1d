//! End-to-end integration tests for agentmux.
//!
//! These tests run a real daemon (event loop + socket server) on a temporary
//! socket and drive it with dry-run panes:
//! - Spawn, write, kill and respawn
//! - Ghost-input blocking
//! - Kernel sequence ordering
//! - Watchdog defaults
//! - Shutdown and persistence

use std::path::PathBuf;
use std::time::Duration;

use daemon::config::Config;
use daemon::ipc::{serve, IpcClient, IpcError, IpcServer};
use daemon::orchestrator::{DaemonHandles, DaemonOrchestrator};
use protocol::{ClientAction, DaemonEvent, HeartbeatState};
use tempfile::TempDir;
use tokio::task::JoinHandle;

struct TestDaemon {
    socket: PathBuf,
    snapshot: PathBuf,
    handles: DaemonHandles,
    task: JoinHandle<anyhow::Result<()>>,
    server: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(adjust: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.daemon.data_dir = temp_dir.path().join("data");
        config.daemon.socket_path = Some(temp_dir.path().join("daemon.sock"));
        config.session.fallback_cwd = Some(temp_dir.path().to_path_buf());
        config.session.dry_run_welcome_delay_ms = 20;
        config.session.dry_run_response_min_ms = 20;
        config.session.dry_run_response_max_ms = 40;
        adjust(&mut config);

        let socket = config.socket_path();
        let snapshot = config.snapshot_path();
        let server = IpcServer::bind(&socket).await.unwrap();
        let orchestrator = DaemonOrchestrator::new(config).unwrap();
        let handles = orchestrator.handles();
        let server = tokio::spawn(serve(
            server,
            handles.hub.clone(),
            handles.clients.clone(),
            handles.server_stop.clone(),
        ));
        let task = tokio::spawn(orchestrator.run());

        Self {
            socket,
            snapshot,
            handles,
            task,
            server,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> IpcClient {
        let mut client = IpcClient::connect_with_timeout(&self.socket, Duration::from_secs(5))
            .await
            .unwrap();
        let first = client.next_event().await.unwrap();
        assert!(matches!(first, DaemonEvent::Connected { .. }), "got {:?}", first);
        client
    }

    async fn stop(self) {
        self.handles.shutdown.cancel();
        self.task.await.unwrap().unwrap();
        self.server.await.unwrap();
    }
}

fn spawn_action(pane: &str) -> ClientAction {
    ClientAction::Spawn {
        pane_id: pane.to_string(),
        cwd: None,
        dry_run: true,
        mode: None,
        env: Default::default(),
        cols: None,
        rows: None,
    }
}

fn write_action(pane: &str, data: &str) -> ClientAction {
    ClientAction::Write {
        pane_id: pane.to_string(),
        data: data.to_string(),
    }
}

/// Spawns a dry-run pane and returns `(pid, cwd)`.
async fn spawn(client: &mut IpcClient, pane: &str) -> (u32, String) {
    let pane = pane.to_string();
    client
        .request(&spawn_action(&pane), |event| match event {
            DaemonEvent::Spawned {
                pane_id, pid, cwd, ..
            } if *pane_id == pane => Some((*pid, cwd.clone())),
            _ => None,
        })
        .await
        .unwrap()
}

/// Waits for output of `pane` containing `needle`.
async fn wait_for_output(client: &mut IpcClient, pane: &str, needle: &str) -> String {
    client
        .wait_for(|event| match event {
            DaemonEvent::Data { pane_id, data } if pane_id == pane && data.contains(needle) => {
                Some(data.clone())
            }
            _ => None,
        })
        .await
        .unwrap()
}

// =============================================================================
// Session Tests
// =============================================================================

#[tokio::test]
async fn test_dry_run_spawn_prints_banner_with_cwd() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let (pid, cwd) = spawn(&mut client, "3").await;
    assert!(pid >= 90000);

    let banner = wait_for_output(&mut client, "3", "pane 3").await;
    assert!(banner.contains(&cwd), "banner {:?} should name {}", banner, cwd);

    daemon.stop().await;
}

#[tokio::test]
async fn test_echo_precedes_scripted_response() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;
    spawn(&mut client, "1").await;
    wait_for_output(&mut client, "1", "pane 1").await;

    client.send(&write_action("1", "echo hi")).await.unwrap();
    client.send(&write_action("1", "\r")).await.unwrap();

    let mut outputs = Vec::new();
    client
        .wait_for(|event| match event {
            DaemonEvent::Data { pane_id, data } if pane_id == "1" => {
                outputs.push(data.clone());
                data.contains("[dry-run] received: echo hi").then_some(())
            }
            _ => None,
        })
        .await
        .unwrap();

    assert_eq!(outputs.len(), 3, "outputs: {:?}", outputs);
    assert_eq!(outputs[0], "echo hi");
    assert_eq!(outputs[1], "\r\n");

    daemon.stop().await;
}

#[tokio::test]
async fn test_kill_then_respawn_gets_new_pid() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let (old_pid, _) = spawn(&mut client, "2").await;
    client
        .request(
            &ClientAction::Kill {
                pane_id: "2".to_string(),
            },
            |event| matches!(event, DaemonEvent::Killed { .. }).then_some(()),
        )
        .await
        .unwrap();
    let (new_pid, _) = spawn(&mut client, "2").await;
    assert_ne!(old_pid, new_pid);

    let terminals = client.list().await.unwrap();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].pid, new_pid);

    daemon.stop().await;
}

#[tokio::test]
async fn test_scrollback_keeps_most_recent_bytes() {
    let daemon = TestDaemon::start_with(|config| config.session.scrollback_bytes = 1024).await;
    let mut client = daemon.connect().await;
    spawn(&mut client, "1").await;
    wait_for_output(&mut client, "1", "pane 1").await;

    let mut last = String::new();
    for i in 0..30 {
        last = format!("{:03}{}", i, "x".repeat(97));
        client.send(&write_action("1", &last)).await.unwrap();
    }
    wait_for_output(&mut client, "1", &last).await;

    let scrollback = client
        .request(
            &ClientAction::Attach {
                pane_id: "1".to_string(),
            },
            |event| match event {
                DaemonEvent::Attached { scrollback, .. } => Some(scrollback.clone()),
                _ => None,
            },
        )
        .await
        .unwrap();
    assert!(scrollback.len() <= 1024);
    assert!(scrollback.ends_with(&last));

    daemon.stop().await;
}

#[tokio::test]
async fn test_write_to_missing_pane_is_rejected() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let result = client
        .request(&write_action("7", "hello"), |_| None::<()>)
        .await;
    match result {
        Err(IpcError::Daemon(message)) => assert_eq!(message, "no terminal for pane 7"),
        other => panic!("unexpected: {:?}", other),
    }

    daemon.stop().await;
}

// =============================================================================
// Ghost-input Tests
// =============================================================================

#[tokio::test]
async fn test_duplicate_write_blocked_only_on_same_pane() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;
    spawn(&mut client, "1").await;
    spawn(&mut client, "2").await;

    client.send(&write_action("1", "ABCDE")).await.unwrap();
    client.send(&write_action("1", "ABCDE")).await.unwrap();
    let blocked = client
        .wait_for(|event| match event {
            DaemonEvent::GhostBlocked { pane_id, .. } => Some(pane_id.clone()),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(blocked, "1");

    client.send(&write_action("2", "ABCDE")).await.unwrap();
    wait_for_output(&mut client, "2", "ABCDE").await;

    let stats = client
        .request(&ClientAction::GhostStats, |event| match event {
            DaemonEvent::GhostStats(stats) => Some(stats.clone()),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(stats.blocked, 1);
    assert_eq!(stats.blocked_by_pane.get("1"), Some(&1));
    assert!(!stats.blocked_by_pane.contains_key("2"));

    daemon.stop().await;
}

// =============================================================================
// Kernel Tests
// =============================================================================

#[tokio::test]
async fn test_kernel_sequence_strictly_increases() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;
    spawn(&mut client, "1").await;
    spawn(&mut client, "2").await;
    client.send(&write_action("1", "one")).await.unwrap();
    client.send(&write_action("2", "two")).await.unwrap();
    client
        .send(&ClientAction::Resize {
            pane_id: "1".to_string(),
            cols: 90,
            rows: 20,
        })
        .await
        .unwrap();

    let mut seqs = Vec::new();
    client
        .wait_for(|event| match event {
            DaemonEvent::KernelEvent { event_data } => {
                seqs.push(event_data.seq);
                (event_data.event_type == protocol::KernelEventType::PtyResizeAck).then_some(())
            }
            _ => None,
        })
        .await
        .unwrap();

    assert!(seqs.len() >= 7, "seqs: {:?}", seqs);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs: {:?}", seqs);

    daemon.stop().await;
}

// =============================================================================
// Watchdog Tests
// =============================================================================

#[tokio::test]
async fn test_watchdog_without_status_file_is_active() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    let status = client
        .request(&ClientAction::HeartbeatEnable, |event| match event {
            DaemonEvent::HeartbeatStatus(status) => Some(status.clone()),
            _ => None,
        })
        .await
        .unwrap();
    assert!(status.enabled);
    assert_eq!(status.state, HeartbeatState::Active);

    let health = client.health().await.unwrap();
    assert!(health.watchdog_enabled);
    assert_eq!(health.heartbeat_state, HeartbeatState::Active);

    daemon.stop().await;
}

// =============================================================================
// Protocol Tests
// =============================================================================

#[tokio::test]
async fn test_unknown_action_and_malformed_record_keep_connection() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;

    client.send_raw(b"{\"action\":\"fly\"}\n").await.unwrap();
    let message = client
        .wait_for(|event| match event {
            DaemonEvent::Error { message, .. } => Some(message.clone()),
            _ => None,
        })
        .await
        .unwrap();
    assert!(message.contains("fly"), "message: {}", message);

    client.send_raw(b"not json\n").await.unwrap();
    client
        .wait_for(|event| matches!(event, DaemonEvent::Error { .. }).then_some(()))
        .await
        .unwrap();

    assert!(client.ping().await.is_ok());

    daemon.stop().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let daemon = TestDaemon::start().await;
    let mut first = daemon.connect().await;
    let mut second = daemon.connect().await;

    let (pid, _) = spawn(&mut first, "5").await;
    let seen = second
        .wait_for(|event| match event {
            DaemonEvent::Spawned { pid, .. } => Some(*pid),
            _ => None,
        })
        .await
        .unwrap();
    assert_eq!(seen, pid);

    daemon.stop().await;
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[tokio::test]
async fn test_shutdown_action_saves_and_closes() {
    let daemon = TestDaemon::start().await;
    let mut client = daemon.connect().await;
    spawn(&mut client, "1").await;

    let message = client.shutdown().await.unwrap();
    assert!(message.contains("shutdown"));

    daemon.task.await.unwrap().unwrap();
    daemon.server.await.unwrap();
    assert!(!daemon.socket.exists());

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&daemon.snapshot).unwrap()).unwrap();
    assert_eq!(saved["terminals"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_restart_offers_previous_session() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().to_path_buf();

    let first = TestDaemon::start_with(|config| config.daemon.data_dir = data_dir.clone()).await;
    let mut client = first.connect().await;
    spawn(&mut client, "1").await;
    drop(client);
    first.stop().await;

    let second = TestDaemon::start_with(|config| config.daemon.data_dir = data_dir.clone()).await;
    let mut client = second.connect().await;
    let snapshot = client
        .request(&ClientAction::GetSession, |event| match event {
            DaemonEvent::Session { snapshot } => Some(snapshot.clone()),
            _ => None,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.terminals.len(), 1);
    assert!(client.list().await.unwrap().is_empty());

    second.stop().await;
}
