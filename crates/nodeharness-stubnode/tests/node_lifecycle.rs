//! End-to-end tests driving the stub daemon through the harness.
//!
//! Each test launches the `stubnode` binary built alongside this crate,
//! waits for its bound addresses over the IPC pipe and tears it down.

use nodeharness::{
    generate_cert_pair, CancellationToken, HarnessError, HarnessLogger, Node, NodeConfig,
    NodeState,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Locate the stub daemon binary.
fn stubnode_binary() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_stubnode") {
        return PathBuf::from(path);
    }
    // Fall back to target/<profile>/stubnode next to the test executable.
    let current_exe = std::env::current_exe().expect("failed to resolve current_exe");
    let target_dir = current_exe
        .parent()
        .and_then(|p| p.parent())
        .expect("failed to resolve target directory");
    target_dir.join("stubnode")
}

/// Temp directory holding a freshly generated certificate pair.
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        generate_cert_pair(&dir.path().join("rpc.cert"), &dir.path().join("rpc.key"))
            .expect("Failed to generate certificate");
        Self { dir }
    }

    fn config(&self, extra: &[&str]) -> NodeConfig {
        NodeConfig::new(
            self.dir.path(),
            self.dir.path().join("rpc.cert"),
            self.dir.path().join("rpc.key"),
            extra.iter().map(|s| s.to_string()).collect(),
        )
        .expect("Failed to build node config")
        .with_daemon_path(stubnode_binary())
    }
}

#[derive(Default)]
struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl RecordingLogger {
    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl HarnessLogger for RecordingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().unwrap().push(args.to_string());
    }

    fn trace(&self, args: fmt::Arguments<'_>) {
        self.lines.lock().unwrap().push(args.to_string());
    }
}

fn alive_tasks() -> usize {
    tokio::runtime::Handle::current()
        .metrics()
        .num_alive_tasks()
}

#[tokio::test]
async fn test_start_reports_bound_addresses() {
    let env = TestEnv::new();
    let mut node = Node::new(env.config(&["--simnet"]), 0);

    node.start(&CancellationToken::with_timeout(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(node.state(), NodeState::Running);

    let p2p: std::net::SocketAddr = node.p2p_addr().unwrap().parse().unwrap();
    let rpc: std::net::SocketAddr = node.rpc_addr().unwrap().parse().unwrap();
    assert!(p2p.ip().is_loopback());
    assert!(rpc.ip().is_loopback());
    assert_ne!(p2p.port(), 0);
    assert_ne!(rpc.port(), 0);
    assert_ne!(p2p, rpc);

    // The daemon is really listening where it said it is.
    tokio::net::TcpStream::connect(rpc).await.unwrap();

    let conn = node.rpc_conn_config().unwrap();
    assert_eq!(conn.host, rpc.to_string());
    assert_eq!(conn.endpoint, "ws");
    assert_eq!(conn.user, "user");
    assert_eq!(conn.pass, "pass");
    assert!(conn.certificates.starts_with(b"-----BEGIN CERTIFICATE-----"));

    assert!(env.dir.path().join("data").is_dir());
    assert!(env.dir.path().join("logs").is_dir());

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_clears_state() {
    let env = TestEnv::new();
    let mut node = Node::new(env.config(&[]), 1);

    node.start(&CancellationToken::with_timeout(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(node.pid().is_some());

    let started = std::time::Instant::now();
    node.stop().await.unwrap();
    // Graceful shutdown, well inside the kill grace period.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(node.pid().is_none());
    assert!(node.bound_addrs().is_none());
    assert!(matches!(
        node.rpc_conn_config(),
        Err(HarnessError::NotRunning(1))
    ));

    node.stop().await.unwrap();
    node.shutdown().await.unwrap();
    assert_eq!(node.state(), NodeState::Stopped);
}

#[tokio::test]
async fn test_failed_start_returns_promptly_without_leaks() {
    let env = TestEnv::new();
    let mut node = Node::new(env.config(&["--miningaddr=this-is-an-invalid-addr"]), 2);

    let before = alive_tasks();
    let started = std::time::Instant::now();
    let result = node
        .start(&CancellationToken::with_timeout(Duration::from_secs(3)))
        .await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(alive_tasks(), before);
    assert_eq!(node.state(), NodeState::Stopped);
}

#[tokio::test]
async fn test_missing_binary_is_exec_error() {
    let env = TestEnv::new();
    let config = env
        .config(&[])
        .with_daemon_path(env.dir.path().join("does-not-exist"));
    let mut node = Node::new(config, 3);

    let before = alive_tasks();
    let err = node
        .start(&CancellationToken::with_timeout(Duration::from_secs(3)))
        .await
        .unwrap_err();

    assert!(err.is_exec_failure(), "unexpected error: {}", err);
    assert_eq!(alive_tasks(), before);
}

#[tokio::test]
async fn test_cancellation_while_waiting_for_addresses() {
    let env = TestEnv::new();
    let mut node = Node::new(env.config(&["--startdelay=60000"]), 4);

    let before = alive_tasks();
    let started = std::time::Instant::now();
    let err = node
        .start(&CancellationToken::with_timeout(Duration::from_millis(500)))
        .await
        .unwrap_err();

    assert!(err.is_cancellation(), "unexpected error: {}", err);
    assert!(err.to_string().starts_with("Context done while waiting for addrs"));
    // The delayed daemon honours the shutdown pipe instead of being killed.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(alive_tasks(), before);
    assert!(node.pid().is_none());
}

#[tokio::test]
async fn test_explicit_cancel_aborts_start() {
    let env = TestEnv::new();
    let mut node = Node::new(env.config(&["--startdelay=60000"]), 5);
    let ctx = CancellationToken::new();

    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ctx.cancel();
        })
    };

    let err = node.start(&ctx).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, HarnessError::AddressDiscovery(_)));
    assert_eq!(node.state(), NodeState::Stopped);
}

#[tokio::test]
async fn test_child_output_is_logged_with_node_prefix() {
    let env = TestEnv::new();
    let logger = Arc::new(RecordingLogger::default());
    let mut node = Node::with_logger(env.config(&[]), 1, logger.clone());

    node.start(&CancellationToken::with_timeout(Duration::from_secs(30)))
        .await
        .unwrap();
    node.stop().await.unwrap();

    let lines = logger.lines();
    assert!(
        lines
            .iter()
            .any(|l| l.starts_with("001 stdout: RPC server listening on")),
        "missing stdout lines in {:?}",
        lines
    );
    assert!(lines.iter().any(|l| l.starts_with("001 P2P listen addr:")));
    assert!(lines.iter().any(|l| l == "001 IPC messages drained"));
}

#[tokio::test]
async fn test_two_nodes_bind_distinct_addresses() {
    let env_a = TestEnv::new();
    let env_b = TestEnv::new();
    let mut a = Node::new(env_a.config(&[]), 10);
    let mut b = Node::new(env_b.config(&[]), 11);
    let ctx = CancellationToken::with_timeout(Duration::from_secs(30));

    a.start(&ctx).await.unwrap();
    b.start(&ctx).await.unwrap();

    assert_ne!(a.rpc_addr(), b.rpc_addr());
    assert_ne!(a.p2p_addr(), b.p2p_addr());

    b.stop().await.unwrap();
    a.stop().await.unwrap();
}
