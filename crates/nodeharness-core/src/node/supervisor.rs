//! Lifecycle of one supervised daemon process.
//!
//! # State machine
//!
//! ```text
//! Idle ──start──▶ Starting ──addrs──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                    │                                                 ▲
//!                    └──── exec failure / IPC closed / cancelled ──────┘
//! ```
//!
//! While a node runs, three background tasks are alive: one line-reader each
//! for stdout and stderr, and one IPC reader that reports the bound addresses
//! and then drains the event pipe to EOF. `stop` joins all three before
//! returning, and a failed `start` never returns with any of them alive.

use super::config::NodeConfig;
use super::rpc::{BoundAddrs, RpcConnConfig};
use crate::cancel::CancellationToken;
use crate::error::{HarnessError, Result};
use crate::ipc::{next_message, IpcError, IpcEvent};
use crate::log::{self, HarnessLogger, NodeLog};
use crate::platform::process_shim;
use futures::future::join_all;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Where a node is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Constructed, never started.
    Idle,
    /// Process launched, waiting for bound addresses.
    Starting,
    /// Both addresses known.
    Running,
    /// Shutdown requested, draining.
    Stopping,
    /// Process reaped and pipes closed.
    Stopped,
}

/// A supervised daemon process.
pub struct Node {
    config: NodeConfig,
    node_num: u32,
    log: NodeLog,
    state: NodeState,
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
    addrs: Option<BoundAddrs>,
}

impl Node {
    /// Create a node that logs nothing.
    pub fn new(config: NodeConfig, node_num: u32) -> Self {
        Self::with_logger(config, node_num, log::disabled())
    }

    /// Create a node that logs through `logger`, prefixing lines with
    /// `node_num`.
    pub fn with_logger(config: NodeConfig, node_num: u32, logger: Arc<dyn HarnessLogger>) -> Self {
        Self {
            config,
            node_num,
            log: NodeLog::new(node_num, logger),
            state: NodeState::Idle,
            child: None,
            tasks: Vec::new(),
            addrs: None,
        }
    }

    /// Launch the daemon and wait until it reports both bound addresses.
    ///
    /// Returns once the addresses are known, or with an error if the binary
    /// cannot be executed, the daemon closes its event pipe first, the event
    /// stream cannot be decoded, or `ctx` fires first. On error the process has been stopped and every
    /// background task joined.
    pub async fn start(&mut self, ctx: &CancellationToken) -> Result<()> {
        if self.child.is_some() {
            return Err(HarnessError::AlreadyRunning(self.node_num));
        }
        let reader = self.config.events_pipe().take_reader()?;
        self.state = NodeState::Starting;

        let mut cmd = self.config.command();

        // Output readers wait until the process is confirmed running.
        let (stderr_tx, stderr_rx) = oneshot::channel();
        let (stdout_tx, stdout_rx) = oneshot::channel();
        self.tasks.push(tokio::spawn(drain_output(
            self.log.clone(),
            "stderr",
            stderr_rx,
            ctx.clone(),
        )));
        self.tasks.push(tokio::spawn(drain_output(
            self.log.clone(),
            "stdout",
            stdout_rx,
            ctx.clone(),
        )));

        let (addrs_tx, mut addrs_rx) = oneshot::channel();
        self.tasks
            .push(tokio::spawn(read_bound_addrs(self.log.clone(), reader, addrs_tx)));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Dropping the senders releases the output readers; closing
                // the pipes hands the IPC reader its EOF.
                drop(stderr_tx);
                drop(stdout_tx);
                self.close_pipes();
                self.join_tasks().await;
                self.state = NodeState::Stopped;
                return Err(HarnessError::Exec {
                    path: self.config.daemon_path().to_path_buf(),
                    source: e,
                });
            }
        };

        if let Some(stderr) = child.stderr.take() {
            let _ = stderr_tx.send(stderr);
        }
        if let Some(stdout) = child.stdout.take() {
            let _ = stdout_tx.send(stdout);
        }
        for pipe in [self.config.events_pipe(), self.config.shutdown_pipe()] {
            if let Err(e) = pipe.release_child_end() {
                self.log
                    .logf(format_args!("Unable to release child pipe end: {}", e));
            }
        }
        self.log.logf(format_args!(
            "Launched {} (pid {:?}, {} shim)",
            self.config.daemon_path().display(),
            child.id(),
            process_shim().name()
        ));
        self.child = Some(child);

        tokio::select! {
            biased;
            addrs = &mut addrs_rx => match addrs {
                Ok(Ok(addrs)) => {
                    self.addrs = Some(addrs);
                    self.state = NodeState::Running;
                    Ok(())
                }
                Ok(Err(e)) => {
                    if let Err(stop_err) = self.stop().await {
                        self.log.logf(format_args!("Error stopping after IPC failure: {}", stop_err));
                    }
                    Err(HarnessError::Ipc(e))
                }
                Err(_) => {
                    self.log.logf(format_args!("IPC stream closed before addrs were reported"));
                    if let Err(e) = self.stop().await {
                        self.log.logf(format_args!("Error stopping after early exit: {}", e));
                    }
                    Err(HarnessError::IpcStreamClosed)
                }
            },
            reason = ctx.cancelled() => {
                // Clean up what has been done so far.
                if let Err(e) = self.stop().await {
                    self.log.logf(format_args!("Error stopping after context was done: {}", e));
                }
                Err(HarnessError::AddressDiscovery(reason))
            }
        }
    }

    /// Stop the daemon and release everything the node holds.
    ///
    /// Closing the shutdown pipe is the graceful request; if that fails, or
    /// the pipe was already closed, the process is interrupted. A daemon
    /// that outlives the config's grace period is killed. Teardown problems
    /// are logged, not returned, and calling `stop` on a node that is not
    /// running does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        self.log.trace(format_args!("stop {:?}", self.pid()));

        let Some(mut child) = self.child.take() else {
            self.log.trace(format_args!("stop done (not running)"));
            return Ok(());
        };
        self.state = NodeState::Stopping;

        if let Err(e) = self.config.shutdown_pipe().close_local() {
            self.log
                .logf(format_args!("Unable to close shutdown pipe: {}", e));

            // Make a harder attempt at shutdown.
            self.log.trace(format_args!("stop send interrupt"));
            if let Err(e) = process_shim().interrupt(&mut child) {
                self.log.debug(format_args!("stop interrupt error: {}", e));
            }
        }

        self.log.trace(format_args!("stop wait"));
        let grace = self.config.stop_grace_period();
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                self.log.debug(format_args!("stop exit status: {}", status));
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.log.debug(format_args!("stop wait error: {}", e));
            }
            Err(_) => {
                self.log.logf(format_args!(
                    "Process did not exit within {:?}, killing",
                    grace
                ));
                if let Err(e) = child.kill().await {
                    self.log.debug(format_args!("stop kill error: {}", e));
                }
            }
        }

        self.log.trace(format_args!("stop wg"));
        self.join_tasks().await;

        self.close_pipes();

        self.addrs = None;
        self.state = NodeState::Stopped;
        self.log.trace(format_args!("stop done"));
        Ok(())
    }

    /// Terminate the daemon; the teardown entry point for callers.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.log.trace(format_args!("shutdown"));
        let result = self.stop().await;
        if let Err(ref e) = result {
            self.log.debug(format_args!("shutdown stop error: {}", e));
        }
        self.log.trace(format_args!("shutdown done"));
        result
    }

    /// Connection settings for an RPC client talking to this node.
    pub fn rpc_conn_config(&self) -> Result<RpcConnConfig> {
        let addrs = self
            .addrs
            .as_ref()
            .ok_or(HarnessError::NotRunning(self.node_num))?;
        Ok(RpcConnConfig {
            host: addrs.rpc.clone(),
            endpoint: self.config.endpoint().to_string(),
            user: self.config.rpc_user().to_string(),
            pass: self.config.rpc_pass().to_string(),
            certificates: self.config.certificates().to_vec(),
        })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn node_num(&self) -> u32 {
        self.node_num
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// OS process id while the daemon is live.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Whether a daemon process is currently held by this node.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn bound_addrs(&self) -> Option<&BoundAddrs> {
        self.addrs.as_ref()
    }

    pub fn p2p_addr(&self) -> Option<&str> {
        self.addrs.as_ref().map(|a| a.p2p.as_str())
    }

    pub fn rpc_addr(&self) -> Option<&str> {
        self.addrs.as_ref().map(|a| a.rpc.as_str())
    }

    fn close_pipes(&self) {
        for pipe in [self.config.events_pipe(), self.config.shutdown_pipe()] {
            if let Err(e) = pipe.close() {
                self.log.logf(format_args!("Unable to close IPC pipe: {}", e));
            }
        }
    }

    async fn join_tasks(&mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for result in join_all(tasks).await {
            if let Err(e) = result {
                self.log
                    .debug(format_args!("background task failed: {}", e));
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            self.log
                .logf(format_args!("Dropped while running, killing process"));
            let _ = child.start_kill();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Forward a child's output stream to the log, one line at a time.
///
/// Exits without reading if `ctx` fires before the stream arrives, or if
/// the sender is dropped because the process never ran.
async fn drain_output<R>(
    log: NodeLog,
    name: &'static str,
    stream: oneshot::Receiver<R>,
    ctx: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stream = tokio::select! {
        biased;
        stream = stream => match stream {
            Ok(stream) => stream,
            Err(_) => return,
        },
        _ = ctx.cancelled() => return,
    };

    log.logf(format_args!("Reading {}", name));
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                log.logf(format_args!("{}: EOF", name));
                return;
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                log.logf(format_args!("{}: {}", name, text.trim_end()));
            }
            Err(e) => {
                log.logf(format_args!("{}: Unable to read {}: {}", name, name, e));
                return;
            }
        }
    }
}

/// Read events until both addresses are known, report them, then drain the
/// pipe to EOF.
async fn read_bound_addrs(
    log: NodeLog,
    mut reader: pipe::Receiver,
    ready: oneshot::Sender<std::result::Result<BoundAddrs, IpcError>>,
) {
    log.logf(format_args!("Reading IPC messages."));

    let mut p2p: Option<String> = None;
    let mut rpc: Option<String> = None;
    let addrs = loop {
        match next_message(&mut reader).await {
            Ok(IpcEvent::P2pListenAddr(addr)) if !addr.is_empty() => {
                log.logf(format_args!("P2P listen addr: {}", addr));
                p2p = Some(addr);
            }
            Ok(IpcEvent::RpcListenAddr(addr)) if !addr.is_empty() => {
                log.logf(format_args!("RPC listen addr: {}", addr));
                rpc = Some(addr);
            }
            Ok(event) => {
                log.logf(format_args!("Ignoring IPC message: {:?}", event));
            }
            Err(e) if e.is_recoverable() => {
                log.logf(format_args!("Skipping IPC message: {}", e));
            }
            Err(e) if e.is_eof() => {
                log.logf(format_args!("IPC stream closed before addrs were complete"));
                return;
            }
            Err(e) => {
                log.logf(format_args!("Unable to read next IPC message: {}", e));
                let _ = ready.send(Err(e));
                return;
            }
        }
        if let (Some(p2p), Some(rpc)) = (&p2p, &rpc) {
            break BoundAddrs {
                p2p: p2p.clone(),
                rpc: rpc.clone(),
            };
        }
    };

    if ready.send(Ok(addrs)).is_err() {
        log.logf(format_args!("Start abandoned before addrs were consumed"));
    }

    // Keep reading until the pipe closes so that stop has a terminal
    // condition to join on.
    loop {
        match next_message(&mut reader).await {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {}
            Err(e) if e.is_eof() => break,
            Err(e) => {
                // The stream is out of sync; later writes by the daemon fail.
                log.logf(format_args!("Abandoning IPC stream: {}", e));
                break;
            }
        }
    }
    log.logf(format_args!("IPC messages drained"));
}
