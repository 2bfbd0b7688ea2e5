//! Everything needed to launch one daemon process.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::ipc::{IpcPipePair, PipeRole};
use crate::platform::{process_shim, ChildPipes};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Arguments, paths, credentials and IPC pipes for one daemon node.
///
/// Built once per node and not mutated after the node starts. The pipe
/// pairs it owns are consumed by the node's stop sequence, so a config
/// cannot be reused for a second launch.
#[derive(Debug)]
pub struct NodeConfig {
    rpc_user: String,
    rpc_pass: String,
    listen: String,
    rpc_listen: String,
    rpc_connect: Option<String>,
    data_dir: PathBuf,
    log_dir: PathBuf,
    profile: Option<String>,
    debug_level: Option<String>,
    extra: Vec<String>,
    prefix: PathBuf,

    daemon_path: PathBuf,
    endpoint: String,
    cert_file: PathBuf,
    key_file: PathBuf,
    certificates: Vec<u8>,
    stop_grace_period: Duration,

    /// Pipe the daemon writes bound-address events to (`--pipetx`).
    events_pipe: IpcPipePair,
    /// Pipe the daemon watches for EOF (`--piperx`).
    shutdown_pipe: IpcPipePair,
    child_pipes: ChildPipes,
}

impl NodeConfig {
    /// Create a config with default values rooted at `prefix`.
    ///
    /// Allocates both IPC pipes and reads the certificate eagerly; fails if
    /// either step fails.
    pub fn new(
        prefix: impl AsRef<Path>,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
        extra: Vec<String>,
    ) -> Result<Self> {
        let events_pipe = IpcPipePair::new(PipeRole::Receive)?;
        let shutdown_pipe = IpcPipePair::new(PipeRole::Transmit)?;
        let child_pipes = ChildPipes {
            shutdown_fd: shutdown_pipe.child_fd(),
            events_fd: events_pipe.child_fd(),
        };

        let prefix = prefix.as_ref().to_path_buf();
        let cert_file = cert_file.as_ref().to_path_buf();
        let certificates =
            fs::read(&cert_file).map_err(|e| HarnessError::io_with_path(e, &cert_file))?;

        Ok(Self {
            rpc_user: HarnessConfig::DEFAULT_RPC_USER.to_string(),
            rpc_pass: HarnessConfig::DEFAULT_RPC_PASS.to_string(),
            listen: HarnessConfig::DEFAULT_LISTEN.to_string(),
            rpc_listen: HarnessConfig::DEFAULT_RPC_LISTEN.to_string(),
            rpc_connect: None,
            data_dir: prefix.join(HarnessConfig::DATA_DIR_NAME),
            log_dir: prefix.join(HarnessConfig::LOGS_DIR_NAME),
            profile: None,
            debug_level: None,
            extra,
            prefix,
            daemon_path: PathBuf::from(HarnessConfig::DEFAULT_DAEMON_BINARY),
            endpoint: HarnessConfig::DEFAULT_RPC_ENDPOINT.to_string(),
            cert_file,
            key_file: key_file.as_ref().to_path_buf(),
            certificates,
            stop_grace_period: HarnessConfig::STOP_GRACE_PERIOD,
            events_pipe,
            shutdown_pipe,
            child_pipes,
        })
    }

    /// Set the daemon binary to launch.
    pub fn with_daemon_path(mut self, path: impl AsRef<Path>) -> Self {
        self.daemon_path = path.as_ref().to_path_buf();
        self
    }

    /// Set the RPC credentials.
    pub fn with_rpc_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.rpc_user = user.into();
        self.rpc_pass = pass.into();
        self
    }

    /// Set the P2P listen address. An empty string omits the flag.
    pub fn with_listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    /// Set the RPC listen address. An empty string omits the flag.
    pub fn with_rpc_listen(mut self, addr: impl Into<String>) -> Self {
        self.rpc_listen = addr.into();
        self
    }

    /// Set the address the daemon's own RPC client connects to.
    pub fn with_rpc_connect(mut self, addr: impl Into<String>) -> Self {
        self.rpc_connect = Some(addr.into());
        self
    }

    /// Enable the daemon's HTTP profiling server on the given port.
    pub fn with_profile(mut self, port: impl Into<String>) -> Self {
        self.profile = Some(port.into());
        self
    }

    /// Set the daemon's log level.
    pub fn with_debug_level(mut self, level: impl Into<String>) -> Self {
        self.debug_level = Some(level.into());
        self
    }

    /// Set the RPC endpoint name handed to clients.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set how long `stop` waits for the daemon before killing it.
    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }

    /// Render the daemon's command line.
    ///
    /// The order is stable. Caller-supplied extra arguments come last so
    /// they can override earlier flags where the daemon's parser lets the
    /// last occurrence win.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.rpc_user.is_empty() {
            args.push(format!("--rpcuser={}", self.rpc_user));
        }
        if !self.rpc_pass.is_empty() {
            args.push(format!("--rpcpass={}", self.rpc_pass));
        }
        if !self.listen.is_empty() {
            args.push(format!("--listen={}", self.listen));
        }
        if !self.rpc_listen.is_empty() {
            args.push(format!("--rpclisten={}", self.rpc_listen));
        }
        if let Some(ref connect) = self.rpc_connect {
            args.push(format!("--rpcconnect={}", connect));
        }
        args.push(format!("--rpccert={}", self.cert_file.display()));
        args.push(format!("--rpckey={}", self.key_file.display()));
        args.push("--txindex".to_string());
        args.push(format!("--datadir={}", self.data_dir.display()));
        args.push(format!("--logdir={}", self.log_dir.display()));
        if let Some(ref profile) = self.profile {
            args.push(format!("--profile={}", profile));
        }
        if let Some(ref level) = self.debug_level {
            args.push(format!("--debuglevel={}", level));
        }
        args.push("--allowunsyncedmining".to_string());

        process_shim().append_ipc_args(&self.child_pipes, &mut args);
        args.push("--boundaddrevents".to_string());

        args.extend(self.extra.iter().cloned());
        args
    }

    /// Build the command that launches the daemon.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.daemon_path);
        cmd.args(self.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process_shim().configure_command(&mut cmd, &self.child_pipes);
        cmd
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn daemon_path(&self) -> &Path {
        &self.daemon_path
    }

    pub fn rpc_user(&self) -> &str {
        &self.rpc_user
    }

    pub fn rpc_pass(&self) -> &str {
        &self.rpc_pass
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cert_file(&self) -> &Path {
        &self.cert_file
    }

    pub fn key_file(&self) -> &Path {
        &self.key_file
    }

    /// The certificate bytes read at construction.
    pub fn certificates(&self) -> &[u8] {
        &self.certificates
    }

    pub fn stop_grace_period(&self) -> Duration {
        self.stop_grace_period
    }

    pub(crate) fn events_pipe(&self) -> &IpcPipePair {
        &self.events_pipe
    }

    pub(crate) fn shutdown_pipe(&self) -> &IpcPipePair {
        &self.shutdown_pipe
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix.display())
    }
}
