//! Node Harness - run a blockchain daemon as a test fixture.
//!
//! This crate launches a daemon binary with a generated command line,
//! learns the P2P and RPC addresses it actually bound by reading framed
//! events from an inherited pipe, and tears it down cleanly by closing a
//! second pipe the daemon watches for EOF.
//!
//! # Example
//!
//! ```rust,ignore
//! use nodeharness::{generate_cert_pair, CancellationToken, Node, NodeConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> nodeharness::Result<()> {
//!     let dir = tempfile::tempdir()?;
//!     let cert = dir.path().join("rpc.cert");
//!     let key = dir.path().join("rpc.key");
//!     generate_cert_pair(&cert, &key)?;
//!
//!     let config = NodeConfig::new(dir.path(), &cert, &key, vec!["--simnet".into()])?;
//!     let mut node = Node::new(config, 0);
//!
//!     node.start(&CancellationToken::with_timeout(Duration::from_secs(30))).await?;
//!     println!("RPC listening on {}", node.rpc_conn_config()?.host);
//!
//!     node.stop().await
//! }
//! ```

#[cfg(not(unix))]
compile_error!("nodeharness passes IPC pipes as inherited file descriptors and supports Unix only");

pub mod cancel;
pub mod certgen;
pub mod config;
pub mod error;
pub mod ipc;
pub mod log;
pub mod node;
pub mod platform;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError};
pub use certgen::{generate_cert_pair, new_tls_cert_pair, CertPair};
pub use error::{HarnessError, Result};
pub use ipc::{IpcError, IpcEvent, LifetimePhase};
pub use log::{DisabledLogger, HarnessLogger, TracingLogger};
pub use node::{BoundAddrs, Node, NodeConfig, NodeState, RpcConnConfig};
