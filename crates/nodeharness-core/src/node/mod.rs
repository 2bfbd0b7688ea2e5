//! Daemon nodes: launch configuration, supervision, and client descriptors.

mod config;
mod rpc;
mod supervisor;

pub use config::NodeConfig;
pub use rpc::{BoundAddrs, RpcConnConfig};
pub use supervisor::{Node, NodeState};
