//! Centralized configuration for the node harness.
//!
//! This module provides the constants used when configuring, launching and
//! stopping a daemon node, and when framing IPC messages.

use std::time::Duration;

/// Defaults applied to every new node configuration.
pub struct HarnessConfig;

impl HarnessConfig {
    /// Daemon binary resolved through `PATH` unless overridden.
    pub const DEFAULT_DAEMON_BINARY: &'static str = "dcrd";
    pub const DEFAULT_LISTEN: &'static str = "127.0.0.1:0";
    pub const DEFAULT_RPC_LISTEN: &'static str = "127.0.0.1:0";
    pub const DEFAULT_RPC_USER: &'static str = "user";
    pub const DEFAULT_RPC_PASS: &'static str = "pass";
    pub const DEFAULT_RPC_ENDPOINT: &'static str = "ws";
    pub const DATA_DIR_NAME: &'static str = "data";
    pub const LOGS_DIR_NAME: &'static str = "logs";

    /// How long `stop` waits for the daemon to exit before killing it.
    pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);
}

/// IPC wire format parameters.
pub struct IpcConfig;

impl IpcConfig {
    pub const PROTOCOL_VERSION: u8 = 1;
    pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024; // 64KB
}

/// Self-signed certificate parameters.
pub struct CertConfig;

impl CertConfig {
    pub const ORGANIZATION: &'static str = "nodeharness autogenerated cert";
    pub const VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
    pub const DEFAULT_HOSTS: &'static [&'static str] = &["localhost", "127.0.0.1", "::1"];
    pub const CERT_FILE_MODE: u32 = 0o644;
    pub const KEY_FILE_MODE: u32 = 0o600;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(HarnessConfig::STOP_GRACE_PERIOD > Duration::ZERO);
        assert!(CertConfig::VALIDITY > Duration::from_secs(365 * 24 * 60 * 60));
    }

    #[test]
    fn test_default_listeners_request_ephemeral_ports() {
        assert!(HarnessConfig::DEFAULT_LISTEN.ends_with(":0"));
        assert!(HarnessConfig::DEFAULT_RPC_LISTEN.ends_with(":0"));
    }
}
