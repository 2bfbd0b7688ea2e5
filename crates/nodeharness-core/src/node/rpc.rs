//! Descriptors handed to RPC clients once a node is up.

use serde::{Deserialize, Serialize};

/// The listener addresses a daemon reported after binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundAddrs {
    /// Peer-to-peer listener, `host:port`.
    pub p2p: String,
    /// RPC listener, `host:port`.
    pub rpc: String,
}

/// Connection settings for an RPC client talking to a running node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConnConfig {
    pub host: String,
    pub endpoint: String,
    pub user: String,
    pub pass: String,
    /// PEM certificate the client should trust.
    pub certificates: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_config_serializes_field_names() {
        let conn = RpcConnConfig {
            host: "127.0.0.1:19556".into(),
            endpoint: "ws".into(),
            user: "user".into(),
            pass: "pass".into(),
            certificates: b"PEM".to_vec(),
        };
        let json = serde_json::to_value(&conn).unwrap();

        assert_eq!(json["host"], "127.0.0.1:19556");
        assert_eq!(json["endpoint"], "ws");
        assert_eq!(json["certificates"], serde_json::json!([80, 69, 77]));
    }
}
