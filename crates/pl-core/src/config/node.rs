//! Node daemon configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the node daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identity of this node on the peer network
    pub node_id: String,

    /// Loopback port of the control-plane listener
    pub control_port: u16,

    /// Port the peer transport listens on
    pub peer_port: u16,

    /// Loopback port of the local shell service (sshd)
    pub shell_port: u16,

    /// Peer name -> dialable address
    #[serde(default)]
    pub peers: HashMap<String, String>,

    /// Timeout applied to peer and local-service dials
    #[serde(with = "secs_serde")]
    pub connect_timeout: Duration,

    /// Allow connecting to a host whose recorded key changed.
    ///
    /// Off by default: a changed key fails verification unless this is
    /// explicitly enabled, in which case it is logged and allowed.
    pub accept_changed_host_keys: bool,

    /// Path of the host-key trust store
    pub known_hosts_path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            control_port: 2224,
            peer_port: 2225,
            shell_port: 22,
            peers: HashMap::new(),
            connect_timeout: Duration::from_secs(10),
            accept_changed_host_keys: false,
            known_hosts_path: super::default_known_hosts_path(),
        }
    }
}

impl NodeConfig {
    /// Loopback address of the control-plane listener
    pub fn control_address(&self) -> String {
        format!("127.0.0.1:{}", self.control_port)
    }

    /// Bind address of the peer transport listener
    pub fn peer_bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.peer_port)
    }

    /// Loopback address of the local shell service
    pub fn shell_address(&self) -> String {
        format!("127.0.0.1:{}", self.shell_port)
    }
}

// Helper module for Duration serialization as whole seconds
mod secs_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_addresses() {
        let config = NodeConfig::default();
        assert_eq!(config.control_address(), "127.0.0.1:2224");
        assert_eq!(config.peer_bind_address(), "0.0.0.0:2225");
        assert_eq!(config.shell_address(), "127.0.0.1:22");
        assert!(!config.accept_changed_host_keys);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = NodeConfig::default();
        config
            .peers
            .insert("workstation".to_string(), "10.0.0.7:2225".to_string());
        config.connect_timeout = Duration::from_secs(3);

        let text = toml::to_string_pretty(&config).unwrap();
        let back: NodeConfig = toml::from_str(&text).unwrap();

        assert_eq!(back.node_id, config.node_id);
        assert_eq!(back.connect_timeout, Duration::from_secs(3));
        assert_eq!(
            back.peers.get("workstation").map(String::as_str),
            Some("10.0.0.7:2225")
        );
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: NodeConfig = toml::from_str("control_port = 9000\n").unwrap();
        assert_eq!(config.control_port, 9000);
        assert_eq!(config.peer_port, 2225);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}
