//! Status command implementation

use anyhow::Result;

use pl_core::config::NodeConfig;

use crate::control::ControlClient;
use crate::output::{format_sessions, print_error, print_success};

/// Show whether the node is up and what it is carrying
pub async fn status_command(client: &ControlClient, config: &NodeConfig) -> Result<()> {
    let sessions = match client.sessions().await {
        Ok(sessions) => sessions,
        Err(e) => {
            print_error(&format!("Node is not reachable: {}", e));
            print_error("Is the node running? Try: peerlink serve");
            return Err(e);
        }
    };

    print_success(&format!(
        "Node running at {} ({} active session{})",
        config.control_address(),
        sessions.len(),
        if sessions.len() == 1 { "" } else { "s" }
    ));
    if !sessions.is_empty() {
        println!("{}", format_sessions(&sessions));
    }
    Ok(())
}
