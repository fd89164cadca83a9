//! List command implementation

use anyhow::Result;

use crate::control::ControlClient;
use crate::output::{format_sessions, print_error};

/// List open sessions on the local node, or one session by pair id
pub async fn list_command(client: &ControlClient, pair_id: Option<&str>) -> Result<()> {
    let sessions = match pair_id {
        Some(pair_id) => match client.session(pair_id).await {
            Ok(session) => vec![session],
            Err(e) => {
                print_error(&format!("Failed to query session {}: {}", pair_id, e));
                return Err(e);
            }
        },
        None => match client.sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                print_error(&format!("Failed to list sessions: {}", e));
                return Err(e);
            }
        },
    };

    println!("Active Sessions:");
    println!("{}", format_sessions(&sessions));
    Ok(())
}
