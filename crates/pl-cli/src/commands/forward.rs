//! Forward command implementation

use anyhow::Result;

use pl_core::config::NodeConfig;
use pl_core::HostId;
use pl_node::variant::{PortForwardVariant, Variant, VariantContext};

use crate::control::ControlClient;
use crate::output::{print_error, print_info, print_success};

/// Start a port forward: listen locally, tunnel each connection to
/// `target:remote_port`. Runs until torn down.
pub async fn forward_start(
    config: &NodeConfig,
    local_port: u16,
    remote_port: u16,
    target: &str,
) -> Result<()> {
    let mut variant = Variant::PortForward(PortForwardVariant::new(
        HostId::new(target),
        local_port,
        remote_port,
    ));
    variant.init(&VariantContext::from_config(config));
    variant.prepare()?;

    print_info(&format!(
        "Forwarding 127.0.0.1:{} -> {}:{} (Ctrl+C to stop; `peerlink list` shows the pair id)",
        local_port, target, remote_port
    ));

    if let Err(e) = variant.dial().await {
        print_error(&format!("Forward failed: {}", e));
        return Err(e.into());
    }

    print_success("Forward closed");
    Ok(())
}

/// Stop a running port forward by pair id
pub async fn forward_stop(config: &NodeConfig, pair_id: &str) -> Result<()> {
    let client = ControlClient::new(config.clone());
    client.kill(pair_id).await?;
    print_success(&format!("Stopped forward {}", pair_id));
    Ok(())
}
