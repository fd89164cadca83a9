//! Connect command implementation

use std::path::PathBuf;

use anyhow::Result;

use pl_core::config::NodeConfig;
use pl_node::variant::{ShellVariant, Variant, VariantContext};

use crate::output::{print_error, print_info, print_success};

/// Open an interactive shell on a remote peer (or install the local key
/// with `--copy-id`).
pub async fn connect_command(
    config: &NodeConfig,
    target: &str,
    key: Option<PathBuf>,
    copy_id: bool,
) -> Result<()> {
    let mut shell = ShellVariant::new(target);
    shell.set_key_path(key);
    shell.set_copy_id(copy_id);

    let mut variant = Variant::Shell(shell);
    variant.init(&VariantContext::from_config(config));
    variant.prepare()?;

    print_info(&format!("Connecting to {}...", target));

    if let Err(e) = variant.dial().await {
        print_error(&format!("Connection failed: {}", e));
        return Err(e.into());
    }

    if copy_id {
        print_success(&format!("Key installed on {}", target));
    } else {
        print_success("Connection closed");
    }
    Ok(())
}
