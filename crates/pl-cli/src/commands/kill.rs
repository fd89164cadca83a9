//! Kill command implementation

use anyhow::Result;

use crate::control::ControlClient;
use crate::output::{print_error, print_success, print_warning};

/// Tear down one or more sessions by pair id
pub async fn kill_command(client: &ControlClient, sessions: &[String], force: bool) -> Result<()> {
    if sessions.is_empty() {
        print_error("No sessions specified");
        return Ok(());
    }

    if !force && sessions.len() > 1 {
        print_warning(&format!(
            "About to kill {} sessions. Use --force to skip confirmation.",
            sessions.len()
        ));

        print!("Continue? [y/N] ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            print_warning("Aborted");
            return Ok(());
        }
    }

    let mut failures = 0;
    for pair_id in sessions {
        match client.kill(pair_id).await {
            Ok(()) => print_success(&format!("Killed session: {}", pair_id)),
            Err(e) => {
                print_error(&format!("Failed to kill session {}: {}", pair_id, e));
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("Failed to kill {} session(s)", failures);
    }
    Ok(())
}
