//! Output formatting utilities for the CLI

use tabled::{settings::Style, Table, Tabled};

use pl_core::SessionStatus;
use pl_protocol::ProtocolCode;

/// Format a list of sessions as an ASCII table
pub fn format_sessions(sessions: &[SessionStatus]) -> String {
    if sessions.is_empty() {
        return "No active sessions".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "PAIR ID")]
        pair_id: String,
        #[tabled(rename = "KIND")]
        kind: String,
        #[tabled(rename = "DIRECTION")]
        direction: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "READY")]
        ready: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            pair_id: s.pair_id.clone(),
            kind: ProtocolCode::from_u16(s.protocol)
                .map(|code| code.to_string())
                .unwrap_or_else(|| format!("unknown ({:#x})", s.protocol)),
            direction: s.direction.to_string(),
            target: if s.target.is_empty() {
                "-".to_string()
            } else {
                s.target.clone()
            },
            ready: if s.ready { "yes" } else { "no" }.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
