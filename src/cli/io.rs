//! Stdin handling for the CLI.

use serde_json::Value;
use std::io::{IsTerminal, Read};

/// Read YAML from stdin until EOF.
///
/// Reads only when the terminal-ness of stdin matches `ask_tty`: piped
/// input is consumed eagerly, the interactive prompt only fires on a real
/// TTY. Returns `None` when stdin is on the wrong side of that line.
pub fn read_stdin(message: Option<&str>, ask_tty: bool) -> anyhow::Result<Option<Value>> {
    if std::io::stdin().is_terminal() != ask_tty {
        return Ok(None);
    }
    if let (Some(msg), true) = (message, ask_tty) {
        eprintln!("{msg}");
    }
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    if input.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_yaml::from_str(&input)?;
    Ok(Some(value))
}
