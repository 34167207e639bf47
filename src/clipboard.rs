use anyhow::{Context, Result};

use crate::output::sanitize_text;

/// Copies a command's output to the system clipboard, ANSI codes removed.
pub fn copy_lines(lines: &[String]) -> Result<usize> {
    let text = lines
        .iter()
        .map(|line| sanitize_text(line, true))
        .collect::<Vec<_>>()
        .join("\n");
    let mut clipboard = arboard::Clipboard::new().context("failed to access clipboard")?;
    clipboard
        .set_text(text)
        .context("failed to set clipboard text")?;
    Ok(lines.len())
}
