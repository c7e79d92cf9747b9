use std::path::Path;

use anyhow::Context;
use droidemu::emulation::{EmulationConfig, Session, SessionBuilder};

/// Load and link a library without running its initializers.
pub fn load_session(path: &Path) -> anyhow::Result<Session> {
    SessionBuilder::new()
        .library_file(path)
        .config(EmulationConfig::token())
        .without_initialize()
        .build()
        .with_context(|| format!("failed to load library: {}", path.display()))
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

/// Shorten long identifiers for log lines.
pub fn abbreviate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
