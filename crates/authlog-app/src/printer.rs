//! Terminal rendering of log entries.

use authlog_core::LogEntry;
use chrono::Local;

/// Formats an entry as a summary line, with tag and error lines when set.
pub fn format_entry(entry: &LogEntry) -> String {
    let status = entry
        .status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    let mut out = format!(
        "{} {:<6} {:<4} {}",
        entry.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        entry.method,
        status,
        entry.url
    );

    if !entry.tags.is_empty() {
        out.push_str(&format!("\n  Tags: {}", entry.tags.join(", ")));
    }
    if let Some(error) = &entry.error {
        out.push_str(&format!("\n  Error: {}", error));
    }
    if let Some(ms) = entry.duration_ms {
        out.push_str(&format!("\n  Duration: {}ms", ms));
    }

    out
}
