//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table of rows
pub fn print_table<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Render an RFC 3339 timestamp as `YYYY-MM-DD HH:MM UTC`; unparsable input is shown as is
pub fn format_timestamp(ts: &str) -> String {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc).format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|_| ts.to_string())
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "running" | "connected" => status.green().to_string(),
        "degraded" | "starting" | "restarting" | "connecting" => status.yellow().to_string(),
        "unhealthy" | "stopped" | "disconnected" => status.red().to_string(),
        "stopping" => status.blue().to_string(),
        _ => status.to_string(),
    }
}

/// Color an alert score; notifying alerts are red
pub fn color_score(score: f64, notify: bool) -> String {
    let formatted = format!("{:.2}%", score);
    if notify {
        formatted.red().bold().to_string()
    } else {
        formatted.yellow().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp("2023-11-14T22:40:00+00:00"), "2023-11-14 22:40 UTC");
        assert_eq!(format_timestamp("2023-11-14T23:40:00+01:00"), "2023-11-14 22:40 UTC");
        assert_eq!(format_timestamp("yesterday"), "yesterday");
    }

    #[test]
    fn test_color_status_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_status("running"), "running");
        assert_eq!(color_score(50.0, true), "50.00%");
    }
}
