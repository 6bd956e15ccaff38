//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T], empty_message: &str) {
    if items.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format the time since `started_at`, kubectl style (`45s`, `3m`, `2h`, `5d`)
pub fn format_age(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(started_at) = started_at else {
        return "-".to_string();
    };

    let secs = (now - started_at).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "ready" | "true" | "deployed" => status.green().to_string(),
        "provisioning" | "shutting_down" | "pending" => status.yellow().to_string(),
        "false" | "terminated" | "not deployed" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(None, now), "-");
        assert_eq!(format_age(Some(now - Duration::seconds(42)), now), "42s");
        assert_eq!(format_age(Some(now - Duration::minutes(3)), now), "3m");
        assert_eq!(format_age(Some(now - Duration::hours(5)), now), "5h");
        assert_eq!(format_age(Some(now - Duration::days(2)), now), "2d");
        // Clock skew never yields a negative age
        assert_eq!(format_age(Some(now + Duration::seconds(5)), now), "0s");
    }

    #[test]
    fn test_color_status_keeps_text() {
        colored::control::set_override(false);
        assert_eq!(color_status("ready"), "ready");
        assert_eq!(color_status("terminated"), "terminated");
        assert_eq!(color_status("unknown"), "unknown");
    }
}
