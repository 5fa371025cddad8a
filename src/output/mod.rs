//! Rendering of status reports and settings for the CLI.

pub mod json;
pub mod plain;
pub mod table;

use warmpool::control::StatusReport;

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Colored table output (default).
    #[default]
    Table,
    /// The STATUS_REPLY payload as pretty JSON.
    Json,
    /// Tab-separated text, no colors.
    Plain,
}

/// Table display options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Use ASCII borders instead of Unicode.
    pub ascii: bool,
}

/// Format and print a status report.
pub fn print_status(report: &StatusReport, format: OutputFormat, options: TableOptions) {
    match format {
        OutputFormat::Table => table::print_status(report, options),
        OutputFormat::Json => json::print_status(report),
        OutputFormat::Plain => plain::print_status(report),
    }
}

/// `3725` -> `1h 02m`, `75` -> `1m 15s`, `9` -> `9s`.
pub fn format_age(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(0), "0s");
        assert_eq!(format_age(9), "9s");
        assert_eq!(format_age(75), "1m 15s");
        assert_eq!(format_age(3725), "1h 02m");
    }
}
