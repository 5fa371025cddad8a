//! JSON output for status reports.

use warmpool::control::StatusReport;

/// The report exactly as it travels in STATUS_REPLY.
pub fn render_status(report: &StatusReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}

pub fn print_status(report: &StatusReport) {
    println!("{}", render_status(report));
}
