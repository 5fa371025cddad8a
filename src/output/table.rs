//! Colored table output.

use comfy_table::{
    Cell, ContentArrangement, Table,
    presets::{ASCII_FULL, UTF8_FULL},
};
use warmpool::control::StatusReport;

use crate::output::{TableOptions, format_age};
use crate::theme::{Semantic, Themed, ThemedCell};

fn new_table(options: TableOptions) -> Table {
    let mut table = Table::new();
    if options.ascii {
        table.load_preset(ASCII_FULL);
    } else {
        table.load_preset(UTF8_FULL);
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn status_table(report: &StatusReport, options: TableOptions) -> Table {
    let mut table = new_table(options);
    table.set_header(vec!["ID", "PID", "State", "Requests", "Age"]);

    for worker in &report.workers {
        let pid = match worker.pid {
            Some(pid) => Cell::new(pid).themed(Semantic::Count),
            None => Cell::new("-").themed(Semantic::Muted),
        };
        table.add_row(vec![
            Cell::new(worker.id),
            pid,
            Cell::new(worker.state).themed(Semantic::for_state(worker.state)),
            Cell::new(worker.requests_served),
            Cell::new(format_age(worker.age_seconds)),
        ]);
    }
    table
}

/// Print the summary block followed by the worker table.
pub fn print_status(report: &StatusReport, options: TableOptions) {
    let s = &report.summary;
    println!("{}", "Supervisor".section_header());
    println!("{} {}", "Phase:".label(), s.phase);
    let since = chrono::Local::now() - chrono::Duration::seconds(s.uptime_seconds as i64);
    println!(
        "{} {} (since {})",
        "Uptime:".label(),
        format_age(s.uptime_seconds),
        since.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "{} {} total, {} ready, {} busy, {} spawning, {} draining, {} terminated",
        "Workers:".label(),
        s.total.count(),
        s.ready,
        s.busy,
        s.spawning,
        s.draining,
        s.terminated
    );
    println!("{} {}", "Queued:".label(), s.queued.count());
    println!("{} {}", "Requests:".label(), s.total_requests.count());
    println!("{} {}", "Restarts:".label(), s.total_restarts.count());
    if s.reloading {
        println!("{}", "Rolling reload in progress".warning());
    }
    println!();

    if report.workers.is_empty() {
        println!("No workers match.");
        return;
    }
    println!("{}", status_table(report, options));
}

/// Option / value / default view of the effective settings.
pub fn settings_table(
    effective: &[(String, String)],
    defaults: &[(String, String)],
    options: TableOptions,
) -> Table {
    let mut table = new_table(options);
    table.set_header(vec!["Option", "Value", "Default"]);
    for (key, value) in effective {
        let default = defaults
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .unwrap_or("-");
        let value_cell = if value == default {
            Cell::new(value).themed(Semantic::Muted)
        } else {
            Cell::new(value).themed(Semantic::Healthy)
        };
        table.add_row(vec![Cell::new(key), value_cell, Cell::new(default)]);
    }
    table
}
