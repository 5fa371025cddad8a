//! Plain text output for status reports (tab-separated, no colors).

use warmpool::control::StatusReport;

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::from("ID\tPID\tSTATE\tREQUESTS\tAGE\n");
    for worker in &report.workers {
        let pid = worker
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            worker.id, pid, worker.state, worker.requests_served, worker.age_seconds
        ));
    }
    out
}

pub fn print_status(report: &StatusReport) {
    print!("{}", render_status(report));
}
