//! Top-threads report: one row per `THREAD:` record, four sort modes.

use std::io::{self, Write};

use crate::analysis::Dataset;
use crate::domain::SortMode;

use super::{row_label, write_row, RULE};

const HEADER: &str =
    "Thread                                           Invocations        CPU Usage";

/// Render the per-thread-root statistics in `mode` order.
pub fn thread_report(
    ds: &Dataset,
    mode: SortMode,
    brief: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    let mut order: Vec<usize> = (0..ds.jobs.len()).collect();
    let title = match mode {
        SortMode::Calls => "Threads sorted by amount of calls",
        SortMode::TotalCpu => "Threads sorted by CPU usage",
        SortMode::CallsAvgCpu => "Threads sorted by amount of calls (avg. CPU usage)",
        SortMode::AvgCpu => "Threads sorted by average CPU usage",
    };
    match mode {
        SortMode::Calls | SortMode::CallsAvgCpu => {
            order.sort_by(|&a, &b| {
                let (a, b) = (&ds.jobs[a], &ds.jobs[b]);
                b.calls.cmp(&a.calls).then(a.func.cmp(&b.func))
            });
        }
        SortMode::TotalCpu => {
            order.sort_by(|&a, &b| {
                let (a, b) = (&ds.jobs[a], &ds.jobs[b]);
                b.nsecs.cmp(&a.nsecs).then(a.func.cmp(&b.func))
            });
        }
        SortMode::AvgCpu => {
            order.sort_by(|&a, &b| {
                let (a, b) = (&ds.jobs[a], &ds.jobs[b]);
                b.avg.cmp(&a.avg).then(a.func.cmp(&b.func))
            });
        }
    }

    writeln!(out, "\n{title}:\n")?;
    writeln!(out, "{HEADER}")?;
    writeln!(out, "{RULE}")?;
    for &i in &order {
        let job = &ds.jobs[i];
        let label = row_label(ds, job.sym, job.map, job.func, brief);
        let cpu = if mode.shows_average() { job.avg } else { job.nsecs };
        write_row(out, &label, job.calls, cpu)?;
    }
    Ok(())
}
