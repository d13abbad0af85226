//! Run summary: totals, parallelism, memory and pool usage.

use std::io::{self, Write};

use crate::analysis::Dataset;
use crate::symbolization::basename;

/// Render the summary block.
pub fn summary(ds: &Dataset, brief: bool, out: &mut impl Write) -> io::Result<()> {
    let profiled_ns: u64 = ds.traces.iter().map(|t| t.nsecs).sum();
    let total_calls: u64 = ds.traces.iter().map(|t| t.calls).sum();
    let peak_depth: u64 = ds.jobs.iter().map(|j| j.depth).max().unwrap_or(0);
    let info = &ds.info;

    writeln!(out, "\nSummary:\n")?;
    if let Some(cmd) = &ds.cmd {
        let shown = if brief { basename(cmd) } else { cmd };
        writeln!(out, "Command: {shown}")?;
    }
    writeln!(out, "Total run time: {} seconds", seconds(info.runtime_ns))?;
    writeln!(out, "Total CPU time: {} seconds", seconds(info.cpu_usage_ns))?;
    writeln!(out, "Profiled CPU time: {} seconds", seconds(profiled_ns))?;
    writeln!(out, "Total function calls profiled: {total_calls}")?;
    writeln!(out, "Maximum parallelism: {}", info.max_threads)?;
    writeln!(out, "Maximum resident set size: {} kbytes", info.max_rss_kb)?;
    let peak_profiling_kb =
        (info.fpool_mem + info.cpool_mem + info.max_threads * info.thread_mem + 1023) >> 10;
    writeln!(out, "Maximum profiling memory: {peak_profiling_kb} kbytes")?;
    writeln!(out, "Function pool usage: {}/{}", info.fpool_used, info.fpool_size)?;
    writeln!(out, "Caller pool usage: {}/{}", info.cpool_used, info.cpool_size)?;
    writeln!(out, "Stack usage: {}/{}", peak_depth, info.stack_size)?;
    Ok(())
}

fn seconds(nanos: u64) -> String {
    format!("{}.{:09}", nanos / 1_000_000_000, nanos % 1_000_000_000)
}
