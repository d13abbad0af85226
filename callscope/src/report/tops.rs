//! Top-functions report: traces grouped by function, four sort modes.

use std::io::{self, Write};

use crate::analysis::Dataset;
use crate::domain::SortMode;

use super::{row_label, write_row, RULE};

const HEADER: &str =
    "Function                                               Calls        CPU Usage";

struct Row {
    func: u64,
    sym: Option<usize>,
    map: Option<usize>,
    calls: u64,
    nsecs: u64,
    avg: u64,
}

/// Group traces by function, sum calls and CPU, render in `mode` order.
pub fn function_report(
    ds: &Dataset,
    mode: SortMode,
    brief: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    let mut rows: Vec<Row> = Vec::new();
    for trace in &ds.traces {
        if let Some(last) = rows.last_mut() {
            if last.func == trace.func {
                last.calls += trace.calls;
                last.nsecs += trace.nsecs;
                continue;
            }
        }
        rows.push(Row {
            func: trace.func,
            sym: trace.func_sym,
            map: trace.func_map,
            calls: trace.calls,
            nsecs: trace.nsecs,
            avg: 0,
        });
    }
    for row in &mut rows {
        row.avg = row.nsecs / row.calls.max(1);
    }

    let title = match mode {
        SortMode::Calls => "Functions sorted by amount of calls",
        SortMode::TotalCpu => "Functions sorted by CPU usage",
        SortMode::CallsAvgCpu => "Functions sorted by amount of calls (avg. CPU usage)",
        SortMode::AvgCpu => "Functions sorted by average CPU usage",
    };
    // Ties on the primary key break on function address ascending.
    match mode {
        SortMode::Calls | SortMode::CallsAvgCpu => {
            rows.sort_by(|a, b| b.calls.cmp(&a.calls).then(a.func.cmp(&b.func)));
        }
        SortMode::TotalCpu => {
            rows.sort_by(|a, b| b.nsecs.cmp(&a.nsecs).then(a.func.cmp(&b.func)));
        }
        SortMode::AvgCpu => {
            rows.sort_by(|a, b| b.avg.cmp(&a.avg).then(a.func.cmp(&b.func)));
        }
    }

    writeln!(out, "\n{title}:\n")?;
    writeln!(out, "{HEADER}")?;
    writeln!(out, "{RULE}")?;
    for row in &rows {
        let label = row_label(ds, row.sym, row.map, row.func, brief);
        let cpu = if mode.shows_average() { row.avg } else { row.nsecs };
        write_row(out, &label, row.calls, cpu)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AddrInfo;
    use crate::trace_data::TraceFile;
    use callscope_common::TraceLine;

    fn trace(func: u64, caller: u64, calls: u64, nsecs: u64) -> TraceLine {
        TraceLine { func, caller, calls, nsecs, calling: 0, unwind: 0 }
    }

    fn dataset() -> Dataset {
        let mut tf = TraceFile::default();
        // Function 0x1000 reached from two call sites: grouped in reports.
        tf.traces.push(trace(0x1000, 0x9000, 3, 300));
        tf.traces.push(trace(0x1000, 0x9100, 2, 100));
        tf.traces.push(trace(0x2000, 0x9000, 1, 5000));
        let addrs = vec![
            AddrInfo { addr: 0x1000, func: "alpha".into(), file: "src/a.c".into(), line: 3 },
            AddrInfo { addr: 0x2000, func: "beta".into(), file: "src/b.c".into(), line: 9 },
        ];
        Dataset::build(tf, addrs).unwrap()
    }

    fn render(mode: SortMode) -> Vec<String> {
        let ds = dataset();
        let mut buf = Vec::new();
        function_report(&ds, mode, false, &mut buf).unwrap();
        String::from_utf8(buf).unwrap().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_groups_and_sorts_by_calls() {
        let lines = render(SortMode::Calls);
        assert_eq!(lines[1], "Functions sorted by amount of calls:");
        // alpha has 5 calls total, beta 1.
        let alpha = lines.iter().find(|l| l.contains("alpha")).unwrap();
        assert!(alpha.contains("      5 "));
        let alpha_pos = lines.iter().position(|l| l.contains("alpha")).unwrap();
        let beta_pos = lines.iter().position(|l| l.contains("beta")).unwrap();
        assert!(alpha_pos < beta_pos);
    }

    #[test]
    fn test_sorts_by_total_cpu() {
        let lines = render(SortMode::TotalCpu);
        let alpha_pos = lines.iter().position(|l| l.contains("alpha")).unwrap();
        let beta_pos = lines.iter().position(|l| l.contains("beta")).unwrap();
        // beta burned 5000ns, alpha 400ns.
        assert!(beta_pos < alpha_pos);
    }

    #[test]
    fn test_average_column() {
        let lines = render(SortMode::AvgCpu);
        assert_eq!(lines[1], "Functions sorted by average CPU usage:");
        // beta: 5000/1, alpha: 400/5 = 80.
        let beta = lines.iter().find(|l| l.contains("beta")).unwrap();
        assert!(beta.ends_with("      1       0.000005000"));
        let alpha = lines.iter().find(|l| l.contains("alpha")).unwrap();
        assert!(alpha.ends_with("      5       0.000000080"));
    }

    #[test]
    fn test_ties_break_on_address() {
        let mut tf = TraceFile::default();
        tf.traces.push(trace(0x2000, 0x9000, 1, 10));
        tf.traces.push(trace(0x1000, 0x9000, 1, 10));
        let ds = Dataset::build(tf, Vec::new()).unwrap();
        let mut buf = Vec::new();
        function_report(&ds, SortMode::Calls, false, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let low = text.find("0x1000").unwrap();
        let high = text.find("0x2000").unwrap();
        assert!(low < high);
    }

    #[test]
    fn test_header_layout() {
        let lines = render(SortMode::Calls);
        assert_eq!(lines[3], HEADER);
        assert_eq!(lines[4], RULE);
        assert_eq!(RULE.len(), 80);
    }
}
