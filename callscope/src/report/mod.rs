//! Report rendering.
//!
//! All reports write plain text to an `io::Write` sink, with the fixed-width
//! layout of the original renderer: an entity label padded to 53 columns,
//! then a 7-wide count and a seconds.nanoseconds CPU column.

pub mod summary;
pub mod threads;
pub mod tops;
pub mod tree;

pub use summary::summary;
pub use threads::thread_report;
pub use tops::function_report;
pub use tree::call_tree;

use std::io::{self, Write};

use crate::analysis::Dataset;
use crate::symbolization::basename;

pub(crate) const RULE: &str =
    "================================================================================";

/// Label for a function or thread row: symbol, map+offset, or raw address.
/// The trailing space separates it from the padding.
pub(crate) fn row_label(
    ds: &Dataset,
    sym: Option<usize>,
    map: Option<usize>,
    addr: u64,
    brief: bool,
) -> String {
    if let Some(sym) = sym {
        format!("{} ", ds.addrs[sym])
    } else if let Some(map) = map {
        let map = &ds.maps[map];
        let name = if brief { basename(&map.path) } else { &map.path };
        format!("{}+0x{:x} ", name, addr - map.start)
    } else {
        format!("0x{addr:x} ")
    }
}

/// Write one aligned report row. The label is padded in ten-space chunks to
/// column 43 and single spaces to column 53, as the original layout does.
pub(crate) fn write_row(
    out: &mut impl Write,
    label: &str,
    count: u64,
    nanos: u64,
) -> io::Result<()> {
    let mut width = label.len();
    out.write_all(label.as_bytes())?;
    while width < 43 {
        out.write_all(b"          ")?;
        width += 10;
    }
    while width < 53 {
        out.write_all(b" ")?;
        width += 1;
    }
    writeln!(out, " {:>7} {:>7}.{:09}", count, nanos / 1_000_000_000, nanos % 1_000_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_data::TraceFile;
    use callscope_common::TraceLine;

    #[test]
    fn test_write_row_alignment() {
        let mut buf = Vec::new();
        write_row(&mut buf, "short ", 7, 1_500_000_000).unwrap();
        let line = String::from_utf8(buf).unwrap();
        // Count column is right-aligned after the padded label.
        assert_eq!(line, format!("{:<53} {:>7} {:>7}.{:09}\n", "short", 7, 1, 500_000_000));
    }

    #[test]
    fn test_write_row_long_labels_push_columns() {
        let mut buf = Vec::new();
        let label = format!("{} ", "x".repeat(60));
        write_row(&mut buf, &label, 1, 2).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.starts_with(&label));
        assert!(line.ends_with("       1       0.000000002\n"));
    }

    #[test]
    fn test_row_label_fallbacks() {
        let mut tf = TraceFile::default();
        tf.traces.push(TraceLine {
            func: 0x1100,
            caller: 0x2,
            calls: 1,
            nsecs: 0,
            calling: 0,
            unwind: 0,
        });
        tf.maps.push(callscope_common::MapLine {
            start: 0x1000,
            end: 0x2000,
            path: "/usr/lib/libdemo.so".into(),
        });
        let ds = Dataset::build(tf, Vec::new()).unwrap();

        assert_eq!(row_label(&ds, None, Some(0), 0x1100, false), "/usr/lib/libdemo.so+0x100 ");
        assert_eq!(row_label(&ds, None, Some(0), 0x1100, true), "libdemo.so+0x100 ");
        assert_eq!(row_label(&ds, None, None, 0xbeef, false), "0xbeef ");
    }
}
