//! Core analyzer types.

use std::fmt;

/// A symbolized address: function name plus source location.
///
/// `line` 0 means the resolver knew the function but not the line, in which
/// case `file` falls back to the mapped object's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub addr: u64,
    pub func: String,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for AddrInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{} ({})", self.func, self.file)
        } else {
            write!(f, "{} ({}:{})", self.func, self.file, self.line)
        }
    }
}

/// Ordering for the top-functions and top-threads reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Descending call count, total CPU column.
    Calls,
    /// Descending total CPU.
    TotalCpu,
    /// Descending call count, average CPU column.
    CallsAvgCpu,
    /// Descending average CPU per call.
    AvgCpu,
}

impl SortMode {
    /// Whether the CPU column shows per-call averages.
    #[must_use]
    pub fn shows_average(self) -> bool {
        matches!(self, SortMode::CallsAvgCpu | SortMode::AvgCpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_info_display() {
        let with_line =
            AddrInfo { addr: 0x10, func: "worker".into(), file: "src/job.c".into(), line: 42 };
        assert_eq!(with_line.to_string(), "worker (src/job.c:42)");

        let without_line =
            AddrInfo { addr: 0x10, func: "worker".into(), file: "/usr/bin/demo".into(), line: 0 };
        assert_eq!(without_line.to_string(), "worker (/usr/bin/demo)");
    }
}
