//! Dump format shared between the instrumentation runtime and the analyzer.
//!
//! The trace file is line-oriented utf-8 text. Every line starts with one of
//! the prefixes below; unknown prefixes are ignored by readers so the format
//! can grow without breaking old analyzers.
//!
//! | Prefix    | Fields                                            |
//! |-----------|---------------------------------------------------|
//! | `CMD: `   | absolute executable path                          |
//! | `INFO: `  | key and decimal value (see [`RunInfo`])           |
//! | `MAP: `   | `0xstart 0xend path` of an executable region      |
//! | `TRACE: ` | `0xfunc 0xcaller calls nsecs calling unwind`      |
//! | `THREAD: `| `0xfunc calls nsecs funcs unwind depth`           |
//! | `ERROR: ` | human-readable failure reason                     |
//!
//! Addresses are `0x`-prefixed lowercase hex; all other numbers are decimal
//! and fit in `u64`.

use std::fmt;

/// Default trace file name, used by the runtime when `PROFILE_LOG_FILE` is
/// unset and by the analyzer when `-i` is not given.
pub const DEFAULT_TRACE_FILE: &str = "instrumentation.out";

/// `ERROR:` line payloads emitted by the runtime.
pub const ERR_FUNC_POOL: &str = "func pool exhausted";
pub const ERR_CALLER_POOL: &str = "caller pool exhausted";
pub const ERR_STACK: &str = "time stack exhausted";
pub const ERR_TIME: &str = "time access failure";
pub const ERR_INTERNAL: &str = "internal or resource problem";

/// One `TRACE:` line: the counters of a single (function, caller) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLine {
    /// Address of the instrumented function.
    pub func: u64,
    /// Address of the call site that entered it.
    pub caller: u64,
    /// Number of entries through this call site.
    pub calls: u64,
    /// Thread-CPU time attributed to the pair, in nanoseconds.
    pub nsecs: u64,
    /// Number of times the pair made a nested call while on the stack.
    pub calling: u64,
    /// Number of frames popped by the unwinder rather than the exit hook.
    pub unwind: u64,
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TRACE: 0x{:x} 0x{:x} {} {} {} {}",
            self.func, self.caller, self.calls, self.nsecs, self.calling, self.unwind
        )
    }
}

/// One `THREAD:` line: per-function totals over completed top-level calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadLine {
    /// Address of the root function.
    pub func: u64,
    /// Completed top-level invocations.
    pub calls: u64,
    /// Accumulated thread-CPU nanoseconds over those invocations.
    pub nsecs: u64,
    /// Function entries performed during those invocations.
    pub funcs: u64,
    /// Frames force-unwound during those invocations.
    pub unwind: u64,
    /// Maximum stack depth observed while this function was the root.
    pub depth: u64,
}

impl fmt::Display for ThreadLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "THREAD: 0x{:x} {} {} {} {} {}",
            self.func, self.calls, self.nsecs, self.funcs, self.unwind, self.depth
        )
    }
}

/// One `MAP:` line: an executable, file-backed region of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLine {
    pub start: u64,
    pub end: u64,
    /// Absolute path of the mapped file.
    pub path: String,
}

impl fmt::Display for MapLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MAP: 0x{:x} 0x{:x} {}", self.start, self.end, self.path)
    }
}

/// The `INFO:` scalar set describing one profiling run.
///
/// Written in the order of [`RunInfo::entries`]; readers apply keys
/// individually so missing or reordered lines are tolerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunInfo {
    /// Wall-clock runtime in nanoseconds.
    pub runtime_ns: u64,
    /// Process CPU time in nanoseconds.
    pub cpu_usage_ns: u64,
    /// Peak resident set size in kbytes.
    pub max_rss_kb: u64,
    pub fpool_used: u64,
    pub fpool_size: u64,
    pub fpool_mem: u64,
    pub cpool_used: u64,
    pub cpool_size: u64,
    pub cpool_mem: u64,
    /// Configured per-thread stack depth.
    pub stack_size: u64,
    /// Bytes allocated per thread record.
    pub thread_mem: u64,
    /// Peak number of concurrently profiled threads.
    pub max_threads: u64,
}

impl RunInfo {
    /// The `INFO:` keys and values in dump order.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, u64); 12] {
        [
            ("runtime", self.runtime_ns),
            ("cpu-usage", self.cpu_usage_ns),
            ("maxrss", self.max_rss_kb),
            ("f-pool-use", self.fpool_used),
            ("f-pool-size", self.fpool_size),
            ("f-pool-mem", self.fpool_mem),
            ("c-pool-use", self.cpool_used),
            ("c-pool-size", self.cpool_size),
            ("c-pool-mem", self.cpool_mem),
            ("stack-size", self.stack_size),
            ("thread-mem", self.thread_mem),
            ("max-threads", self.max_threads),
        ]
    }

    /// Apply one parsed `INFO:` key. Returns false for unknown keys.
    pub fn apply(&mut self, key: &str, value: u64) -> bool {
        match key {
            "runtime" => self.runtime_ns = value,
            "cpu-usage" => self.cpu_usage_ns = value,
            "maxrss" => self.max_rss_kb = value,
            "f-pool-use" => self.fpool_used = value,
            "f-pool-size" => self.fpool_size = value,
            "f-pool-mem" => self.fpool_mem = value,
            "c-pool-use" => self.cpool_used = value,
            "c-pool-size" => self.cpool_size = value,
            "c-pool-mem" => self.cpool_mem = value,
            "stack-size" => self.stack_size = value,
            "thread-mem" => self.thread_mem = value,
            "max-threads" => self.max_threads = value,
            _ => return false,
        }
        true
    }
}

/// One parsed dump line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Cmd(String),
    Info { key: String, value: u64 },
    Map(MapLine),
    Trace(TraceLine),
    Thread(ThreadLine),
    Error(String),
}

impl Line {
    /// Parse a single dump line.
    ///
    /// Returns `None` for unknown prefixes and for recognized lines with
    /// missing or unparsable fields; readers skip those silently.
    #[must_use]
    pub fn parse(line: &str) -> Option<Line> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("TRACE: ") {
            let mut it = rest.split_whitespace();
            let trace = TraceLine {
                func: parse_addr(it.next()?)?,
                caller: parse_addr(it.next()?)?,
                calls: it.next()?.parse().ok()?,
                nsecs: it.next()?.parse().ok()?,
                calling: it.next()?.parse().ok()?,
                unwind: it.next()?.parse().ok()?,
            };
            Some(Line::Trace(trace))
        } else if let Some(rest) = line.strip_prefix("THREAD: ") {
            let mut it = rest.split_whitespace();
            let thread = ThreadLine {
                func: parse_addr(it.next()?)?,
                calls: it.next()?.parse().ok()?,
                nsecs: it.next()?.parse().ok()?,
                funcs: it.next()?.parse().ok()?,
                unwind: it.next()?.parse().ok()?,
                depth: it.next()?.parse().ok()?,
            };
            Some(Line::Thread(thread))
        } else if let Some(rest) = line.strip_prefix("MAP: ") {
            let mut it = rest.splitn(3, ' ');
            let start = parse_addr(it.next()?)?;
            let end = parse_addr(it.next()?)?;
            let path = it.next()?.trim_end();
            if path.is_empty() {
                return None;
            }
            Some(Line::Map(MapLine { start, end, path: path.to_string() }))
        } else if let Some(rest) = line.strip_prefix("INFO: ") {
            let mut it = rest.split_whitespace();
            let key = it.next()?.to_string();
            let value = it.next()?.parse().ok()?;
            Some(Line::Info { key, value })
        } else if let Some(rest) = line.strip_prefix("CMD: ") {
            let path = rest.split_whitespace().next()?;
            Some(Line::Cmd(path.to_string()))
        } else if let Some(rest) = line.strip_prefix("ERROR: ") {
            Some(Line::Error(rest.trim_end().to_string()))
        } else {
            None
        }
    }
}

/// Parse a `0x`-prefixed hex address token (the prefix is optional on input).
fn parse_addr(token: &str) -> Option<u64> {
    let digits = token.strip_prefix("0x").unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}
