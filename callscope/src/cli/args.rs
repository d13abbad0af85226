//! CLI argument definitions

use callscope_common::DEFAULT_TRACE_FILE;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "callscope",
    about = "Post-process function-level instrumentation traces into reports",
    after_help = "\
EXAMPLES:
    callscope -S -c -C                  Summary plus top functions
    callscope -i trace.out -g 24 -C     CPU report with overhead correction
    callscope -f                        Complete call trees
    callscope -F worker                 Call tree rooted at 'worker'

Note that call trees are based on actually executed calls."
)]
pub struct Args {
    /// Print only file names, not full paths
    #[arg(short = 's')]
    pub brief: bool,

    /// Instrumentation trace to read
    #[arg(short = 'i', value_name = "FILE", default_value = DEFAULT_TRACE_FILE)]
    pub input: PathBuf,

    /// Chroot prefix prepended to recorded pathnames
    #[arg(short = 'p', value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Per-hook-pair clock_gettime correction in nanoseconds
    #[arg(
        short = 'g',
        value_name = "NS",
        default_value_t = 0,
        value_parser = clap::value_parser!(u64).range(0..=100_000)
    )]
    pub adjust: u64,

    /// Show the run summary
    #[arg(short = 'S')]
    pub summary: bool,

    /// List functions sorted by amount of calls
    #[arg(short = 'c')]
    pub func_calls: bool,

    /// List functions sorted by total CPU time used
    #[arg(short = 'C')]
    pub func_cpu: bool,

    /// List functions sorted by calls, with average CPU time per call
    #[arg(short = 'a')]
    pub func_calls_avg: bool,

    /// List functions sorted by average CPU time per call
    #[arg(short = 'A')]
    pub func_avg: bool,

    /// List threads sorted by amount of invocations
    #[arg(short = 't')]
    pub thread_calls: bool,

    /// List threads sorted by total CPU time used
    #[arg(short = 'T')]
    pub thread_cpu: bool,

    /// List threads sorted by invocations, with average CPU time per call
    #[arg(short = 'w')]
    pub thread_calls_avg: bool,

    /// List threads sorted by average CPU time per call
    #[arg(short = 'W')]
    pub thread_avg: bool,

    /// Show the complete function call tree(s)
    #[arg(short = 'f')]
    pub tree: bool,

    /// Show the call tree for one function
    #[arg(short = 'F', value_name = "FUNC")]
    pub tree_func: Option<String>,
}

impl Args {
    /// At least one report was requested; without any the tool prints usage
    /// and fails.
    #[must_use]
    pub fn any_operation(&self) -> bool {
        self.summary
            || self.func_calls
            || self.func_cpu
            || self.func_calls_avg
            || self.func_avg
            || self.thread_calls
            || self.thread_cpu
            || self.thread_calls_avg
            || self.thread_avg
            || self.tree
            || self.tree_func.is_some()
    }
}
