//! Trace dump writer.
//!
//! Emits, in order: `CMD:`, the `INFO:` scalar set, `MAP:` lines for
//! executable regions, one `TRACE:` line per caller record, one `THREAD:`
//! line per function record that completed a top-level call, and finally the
//! `ERROR:` lines for whatever failures latched. Data gathered before a
//! failure is still written; only a failed init (or unreadable final clocks)
//! suppresses the data sections.

use std::io::{self, Write};
use std::sync::atomic::Ordering;

use callscope_common::{
    RunInfo, ThreadLine, TraceLine, ERR_CALLER_POOL, ERR_FUNC_POOL, ERR_INTERNAL, ERR_STACK,
    ERR_TIME,
};

use crate::index::{CallerRecord, FuncRecord};
use crate::proc_info;
use crate::profiler::{FinalStats, Profiler};
use crate::thread_state::ThreadRecord;

pub fn write_dump(
    profiler: &Profiler,
    stats: Option<&FinalStats>,
    out: &mut impl Write,
) -> io::Result<()> {
    if let (true, Some(stats)) = (profiler.init_ok, stats) {
        write_data(profiler, stats, out)?;
    }
    write_errors(profiler, out)
}

fn write_data(profiler: &Profiler, stats: &FinalStats, out: &mut impl Write) -> io::Result<()> {
    if let Some(cmd) = proc_info::exe_path() {
        writeln!(out, "CMD: {cmd}")?;
    }

    let stack_limit = profiler.config.stack_limit();
    let info = RunInfo {
        runtime_ns: stats.wall.delta_since(profiler.start_wall).total_nanos(),
        cpu_usage_ns: stats.cpu.total_nanos(),
        max_rss_kb: stats.max_rss_kb,
        fpool_used: profiler.index.func_pool().used() as u64,
        fpool_size: profiler.index.func_pool().capacity() as u64,
        fpool_mem: profiler.index.func_pool().mem_bytes() as u64,
        cpool_used: profiler.index.caller_pool().used() as u64,
        cpool_size: profiler.index.caller_pool().capacity() as u64,
        cpool_mem: profiler.index.caller_pool().mem_bytes() as u64,
        stack_size: profiler.config.stack_size as u64,
        thread_mem: ThreadRecord::reported_size(stack_limit) as u64,
        max_threads: profiler.max_threads.load(Ordering::SeqCst).max(0) as u64,
    };
    for (key, value) in info.entries() {
        writeln!(out, "INFO: {key} {value}")?;
    }

    for map in proc_info::executable_maps() {
        writeln!(out, "{map}")?;
    }

    let mut write_err: Option<io::Error> = None;
    profiler.index.for_each_func(&mut |func| {
        func.for_each_caller(&mut |caller| {
            if let Err(e) = writeln!(out, "{}", trace_line(func, caller)) {
                write_err.get_or_insert(e);
            }
        });
        if func.calls.load(Ordering::Relaxed) > 0 {
            if let Err(e) = writeln!(out, "{}", thread_line(func)) {
                write_err.get_or_insert(e);
            }
        }
    });
    match write_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn trace_line(func: &FuncRecord, caller: &CallerRecord) -> TraceLine {
    TraceLine {
        func: func.addr() as u64,
        caller: caller.addr() as u64,
        calls: caller.calls.load(Ordering::Relaxed),
        nsecs: caller.total_nanos(),
        calling: caller.calling.load(Ordering::Relaxed),
        unwind: u64::from(caller.unwind.load(Ordering::Relaxed)),
    }
}

fn thread_line(func: &FuncRecord) -> ThreadLine {
    ThreadLine {
        func: func.addr() as u64,
        calls: func.calls.load(Ordering::Relaxed),
        nsecs: func.total_nanos(),
        funcs: func.funcs.load(Ordering::Relaxed),
        unwind: u64::from(func.unwind.load(Ordering::Relaxed)),
        depth: u64::from(func.depth.load(Ordering::Relaxed)),
    }
}

fn write_errors(profiler: &Profiler, out: &mut impl Write) -> io::Result<()> {
    let flags = profiler.flags();
    if flags.internal_only() {
        writeln!(out, "ERROR: {ERR_INTERNAL}")?;
    }
    if flags.func_pool_exhausted() {
        writeln!(out, "ERROR: {ERR_FUNC_POOL}")?;
    }
    if flags.caller_pool_exhausted() {
        writeln!(out, "ERROR: {ERR_CALLER_POOL}")?;
    }
    if flags.stack_exhausted() {
        writeln!(out, "ERROR: {ERR_STACK}")?;
    }
    if flags.time_failed() {
        writeln!(out, "ERROR: {ERR_TIME}")?;
    }
    Ok(())
}
