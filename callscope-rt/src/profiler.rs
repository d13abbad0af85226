//! The profiling engine: entry/exit hook logic, stack bookkeeping, unwind
//! and finalization.
//!
//! One [`Profiler`] exists per process behind the C hook symbols; tests
//! build their own instances and drive them through [`ThreadSlot`] handles,
//! one per simulated thread.

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::clock::{self, TimeSpec};
use crate::config::Config;
use crate::dump;
use crate::index::FunctionIndex;
use crate::pool::Pool;
use crate::proc_info;
use crate::thread_state::{ThreadRecord, ThreadSlot, ThreadTable};

/// How frames leave the stack during an unwind walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindMode {
    /// The thread or process went away under the stack; every popped frame
    /// counts as unwound.
    Forced,
    /// The bottom frame completed normally (thread exit from within its
    /// outermost instrumented function); nothing counts as unwound.
    Completed,
}

/// Latched failure state. Once `error` is set every hook returns
/// immediately; the dumper reports the specific reason.
pub struct FailureFlags {
    error: AtomicBool,
    func_pool: AtomicBool,
    caller_pool: AtomicBool,
    stack: AtomicBool,
    time: AtomicBool,
}

impl FailureFlags {
    fn new() -> Self {
        Self {
            error: AtomicBool::new(false),
            func_pool: AtomicBool::new(false),
            caller_pool: AtomicBool::new(false),
            stack: AtomicBool::new(false),
            time: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn errored(&self) -> bool {
        self.error.load(Ordering::Relaxed)
    }

    pub(crate) fn latch_func_pool(&self) {
        self.func_pool.store(true, Ordering::Relaxed);
        self.error.store(true, Ordering::Relaxed);
    }

    pub(crate) fn latch_caller_pool(&self) {
        self.caller_pool.store(true, Ordering::Relaxed);
        self.error.store(true, Ordering::Relaxed);
    }

    pub(crate) fn latch_stack(&self) {
        self.stack.store(true, Ordering::Relaxed);
        self.error.store(true, Ordering::Relaxed);
    }

    pub(crate) fn latch_time(&self) {
        self.time.store(true, Ordering::Relaxed);
        self.error.store(true, Ordering::Relaxed);
    }

    /// Error with no specific resource attached (consistency violations).
    pub(crate) fn latch_internal(&self) {
        self.error.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn func_pool_exhausted(&self) -> bool {
        self.func_pool.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn caller_pool_exhausted(&self) -> bool {
        self.caller_pool.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stack_exhausted(&self) -> bool {
        self.stack.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn time_failed(&self) -> bool {
        self.time.load(Ordering::Relaxed)
    }

    /// True when `error` is set but no specific flag explains it.
    #[must_use]
    pub fn internal_only(&self) -> bool {
        self.errored()
            && !self.func_pool_exhausted()
            && !self.caller_pool_exhausted()
            && !self.stack_exhausted()
            && !self.time_failed()
    }
}

/// Final samples taken by the dumper before writing.
pub struct FinalStats {
    pub wall: TimeSpec,
    pub cpu: TimeSpec,
    pub max_rss_kb: u64,
}

pub struct Profiler {
    pub(crate) config: Config,
    pub(crate) index: FunctionIndex,
    threads: ThreadTable,
    pub(crate) flags: FailureFlags,
    pub(crate) start_wall: TimeSpec,
    init_pid: u32,
    /// Pools and clocks came up; data sections of the dump are meaningful.
    pub(crate) init_ok: bool,
    num_threads: AtomicI32,
    pub(crate) max_threads: AtomicI32,
}

impl Profiler {
    /// Build the process-wide state. Failures latch the matching flag and
    /// leave a no-op profiler behind, they never abort the host program.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let flags = FailureFlags::new();
        let mut init_ok = !config.disabled;

        if config.disabled {
            flags.latch_internal();
        }

        let func_pool = if init_ok {
            match Pool::with_capacity(config.func_pool) {
                Some(pool) => pool,
                None => {
                    flags.latch_func_pool();
                    init_ok = false;
                    Pool::empty()
                }
            }
        } else {
            Pool::empty()
        };

        let caller_pool = if init_ok {
            match Pool::with_capacity(config.caller_pool) {
                Some(pool) => pool,
                None => {
                    flags.latch_caller_pool();
                    init_ok = false;
                    Pool::empty()
                }
            }
        } else {
            Pool::empty()
        };

        let start_wall = if init_ok {
            match clock::monotonic() {
                Ok(stamp) => stamp,
                Err(_) => {
                    flags.latch_time();
                    init_ok = false;
                    TimeSpec::default()
                }
            }
        } else {
            TimeSpec::default()
        };

        Self {
            config,
            index: FunctionIndex::new(func_pool, caller_pool),
            threads: ThreadTable::new(),
            flags,
            start_wall,
            init_pid: std::process::id(),
            init_ok,
            num_threads: AtomicI32::new(0),
            max_threads: AtomicI32::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn flags(&self) -> &FailureFlags {
        &self.flags
    }

    #[must_use]
    pub fn index(&self) -> &FunctionIndex {
        &self.index
    }

    /// Sample the thread-CPU clock. Clock failures are fatal only in strict
    /// mode; otherwise the caller gets `fallback`.
    fn stamp_or(&self, fallback: TimeSpec) -> Option<TimeSpec> {
        match clock::thread_cpu() {
            Ok(stamp) => Some(stamp),
            Err(_) => {
                if cfg!(feature = "strict") {
                    self.flags.latch_time();
                    None
                } else {
                    Some(fallback)
                }
            }
        }
    }

    /// Re-sample the clock into `start_time` for the next frame.
    fn restamp(&self, tt: &mut ThreadRecord) {
        match clock::thread_cpu() {
            Ok(stamp) => tt.start_time = stamp,
            Err(_) => {
                if cfg!(feature = "strict") {
                    self.flags.latch_time();
                }
            }
        }
    }

    /// Function entry. `slot` is the calling thread's record handle.
    pub fn enter(&self, slot: &ThreadSlot, func_addr: usize, caller_addr: usize) {
        if self.flags.errored() {
            return;
        }

        let Some(stamp) = self.stamp_or(TimeSpec::default()) else {
            return;
        };

        let mut record_ptr = slot.get();
        if record_ptr.is_null() {
            record_ptr = Box::into_raw(ThreadRecord::new(self.config.stack_limit()));
            self.threads.insert(record_ptr);
            slot.set(record_ptr);
            let live = self.num_threads.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_threads.fetch_max(live, Ordering::SeqCst);
        } else {
            // SAFETY: the record belongs to this thread and stays alive until
            // the paired exit or the cleanup path frees it.
            let tt = unsafe { &mut *record_ptr };
            let delta = stamp.delta_since(tt.start_time);
            let top = &mut tt.stack[tt.stack_index];
            top.used.accumulate(delta);
            // The current pair is invoking a child.
            // SAFETY: every live frame holds published records.
            let top_caller = unsafe { &*top.caller };
            top_caller.calling.fetch_add(1, Ordering::Relaxed);
        }
        // SAFETY: as above.
        let tt = unsafe { &mut *record_ptr };

        tt.stack_index += 1;
        if tt.stack_index == self.config.stack_limit() {
            // Keep the stack consistent for the shutdown unwind.
            tt.stack_index -= 1;
            self.flags.latch_stack();
            return;
        }
        if tt.stack_index > tt.depth as usize {
            tt.depth = tt.stack_index as u32;
        }
        tt.funcs += 1;

        let Some(func) = self.index.lookup_func(func_addr) else {
            tt.stack_index -= 1;
            self.flags.latch_func_pool();
            return;
        };
        let Some(caller) = self.index.lookup_caller(func, caller_addr) else {
            tt.stack_index -= 1;
            self.flags.latch_caller_pool();
            return;
        };

        let frame = &mut tt.stack[tt.stack_index];
        frame.func = func;
        frame.caller = caller;
        frame.used = TimeSpec::default();

        caller.calls.fetch_add(1, Ordering::Relaxed);

        // Nothing between the frame setup above and this sample is charged
        // to the new frame.
        self.restamp(tt);
    }

    /// Function exit, the pair of [`enter`](Self::enter).
    pub fn exit(&self, slot: &ThreadSlot, func_addr: usize, caller_addr: usize) {
        if self.flags.errored() {
            return;
        }
        let record_ptr = slot.get();
        if record_ptr.is_null() {
            // Exit without a record: hook fired after thread teardown.
            return;
        }
        // SAFETY: record owned by this thread, see enter().
        let tt = unsafe { &mut *record_ptr };
        if tt.stack_index == 0 {
            return;
        }

        let Some(stamp) = self.stamp_or(tt.start_time) else {
            return;
        };

        let frame = tt.stack[tt.stack_index];

        if cfg!(feature = "strict") {
            // SAFETY: live frames hold published records.
            let (func, caller) = unsafe { (&*frame.func, &*frame.caller) };
            if func.addr() != func_addr || caller.addr() != caller_addr {
                // Nonlocal jump detected; accounting is beyond repair.
                self.flags.latch_internal();
                return;
            }
        }

        let delta = stamp.delta_since(tt.start_time);
        let mut spent = frame.used;
        spent.accumulate(delta);

        // SAFETY: live frames hold published records.
        let caller = unsafe { &*frame.caller };
        caller.nsecs.fetch_add(spent.nsecs as u64, Ordering::Relaxed);
        caller.secs.fetch_add(spent.secs as u64, Ordering::Relaxed);
        tt.nsecs += spent.nsecs as u64;
        tt.secs += spent.secs as u64;

        tt.stack_index -= 1;
        if tt.stack_index == 0 {
            // Completed a top-level call: fold the thread totals into the
            // root function record and retire the thread state.
            // SAFETY: as above.
            let func = unsafe { &*frame.func };
            func.funcs.fetch_add(tt.funcs, Ordering::Relaxed);
            func.calls.fetch_add(1, Ordering::Relaxed);
            func.secs.fetch_add(tt.secs, Ordering::Relaxed);
            func.nsecs.fetch_add(tt.nsecs, Ordering::Relaxed);
            func.depth.fetch_max(tt.depth, Ordering::SeqCst);

            self.num_threads.fetch_sub(1, Ordering::SeqCst);
            self.threads.remove(record_ptr);
            slot.take();
            // SAFETY: unlinked and no longer reachable through the slot.
            drop(unsafe { Box::from_raw(record_ptr) });
        } else {
            self.restamp(tt);
        }
    }

    /// Pop every remaining frame, attributing accumulated self-times.
    fn unwind(&self, tt: &mut ThreadRecord, mode: UnwindMode) {
        while tt.stack_index > 0 {
            let frame = tt.stack[tt.stack_index];
            // SAFETY: live frames hold published records.
            let caller = unsafe { &*frame.caller };
            caller.secs.fetch_add(frame.used.secs as u64, Ordering::Relaxed);
            caller.nsecs.fetch_add(frame.used.nsecs as u64, Ordering::Relaxed);
            if mode == UnwindMode::Forced {
                caller.unwind.fetch_add(1, Ordering::Relaxed);
                tt.unwind += 1;
            }
            tt.secs += frame.used.secs as u64;
            tt.nsecs += frame.used.nsecs as u64;

            if tt.stack_index == 1 {
                // Bottom frame: account the whole top-level call to the root
                // function, exactly as a normal return would.
                // SAFETY: as above.
                let func = unsafe { &*frame.func };
                func.calls.fetch_add(1, Ordering::Relaxed);
                func.secs.fetch_add(tt.secs, Ordering::Relaxed);
                func.nsecs.fetch_add(tt.nsecs, Ordering::Relaxed);
                func.funcs.fetch_add(tt.funcs, Ordering::Relaxed);
                func.unwind.fetch_add(tt.unwind, Ordering::Relaxed);
                func.depth.fetch_max(tt.depth, Ordering::SeqCst);
            }
            tt.stack_index -= 1;
        }
    }

    /// Per-thread cleanup, run by the thread-local destructor on thread
    /// exit when the thread still holds a record.
    pub fn thread_cleanup(&self, slot: &ThreadSlot) {
        let record_ptr = slot.take();
        if record_ptr.is_null() {
            return;
        }
        if !self.flags.errored() {
            // SAFETY: the exiting thread still owns its record.
            let tt = unsafe { &mut *record_ptr };
            if tt.stack_index > 0 {
                let mut mode = UnwindMode::Forced;
                if tt.stack_index == 1 {
                    // The thread is exiting from within its outermost
                    // instrumented function; that frame completed normally.
                    if let Ok(stamp) = clock::thread_cpu() {
                        let delta = stamp.delta_since(tt.start_time);
                        tt.stack[1].used.accumulate(delta);
                        mode = UnwindMode::Completed;
                    } else if cfg!(feature = "strict") {
                        self.flags.latch_time();
                    }
                }
                self.unwind(tt, mode);
            }
            self.threads.remove(record_ptr);
            // SAFETY: unlinked, slot already cleared.
            drop(unsafe { Box::from_raw(record_ptr) });
        }
        // When errored the record stays linked; the shutdown sweep unwinds
        // and frees whatever is left.
        self.num_threads.fetch_sub(1, Ordering::SeqCst);
    }

    /// Sample final clocks and force-unwind every thread still in the table.
    ///
    /// Returns `None` when the final samples cannot be taken; the dump then
    /// carries only `ERROR:` lines.
    pub fn collect_final(&self) -> Option<FinalStats> {
        let samples = match (clock::process_cpu(), clock::monotonic(), proc_info::max_rss_kb()) {
            (Ok(cpu), Ok(wall), Some(max_rss_kb)) => Some(FinalStats { wall, cpu, max_rss_kb }),
            _ => {
                self.flags.latch_time();
                None
            }
        };

        while let Some(record_ptr) = self.threads.pop() {
            // SAFETY: popped records are no longer reachable by their
            // threads (which have exited or stopped hooking).
            let tt = unsafe { &mut *record_ptr };
            self.unwind(tt, UnwindMode::Forced);
            drop(unsafe { Box::from_raw(record_ptr) });
        }

        samples
    }

    /// Whether this process is the one elected to write the dump.
    ///
    /// The PID captured at init identifies the original process; with
    /// `PROFILE_DAEMON` the first forked child writes instead. Exactly one
    /// side writes.
    #[must_use]
    pub fn should_write(&self) -> bool {
        let original = std::process::id() == self.init_pid;
        if self.config.daemon {
            !original
        } else {
            original
        }
    }

    /// Process-exit path: finalize and write the trace file.
    pub fn run_at_exit(&self) {
        if self.config.disabled {
            return;
        }
        let stats = self.collect_final();
        if !self.should_write() {
            return;
        }
        if let Ok(file) = File::create(&self.config.log_file) {
            let mut out = BufWriter::new(file);
            // Nothing useful to do about write failures this late.
            let _ = dump::write_dump(self, stats.as_ref(), &mut out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn profiler(func_pool: usize, caller_pool: usize, stack_size: usize) -> Profiler {
        Profiler::new(Config { func_pool, caller_pool, stack_size, ..Config::default() })
    }

    const F: usize = 0x1000;
    const G: usize = 0x2000;
    const H: usize = 0x3000;
    const MAIN: usize = 0x9000;

    #[test]
    fn test_repeated_top_level_calls() {
        let p = profiler(16, 16, 10);
        let slot = ThreadSlot::new();
        for _ in 0..3 {
            p.enter(&slot, F, MAIN);
            p.exit(&slot, F, MAIN);
        }
        // Record freed after each top-level completion.
        assert!(slot.get().is_null());

        let f = p.index.lookup_func(F).unwrap();
        assert_eq!(f.calls.load(Ordering::Relaxed), 3);
        assert_eq!(f.funcs.load(Ordering::Relaxed), 3);
        assert_eq!(f.depth.load(Ordering::Relaxed), 1);
        assert_eq!(f.unwind.load(Ordering::Relaxed), 0);

        let mut callers = Vec::new();
        f.for_each_caller(&mut |c| {
            callers.push((
                c.addr(),
                c.calls.load(Ordering::Relaxed),
                c.calling.load(Ordering::Relaxed),
            ));
        });
        assert_eq!(callers, vec![(MAIN, 3, 0)]);
    }

    #[test]
    fn test_nested_calls_attribute_to_root_only() {
        let p = profiler(16, 16, 10);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        p.enter(&slot, G, F);
        p.exit(&slot, G, F);
        p.exit(&slot, F, MAIN);

        let f = p.index.lookup_func(F).unwrap();
        assert_eq!(f.calls.load(Ordering::Relaxed), 1);
        assert_eq!(f.funcs.load(Ordering::Relaxed), 2);
        assert_eq!(f.depth.load(Ordering::Relaxed), 2);

        // g never completed a top-level call.
        let g = p.index.lookup_func(G).unwrap();
        assert_eq!(g.calls.load(Ordering::Relaxed), 0);

        let mut f_callers = Vec::new();
        f.for_each_caller(&mut |c| {
            f_callers.push((
                c.addr(),
                c.calls.load(Ordering::Relaxed),
                c.calling.load(Ordering::Relaxed),
            ));
        });
        // (main -> f) called once and made one nested call.
        assert_eq!(f_callers, vec![(MAIN, 1, 1)]);

        let mut g_callers = Vec::new();
        g.for_each_caller(&mut |c| {
            g_callers.push((
                c.addr(),
                c.calls.load(Ordering::Relaxed),
                c.calling.load(Ordering::Relaxed),
            ));
        });
        assert_eq!(g_callers, vec![(F, 1, 0)]);
    }

    #[test]
    fn test_two_threads_same_function() {
        use std::sync::Arc;

        let p = Arc::new(profiler(16, 16, 10));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let p = Arc::clone(&p);
                std::thread::spawn(move || {
                    let slot = ThreadSlot::new();
                    p.enter(&slot, H, MAIN);
                    p.exit(&slot, H, MAIN);
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let h = p.index.lookup_func(H).unwrap();
        assert_eq!(h.calls.load(Ordering::Relaxed), 2);
        assert!(p.max_threads.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_function_pool_exhaustion_latches() {
        let p = profiler(2, 16, 10);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        p.exit(&slot, F, MAIN);
        p.enter(&slot, G, MAIN);
        p.exit(&slot, G, MAIN);
        p.enter(&slot, H, MAIN);

        assert!(p.flags.errored());
        assert!(p.flags.func_pool_exhausted());
        // Further hooks are no-ops.
        p.enter(&slot, 0x4000, MAIN);
        assert_eq!(p.index.func_pool().used(), 2);
    }

    #[test]
    fn test_stack_exhaustion_latches() {
        let p = profiler(16, 16, 1);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        assert!(!p.flags.errored());
        p.enter(&slot, G, F);
        assert!(p.flags.stack_exhausted());
        assert!(p.flags.errored());
    }

    #[test]
    fn test_thread_cleanup_completes_bottom_frame() {
        let p = profiler(16, 16, 10);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        // Thread exits from inside f: bottom frame completes, no unwind.
        p.thread_cleanup(&slot);

        let f = p.index.lookup_func(F).unwrap();
        assert_eq!(f.calls.load(Ordering::Relaxed), 1);
        assert_eq!(f.unwind.load(Ordering::Relaxed), 0);
        assert!(slot.get().is_null());
    }

    #[test]
    fn test_thread_cleanup_unwinds_nested_frames() {
        let p = profiler(16, 16, 10);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        p.enter(&slot, G, F);
        p.thread_cleanup(&slot);

        let f = p.index.lookup_func(F).unwrap();
        // Deeper than one frame: everything counts as force-unwound.
        assert_eq!(f.calls.load(Ordering::Relaxed), 1);
        assert_eq!(f.unwind.load(Ordering::Relaxed), 2);

        let g = p.index.lookup_func(G).unwrap();
        let mut g_unwinds = Vec::new();
        g.for_each_caller(&mut |c| g_unwinds.push(c.unwind.load(Ordering::Relaxed)));
        assert_eq!(g_unwinds, vec![1]);
    }

    #[test]
    fn test_collect_final_sweeps_abandoned_stacks() {
        let p = profiler(16, 16, 10);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        p.enter(&slot, G, F);
        // No exits, no cleanup: simulates exit() with a live thread.
        let stats = p.collect_final();
        assert!(stats.is_some());

        let f = p.index.lookup_func(F).unwrap();
        assert_eq!(f.calls.load(Ordering::Relaxed), 1);
        assert_eq!(f.unwind.load(Ordering::Relaxed), 2);
        // The record was popped and freed; drop the stale handle.
        slot.take();
    }

    #[test]
    fn test_daemon_mode_defers_writing_to_the_child() {
        let p = Profiler::new(Config { daemon: true, ..Config::default() });
        // Same process as init: the parent stays quiet in daemon mode.
        assert!(!p.should_write());

        let p = Profiler::new(Config::default());
        assert!(p.should_write());
    }

    #[test]
    fn test_disabled_profiler_is_inert() {
        let p = Profiler::new(Config { disabled: true, ..Config::default() });
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        assert!(slot.get().is_null());
        assert_eq!(p.index.func_pool().used(), 0);
    }

    #[test]
    fn test_cpu_time_monotonicity() {
        let p = profiler(16, 16, 10);
        let slot = ThreadSlot::new();
        p.enter(&slot, F, MAIN);
        // Burn CPU inside the frame so spent time is visible.
        let mut x = 0u64;
        for i in 0..200_000u64 {
            x = x.wrapping_add(i * i);
        }
        std::hint::black_box(x);
        p.exit(&slot, F, MAIN);

        let f = p.index.lookup_func(F).unwrap();
        let mut caller_total = 0;
        f.for_each_caller(&mut |c| caller_total += c.total_nanos());
        // Function totals cover the whole top-level call, which is at least
        // the self time attributed to the only (func, caller) pair.
        assert!(f.total_nanos() >= caller_total);
    }
}
