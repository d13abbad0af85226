//! Process-wide function → caller → counters index.
//!
//! Lookup structure: a fixed hash bucket (by address low bits) of binary
//! search trees of [`FuncRecord`]s; each function record owns a smaller
//! bucket of trees of [`CallerRecord`]s keyed by caller address. Lookups are
//! lock-free traversals of acquire-loaded atomic pointers; insertion takes a
//! spin lock, rechecks the slot it lost the race on, bump-allocates from the
//! pool and publishes with a release store. Published nodes are immutable
//! except for their counters, and no node is ever unlinked.

use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::pool::Pool;
use crate::spin::SpinLock;

/// Buckets in the top-level function table.
pub const FUNC_TABLE_SIZE: usize = 64;

/// Buckets in each function's caller table. Smaller on 64-bit targets where
/// the record layout leaves room for only eight root slots per cache pair.
pub const CALLER_TABLE_SIZE: usize = if usize::BITS > 32 { 8 } else { 16 };

/// Aggregate for one (function, caller) pair. Cache-line sized.
#[repr(align(64))]
pub struct CallerRecord {
    left: AtomicPtr<CallerRecord>,
    right: AtomicPtr<CallerRecord>,
    addr: AtomicUsize,
    /// Entries through this call site.
    pub calls: AtomicU64,
    /// Thread-CPU nanosecond part attributed to the pair.
    pub nsecs: AtomicU64,
    /// Thread-CPU second part attributed to the pair.
    pub secs: AtomicU64,
    /// Nested calls made while this pair was on a stack.
    pub calling: AtomicU64,
    /// Frames popped by the unwinder instead of the exit hook.
    pub unwind: AtomicU32,
}

impl Default for CallerRecord {
    fn default() -> Self {
        Self {
            left: AtomicPtr::new(std::ptr::null_mut()),
            right: AtomicPtr::new(std::ptr::null_mut()),
            addr: AtomicUsize::new(0),
            calls: AtomicU64::new(0),
            nsecs: AtomicU64::new(0),
            secs: AtomicU64::new(0),
            calling: AtomicU64::new(0),
            unwind: AtomicU32::new(0),
        }
    }
}

impl CallerRecord {
    #[must_use]
    pub fn addr(&self) -> usize {
        self.addr.load(Ordering::Relaxed)
    }

    /// Combined CPU time in nanoseconds.
    #[must_use]
    pub fn total_nanos(&self) -> u64 {
        self.secs
            .load(Ordering::Relaxed)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(self.nsecs.load(Ordering::Relaxed))
    }
}

/// Aggregate for one instrumented function. Two cache lines.
#[repr(align(128))]
pub struct FuncRecord {
    left: AtomicPtr<FuncRecord>,
    right: AtomicPtr<FuncRecord>,
    addr: AtomicUsize,
    callers: [AtomicPtr<CallerRecord>; CALLER_TABLE_SIZE],
    /// Completed top-level invocations rooted at this function.
    pub calls: AtomicU64,
    /// Function entries performed during those invocations.
    pub funcs: AtomicU64,
    /// Thread-CPU nanosecond part over those invocations.
    pub nsecs: AtomicU64,
    /// Thread-CPU second part over those invocations.
    pub secs: AtomicU64,
    /// Frames force-unwound during those invocations.
    pub unwind: AtomicU32,
    /// Maximum stack depth observed while this function was the root.
    pub depth: AtomicU32,
}

impl Default for FuncRecord {
    fn default() -> Self {
        Self {
            left: AtomicPtr::new(std::ptr::null_mut()),
            right: AtomicPtr::new(std::ptr::null_mut()),
            addr: AtomicUsize::new(0),
            callers: std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut())),
            calls: AtomicU64::new(0),
            funcs: AtomicU64::new(0),
            nsecs: AtomicU64::new(0),
            secs: AtomicU64::new(0),
            unwind: AtomicU32::new(0),
            depth: AtomicU32::new(0),
        }
    }
}

impl FuncRecord {
    #[must_use]
    pub fn addr(&self) -> usize {
        self.addr.load(Ordering::Relaxed)
    }

    /// Combined CPU time in nanoseconds.
    #[must_use]
    pub fn total_nanos(&self) -> u64 {
        self.secs
            .load(Ordering::Relaxed)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(self.nsecs.load(Ordering::Relaxed))
    }

    /// Visit every caller record of this function, children before parents.
    pub fn for_each_caller<F: FnMut(&CallerRecord)>(&self, visit: &mut F) {
        for root in &self.callers {
            walk_callers(root.load(Ordering::Acquire), visit);
        }
    }
}

fn walk_callers<F: FnMut(&CallerRecord)>(node: *mut CallerRecord, visit: &mut F) {
    // SAFETY: published nodes live in the pool until shutdown.
    if let Some(record) = unsafe { node.as_ref() } {
        walk_callers(record.left.load(Ordering::Acquire), visit);
        walk_callers(record.right.load(Ordering::Acquire), visit);
        visit(record);
    }
}

fn walk_funcs<F: FnMut(&FuncRecord)>(node: *mut FuncRecord, visit: &mut F) {
    // SAFETY: published nodes live in the pool until shutdown.
    if let Some(record) = unsafe { node.as_ref() } {
        walk_funcs(record.left.load(Ordering::Acquire), visit);
        walk_funcs(record.right.load(Ordering::Acquire), visit);
        visit(record);
    }
}

pub struct FunctionIndex {
    roots: [AtomicPtr<FuncRecord>; FUNC_TABLE_SIZE],
    func_pool: Pool<FuncRecord>,
    caller_pool: Pool<CallerRecord>,
    func_lock: SpinLock,
    caller_lock: SpinLock,
}

impl FunctionIndex {
    #[must_use]
    pub fn new(func_pool: Pool<FuncRecord>, caller_pool: Pool<CallerRecord>) -> Self {
        Self {
            roots: std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut())),
            func_pool,
            caller_pool,
            func_lock: SpinLock::new(),
            caller_lock: SpinLock::new(),
        }
    }

    /// Find or insert the record for `addr`.
    ///
    /// Returns `None` only when the function pool is exhausted.
    pub fn lookup_func(&self, addr: usize) -> Option<&FuncRecord> {
        let mut slot = &self.roots[(addr >> 4) & (FUNC_TABLE_SIZE - 1)];
        loop {
            let node = slot.load(Ordering::Acquire);
            // SAFETY: non-null slots point into the pool, valid for &self.
            if let Some(record) = unsafe { node.as_ref() } {
                let found = record.addr();
                if found < addr {
                    slot = &record.left;
                } else if found > addr {
                    slot = &record.right;
                } else {
                    return Some(record);
                }
            } else {
                let guard = self.func_lock.lock();
                if !slot.load(Ordering::Acquire).is_null() {
                    // Lost the insertion race; retry from this slot unlocked.
                    drop(guard);
                    continue;
                }
                let record = self.func_pool.try_alloc()?;
                record.addr.store(addr, Ordering::Relaxed);
                slot.store(
                    std::ptr::from_ref(record).cast_mut(),
                    Ordering::Release,
                );
                return Some(record);
            }
        }
    }

    /// Find or insert the caller record for `addr` under `func`.
    ///
    /// Returns `None` only when the caller pool is exhausted.
    pub fn lookup_caller<'a>(
        &'a self,
        func: &'a FuncRecord,
        addr: usize,
    ) -> Option<&'a CallerRecord> {
        let mut slot = &func.callers[(addr >> 4) & (CALLER_TABLE_SIZE - 1)];
        loop {
            let node = slot.load(Ordering::Acquire);
            // SAFETY: non-null slots point into the pool, valid for &self.
            if let Some(record) = unsafe { node.as_ref() } {
                let found = record.addr();
                if found < addr {
                    slot = &record.left;
                } else if found > addr {
                    slot = &record.right;
                } else {
                    return Some(record);
                }
            } else {
                let guard = self.caller_lock.lock();
                if !slot.load(Ordering::Acquire).is_null() {
                    drop(guard);
                    continue;
                }
                let record = self.caller_pool.try_alloc()?;
                record.addr.store(addr, Ordering::Relaxed);
                slot.store(
                    std::ptr::from_ref(record).cast_mut(),
                    Ordering::Release,
                );
                return Some(record);
            }
        }
    }

    /// Visit every function record, children before parents within each
    /// bucket tree. Only called after all threads have stopped hooking.
    pub fn for_each_func<F: FnMut(&FuncRecord)>(&self, visit: &mut F) {
        for root in &self.roots {
            walk_funcs(root.load(Ordering::Acquire), visit);
        }
    }

    #[must_use]
    pub fn func_pool(&self) -> &Pool<FuncRecord> {
        &self.func_pool
    }

    #[must_use]
    pub fn caller_pool(&self) -> &Pool<CallerRecord> {
        &self.caller_pool
    }
}
