//! Joining traces, thread records, symbol data and maps into one dataset.
//!
//! Traces are kept sorted by (function, caller address); a second index
//! orders them by (caller id, caller address) for the caller search. Each
//! unique resolved function gets a compact `func_id`; every caller address
//! is resolved to the `func_id` of the function with the same name and
//! source file — addresses may differ because calls go through PLT stubs,
//! so the match is by symbol, not by address.

use callscope_common::{MapLine, RunInfo};

use crate::domain::{AddrInfo, AnalyzeError};
use crate::trace_data::TraceFile;

/// Unresolved id marker.
pub const NO_ID: i64 = -1;

/// One `TRACE:` record with joined symbol and map references.
#[derive(Debug, Clone)]
pub struct Trace {
    pub func: u64,
    pub caller: u64,
    pub calls: u64,
    pub nsecs: u64,
    pub calling: u64,
    pub unwind: u64,
    /// Index into [`Dataset::addrs`] for the function address.
    pub func_sym: Option<usize>,
    /// Index into [`Dataset::addrs`] for the caller address.
    pub caller_sym: Option<usize>,
    /// Index into [`Dataset::maps`] covering the function address.
    pub func_map: Option<usize>,
    /// Index into [`Dataset::maps`] covering the caller address.
    pub caller_map: Option<usize>,
    /// Compact id of the function; [`NO_ID`] when unresolved.
    pub func_id: i64,
    /// `func_id` of the calling function; [`NO_ID`] when unresolved.
    pub caller_id: i64,
}

/// One `THREAD:` record with joined symbol and map references.
#[derive(Debug, Clone)]
pub struct Job {
    pub func: u64,
    pub calls: u64,
    pub nsecs: u64,
    pub funcs: u64,
    pub unwind: u64,
    pub depth: u64,
    /// Per-call average, filled by the adjustment step.
    pub avg: u64,
    pub sym: Option<usize>,
    pub map: Option<usize>,
}

/// Everything the reports work from.
pub struct Dataset {
    pub cmd: Option<String>,
    pub info: RunInfo,
    /// Sorted by region start.
    pub maps: Vec<MapLine>,
    /// Sorted by address.
    pub addrs: Vec<AddrInfo>,
    /// Sorted by (function address, caller address).
    pub traces: Vec<Trace>,
    /// Trace indices sorted by (caller id, caller address).
    pub by_caller_id: Vec<usize>,
    /// Sorted by function address.
    pub jobs: Vec<Job>,
    /// Descending power-of-two start step for the id searches.
    pub base: i64,
}

impl Dataset {
    /// Join a parsed dump with its symbolized addresses.
    ///
    /// Fails with [`AnalyzeError::IncompleteInput`] when the dump carried no
    /// `TRACE:` line.
    pub fn build(tf: TraceFile, mut addrs: Vec<AddrInfo>) -> Result<Self, AnalyzeError> {
        if tf.traces.is_empty() {
            return Err(AnalyzeError::IncompleteInput);
        }

        let mut maps = tf.maps;
        maps.sort_by_key(|m| m.start);
        addrs.sort_by_key(|a| a.addr);

        let mut traces: Vec<Trace> = tf
            .traces
            .iter()
            .map(|t| Trace {
                func: t.func,
                caller: t.caller,
                calls: t.calls,
                nsecs: t.nsecs,
                calling: t.calling,
                unwind: t.unwind,
                func_sym: None,
                caller_sym: None,
                func_map: None,
                caller_map: None,
                func_id: NO_ID,
                caller_id: NO_ID,
            })
            .collect();
        traces.sort_by(|a, b| (a.func, a.caller).cmp(&(b.func, b.caller)));

        let mut jobs: Vec<Job> = tf
            .threads
            .iter()
            .map(|t| Job {
                func: t.func,
                calls: t.calls,
                nsecs: t.nsecs,
                funcs: t.funcs,
                unwind: t.unwind,
                depth: t.depth,
                avg: 0,
                sym: None,
                map: None,
            })
            .collect();
        jobs.sort_by_key(|j| j.func);

        // Attach symbols and maps to jobs.
        merge_exact(&mut jobs, &addrs, |j| j.func, |j, s| j.sym = Some(s));
        merge_range(&mut jobs, &maps, |j| j.func, |j, m| j.map = Some(m));

        // Attach by caller address, over a caller-sorted view.
        let mut by_caller: Vec<usize> = (0..traces.len()).collect();
        by_caller.sort_by_key(|&i| (traces[i].caller, traces[i].func));
        merge_exact_indexed(
            &mut traces,
            &by_caller,
            &addrs,
            |t| t.caller,
            |t, s| t.caller_sym = Some(s),
        );
        merge_range_indexed(
            &mut traces,
            &by_caller,
            &maps,
            |t| t.caller,
            |t, m| t.caller_map = Some(m),
        );

        // Attach by function address over the primary order.
        merge_exact(&mut traces, &addrs, |t| t.func, |t, s| t.func_sym = Some(s));
        merge_range(&mut traces, &maps, |t| t.func, |t, m| t.func_map = Some(m));

        // Compact func ids: one per unique resolved function address.
        let mut next_id = 0i64;
        for i in 0..traces.len() {
            if i > 0 && traces[i - 1].func == traces[i].func {
                traces[i].func_id = traces[i - 1].func_id;
                continue;
            }
            if traces[i].func_sym.is_some() {
                traces[i].func_id = next_id;
                next_id += 1;
            }
        }

        // Caller ids: match the caller's symbol against the resolved
        // functions by name and file.
        for pos in 0..by_caller.len() {
            let i = by_caller[pos];
            if pos > 0 && traces[by_caller[pos - 1]].caller == traces[i].caller {
                traces[i].caller_id = traces[by_caller[pos - 1]].caller_id;
                continue;
            }
            let Some(caller_sym) = traces[i].caller_sym else {
                continue;
            };
            let caller_addr = &addrs[caller_sym];
            let id = traces
                .iter()
                .find(|t| {
                    t.func_id != NO_ID
                        && t.func_sym.is_some_and(|s| {
                            addrs[s].func == caller_addr.func && addrs[s].file == caller_addr.file
                        })
                })
                .map_or(NO_ID, |t| t.func_id);
            traces[i].caller_id = id;
        }

        // Final caller index ordered by (caller id, caller address).
        let mut by_caller_id = by_caller;
        by_caller_id.sort_by_key(|&i| (traces[i].caller_id, traces[i].caller));

        let base = search_base(traces.len());

        Ok(Self { cmd: tf.cmd, info: tf.info, maps, addrs, traces, by_caller_id, jobs, base })
    }

    /// First trace index (primary order) with the given `func_id`.
    #[must_use]
    pub fn search_func(&self, func_id: i64) -> Option<usize> {
        let n = self.traces.len() as i64;
        let mut i = self.base;
        let mut x = self.base;
        loop {
            if i >= n {
                if x == 0 {
                    return None;
                }
                i -= x;
            } else {
                let found = self.traces[i as usize].func_id;
                if found < func_id {
                    if x == 0 {
                        return None;
                    }
                    i += x;
                } else if found > func_id {
                    if i == 0 || x == 0 {
                        return None;
                    }
                    i -= x;
                } else {
                    let mut first = i as usize;
                    while first > 0 && self.traces[first - 1].func_id == func_id {
                        first -= 1;
                    }
                    return Some(first);
                }
            }
            x >>= 1;
        }
    }

    /// First position in [`Self::by_caller_id`] whose trace has
    /// `caller_id == func_id`, i.e. whether (and where) the function with
    /// this id appears as a caller.
    #[must_use]
    pub fn search_caller(&self, func_id: i64) -> Option<usize> {
        let n = self.by_caller_id.len() as i64;
        let mut i = self.base;
        let mut x = self.base;
        loop {
            if i >= n {
                if x == 0 {
                    return None;
                }
                i -= x;
            } else {
                let found = self.traces[self.by_caller_id[i as usize]].caller_id;
                if found < func_id {
                    if x == 0 {
                        return None;
                    }
                    i += x;
                } else if found > func_id {
                    if i == 0 || x == 0 {
                        return None;
                    }
                    i -= x;
                } else {
                    let mut first = i as usize;
                    while first > 0
                        && self.traces[self.by_caller_id[first - 1]].caller_id == func_id
                    {
                        first -= 1;
                    }
                    return Some(first);
                }
            }
            x >>= 1;
        }
    }
}

/// Largest power of two strictly below `n` (0 for n < 2): the starting step
/// of the descending searches.
fn search_base(n: usize) -> i64 {
    if n < 2 {
        return 0;
    }
    let mut step = 1i64;
    while (step as usize) < n {
        step <<= 1;
    }
    // step is the smallest power of two >= n, so half of it is the largest
    // one strictly below n.
    step >> 1
}

/// Two-pointer merge attaching exact address matches.
fn merge_exact<T>(
    items: &mut [T],
    addrs: &[AddrInfo],
    key: impl Fn(&T) -> u64,
    mut set: impl FnMut(&mut T, usize),
) {
    let (mut i, mut j) = (0, 0);
    while i < items.len() && j < addrs.len() {
        if key(&items[i]) < addrs[j].addr {
            i += 1;
        } else if addrs[j].addr < key(&items[i]) {
            j += 1;
        } else {
            set(&mut items[i], j);
            i += 1;
        }
    }
}

/// Two-pointer merge attaching the covering map region.
fn merge_range<T>(
    items: &mut [T],
    maps: &[MapLine],
    key: impl Fn(&T) -> u64,
    mut set: impl FnMut(&mut T, usize),
) {
    let (mut i, mut j) = (0, 0);
    while i < items.len() && j < maps.len() {
        if key(&items[i]) < maps[j].start {
            i += 1;
        } else if key(&items[i]) >= maps[j].end {
            j += 1;
        } else {
            set(&mut items[i], j);
            i += 1;
        }
    }
}

/// [`merge_exact`] over a permutation of trace indices.
fn merge_exact_indexed(
    traces: &mut [Trace],
    order: &[usize],
    addrs: &[AddrInfo],
    key: impl Fn(&Trace) -> u64,
    mut set: impl FnMut(&mut Trace, usize),
) {
    let (mut i, mut j) = (0, 0);
    while i < order.len() && j < addrs.len() {
        let t = order[i];
        if key(&traces[t]) < addrs[j].addr {
            i += 1;
        } else if addrs[j].addr < key(&traces[t]) {
            j += 1;
        } else {
            set(&mut traces[t], j);
            i += 1;
        }
    }
}

/// [`merge_range`] over a permutation of trace indices.
fn merge_range_indexed(
    traces: &mut [Trace],
    order: &[usize],
    maps: &[MapLine],
    key: impl Fn(&Trace) -> u64,
    mut set: impl FnMut(&mut Trace, usize),
) {
    let (mut i, mut j) = (0, 0);
    while i < order.len() && j < maps.len() {
        let t = order[i];
        if key(&traces[t]) < maps[j].start {
            i += 1;
        } else if key(&traces[t]) >= maps[j].end {
            j += 1;
        } else {
            set(&mut traces[t], j);
            i += 1;
        }
    }
}
