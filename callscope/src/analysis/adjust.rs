//! Measurement-overhead subtraction.
//!
//! Every hook pair costs a roughly constant number of nanoseconds of
//! thread-CPU time (two clock reads plus bookkeeping), measured offline by
//! the `calibrate` helper and passed in with `-g`. Each record is charged
//! for the hook invocations that executed while its time was being
//! accumulated; unwound frames never ran their exit hook and are credited
//! back.

use super::join::Dataset;

/// Maximum accepted per-pair adjustment in nanoseconds.
pub const MAX_ADJUST_NS: u64 = 100_000;

/// Subtract hook overhead and fill per-call averages.
///
/// Per trace the overhead is `adjust × (calls + calling − unwind)`; per
/// thread record it is `adjust × (2·funcs − calls − unwind)`. Subtraction
/// clamps at zero, it never wraps. With `adjust_ns == 0` only the averages
/// are computed.
pub fn apply_adjustment(ds: &mut Dataset, adjust_ns: u64) {
    for trace in &mut ds.traces {
        let pairs = trace.calls.saturating_add(trace.calling).saturating_sub(trace.unwind);
        trace.nsecs = trace.nsecs.saturating_sub(adjust_ns.saturating_mul(pairs));
    }

    for job in &mut ds.jobs {
        let pairs =
            job.funcs.saturating_mul(2).saturating_sub(job.calls.saturating_add(job.unwind));
        job.nsecs = job.nsecs.saturating_sub(adjust_ns.saturating_mul(pairs));
        // Completed roots always have calls >= 1; stay safe on crafted input.
        job.avg = job.nsecs / job.calls.max(1);
    }
}
