//! Monotonic clock sampling and split-second time arithmetic.
//!
//! Thread-CPU and process-CPU readings drive all accounting. Seconds and
//! nanoseconds are kept separate until dump time so decades of accumulated
//! CPU time cannot overflow a nanosecond counter.

use std::io;
use std::mem::MaybeUninit;

/// A `(seconds, nanoseconds)` pair as returned by the OS clocks.
///
/// The nanosecond part is only normalized by [`delta_since`]; accumulation
/// via [`accumulate`] may push it past one second, which is fine because
/// consumers always combine both parts through [`total_nanos`].
///
/// [`delta_since`]: TimeSpec::delta_since
/// [`accumulate`]: TimeSpec::accumulate
/// [`total_nanos`]: TimeSpec::total_nanos
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub secs: i64,
    pub nsecs: i64,
}

impl TimeSpec {
    /// Difference `self − earlier`, with the nanosecond borrow applied.
    #[must_use]
    pub fn delta_since(self, earlier: TimeSpec) -> TimeSpec {
        let mut secs = self.secs - earlier.secs;
        let mut nsecs = self.nsecs - earlier.nsecs;
        if nsecs < 0 {
            nsecs += 1_000_000_000;
            secs -= 1;
        }
        TimeSpec { secs, nsecs }
    }

    /// Add another sample into this accumulator, without normalizing.
    pub fn accumulate(&mut self, other: TimeSpec) {
        self.secs += other.secs;
        self.nsecs += other.nsecs;
    }

    /// Combined value in nanoseconds.
    #[must_use]
    pub fn total_nanos(self) -> u64 {
        (self.secs as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(self.nsecs as u64)
    }
}

fn sample(clock_id: libc::clockid_t) -> io::Result<TimeSpec> {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: clock_gettime fills the timespec on success; we only read it
    // after checking the return value.
    let rc = unsafe { libc::clock_gettime(clock_id, ts.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let ts = unsafe { ts.assume_init() };
    Ok(TimeSpec { secs: ts.tv_sec as i64, nsecs: ts.tv_nsec as i64 })
}

/// CPU time consumed by the calling thread.
pub fn thread_cpu() -> io::Result<TimeSpec> {
    sample(libc::CLOCK_THREAD_CPUTIME_ID)
}

/// CPU time consumed by the whole process.
pub fn process_cpu() -> io::Result<TimeSpec> {
    sample(libc::CLOCK_PROCESS_CPUTIME_ID)
}

/// Monotonic wall clock, used for total runtime.
pub fn monotonic() -> io::Result<TimeSpec> {
    sample(libc::CLOCK_MONOTONIC)
}
