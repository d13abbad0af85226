//! Offline measurement of per-call `clock_gettime` cost.
//!
//! The instrumentation samples the thread-CPU clock twice per hook pair, so
//! every profiled call carries a roughly constant measurement overhead. This
//! helper times large batches of clock reads on an otherwise idle system and
//! prints the minimum observed per-call cost in nanoseconds; pass that value
//! to the analyzer as `-g` to subtract the overhead from the reports.

use std::hint::black_box;
use std::mem::MaybeUninit;
use std::thread::sleep;
use std::time::Duration;

/// Clock reads per inner batch; per-call results are divided by this.
const BATCH: u64 = 100;

/// One batch must run at least this long before the iteration count is
/// trusted.
const CALIBRATION_FLOOR_NS: u64 = 1_000_000_000;

/// Accumulated measurement time per round.
const ROUND_FLOOR_NS: u64 = 30_000_000_000;

const ROUNDS: usize = 7;

fn read_clock() -> u64 {
    let mut ts = MaybeUninit::<libc::timespec>::uninit();
    // SAFETY: clock_gettime fills the timespec; the thread CPU clock is
    // always available on Linux.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, ts.as_mut_ptr()) };
    if rc != 0 {
        return 0;
    }
    #[allow(unsafe_code)]
    let ts = unsafe { ts.assume_init() };
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}

fn run_batches(iterations: u64) -> u64 {
    let start = read_clock();
    for _ in 0..iterations {
        for _ in 0..BATCH {
            black_box(read_clock());
        }
    }
    read_clock().saturating_sub(start)
}

/// Grow the batch count by decades until one run takes at least a second.
fn estimate_iterations() -> u64 {
    let mut iterations = 1;
    loop {
        if run_batches(iterations) >= CALIBRATION_FLOOR_NS {
            return iterations;
        }
        iterations *= 10;
    }
}

/// Accumulate at least thirty seconds of measurement and average down to a
/// single clock read.
fn measure_round(iterations: u64) -> u64 {
    let mut total = 0u64;
    let mut runs = 0u64;
    loop {
        total += run_batches(iterations);
        runs += 1;
        if total >= ROUND_FLOOR_NS {
            break;
        }
        sleep(Duration::from_millis(500));
    }
    total / (iterations * BATCH * runs)
}

fn main() {
    println!("This will take about 5 minutes. The system should be mostly idle.");
    sleep(Duration::from_secs(5));

    println!("Estimating iterations...");
    let iterations = estimate_iterations();
    sleep(Duration::from_secs(5));

    println!("Measuring clock_gettime correction...");
    let mut best = u64::MAX;
    for _ in 0..ROUNDS {
        best = best.min(measure_round(iterations));
        sleep(Duration::from_secs(5));
    }

    println!("The clock_gettime correction in nanoseconds is: {best}");
    println!(
        "Note that you may have to adjust the above value by a few nanoseconds\n\
         for more precise profiling output."
    );
}
