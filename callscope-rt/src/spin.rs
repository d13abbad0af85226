//! Test-and-test-and-set spin lock guarding pool insertion.
//!
//! Critical sections are O(1) (a recheck plus a bump allocation), so the
//! lock spins a bounded number of iterations and then yields the scheduler
//! before spinning again. Fairness is not guaranteed.

use std::sync::atomic::{AtomicBool, Ordering};

const SPIN_LIMIT: u32 = 1024;

pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    #[must_use]
    pub const fn new() -> Self {
        Self { locked: AtomicBool::new(false) }
    }

    /// Acquire the lock, spinning with bounded backoff.
    pub fn lock(&self) -> SpinGuard<'_> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return SpinGuard { lock: self };
        }

        let mut spins = SPIN_LIMIT;
        loop {
            if !self.locked.load(Ordering::Relaxed)
                && self
                    .locked
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return SpinGuard { lock: self };
            }
            if spins == 0 {
                // SAFETY: sched_yield has no preconditions.
                unsafe { libc::sched_yield() };
                spins = SPIN_LIMIT;
            } else {
                spins -= 1;
                std::hint::spin_loop();
            }
        }
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
