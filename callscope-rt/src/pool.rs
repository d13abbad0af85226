//! Preallocated record pools.
//!
//! Both pools are sized once at startup and handed out bump-pointer style;
//! nothing is returned before shutdown, so every record address stays valid
//! for the process lifetime. Exhaustion is a terminal condition latched by
//! the caller.

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct Pool<T> {
    slots: Box<[T]>,
    used: AtomicUsize,
}

impl<T: Default> Pool<T> {
    /// Allocate a zero-initialized pool of `capacity` records.
    ///
    /// Returns `None` when the allocation itself fails; the caller latches
    /// the matching exhaustion flag and profiling becomes a no-op.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).ok()?;
        slots.resize_with(capacity, T::default);
        Some(Self { slots: slots.into_boxed_slice(), used: AtomicUsize::new(0) })
    }

    /// A pool that can hold nothing, used after a failed init.
    #[must_use]
    pub fn empty() -> Self {
        Self { slots: Box::new([]), used: AtomicUsize::new(0) }
    }
}

impl<T> Pool<T> {
    /// Hand out the next free record.
    ///
    /// Must be called with the owning index lock held; the `used` counter
    /// itself is atomic only so the dumper can read it without locking.
    pub fn try_alloc(&self) -> Option<&T> {
        let used = self.used.load(Ordering::Relaxed);
        if used == self.slots.len() {
            return None;
        }
        let record = &self.slots[used];
        self.used.store(used + 1, Ordering::Relaxed);
        Some(record)
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bytes held by the record array, reported in the dump INFO section.
    #[must_use]
    pub fn mem_bytes(&self) -> usize {
        self.slots.len() * std::mem::size_of::<T>()
    }
}
