//! Seqlock: a protected scalar with sequence-counter validation.
//!
//! The value is stored inline; readers copy it optimistically and retry if
//! the sequence counter shows a write raced the copy. The writer never waits
//! for readers, making this the right tool for small `Copy` values that are
//! read often and written rarely.
//!
//! # Protocol
//!
//! The sequence counter is even while no write is in progress and odd during
//! one. A read is accepted only when it is bracketed by two observations of
//! the same even sequence number, which proves no writer touched the value
//! inside the read window.
//!
//! # Writers
//!
//! Designed for a single writer. Concurrent writers are serialized by the
//! CAS on the sequence counter but can in principle starve each other under
//! contention; that is accepted rather than hardened against.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering, fence};

/// A single-writer, multi-reader protected value.
///
/// `T` must be `Copy`: readers perform a plain bitwise copy that may observe
/// a torn value mid-write, which the sequence check then discards and retries.
///
/// # Example
///
/// ```
/// use coil::sync::Seqlock;
///
/// let lock = Seqlock::new((0u64, 0u64));
/// lock.write((1, 1));
/// assert_eq!(lock.read(), (1, 1));
/// ```
pub struct Seqlock<T: Copy> {
    /// Even = idle, odd = write in progress.
    seq: AtomicU32,
    value: UnsafeCell<T>,
}

// SAFETY: Readers only ever return copies validated by the sequence
// protocol; the writer's exclusive window is delimited by the odd counter.
unsafe impl<T: Copy + Send> Send for Seqlock<T> {}
unsafe impl<T: Copy + Send> Sync for Seqlock<T> {}

impl<T: Copy> Seqlock<T> {
    /// Creates a seqlock protecting `value`.
    pub const fn new(value: T) -> Self {
        Self {
            seq: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// Returns a consistent copy of the protected value.
    ///
    /// Lock-free: retries while a write is in progress or landed during the
    /// copy, but never blocks the writer. Terminates as long as writes are
    /// not continuous.
    pub fn read(&self) -> T {
        loop {
            let seq1 = self.seq.load(Ordering::Acquire);

            // Optimistic copy; may be torn if a write is racing, in which
            // case the bracket check below rejects it.
            let copy = unsafe { std::ptr::read(self.value.get()) };

            // Order the copy above before the second sequence load.
            fence(Ordering::Acquire);
            let seq2 = self.seq.load(Ordering::Relaxed);

            if seq1 == seq2 && seq1 & 1 == 0 {
                return copy;
            }
            std::hint::spin_loop();
        }
    }

    /// Publishes a new value.
    ///
    /// Wait-free with a single writer. With multiple writers the CAS loop
    /// serializes them (and may spin under contention).
    pub fn write(&self, new: T) {
        let mut seq1 = self.seq.load(Ordering::Relaxed);
        loop {
            if seq1 & 1 == 1 {
                // Another write is in flight; wait for it to finish.
                std::hint::spin_loop();
                seq1 = self.seq.load(Ordering::Relaxed);
                continue;
            }
            // Mark the write in progress by moving the counter to odd.
            match self.seq.compare_exchange_weak(
                seq1,
                seq1.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => seq1 = observed,
            }
        }

        // SAFETY: The counter is odd, so every concurrent read() will retry;
        // the CAS gave this writer exclusive ownership of the window.
        unsafe {
            std::ptr::write(self.value.get(), new);
        }

        // Back to even: the write is complete and visible.
        self.seq.store(seq1.wrapping_add(2), Ordering::Release);
    }
}

impl<T: Copy + Default> Default for Seqlock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
