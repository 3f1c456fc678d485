//! Read-Copy-Update: a protected pointer with deferred reclamation.
//!
//! One writer publishes new versions of a value by swapping a pointer; any
//! number of readers take borrowed snapshots without ever blocking. The old
//! version is freed only after the writer observes that no reader is still
//! inside its read scope (reader-count quiescence).
//!
//! # Overview
//!
//! - [`Writer`] - write end (exactly one per protected value)
//! - [`Reader`] - read end, cloneable, one per reading thread or shared
//! - [`ReadGuard`] - a scoped snapshot; the pointed-to value is guaranteed
//!   stable for the guard's whole lifetime even if a write lands concurrently
//!
//! # Example
//!
//! ```
//! use coil::sync::rcu;
//!
//! let (writer, reader) = rcu::protect(vec![1u32, 2, 3]);
//!
//! {
//!     let snapshot = reader.read();
//!     assert_eq!(snapshot.len(), 3);
//! }
//!
//! writer.write(vec![4, 5]);
//! assert_eq!(reader.read().len(), 2);
//! ```
//!
//! # Liveness
//!
//! [`Writer::write`] spins (yielding the CPU) until every in-flight reader
//! has dropped its guard. A reader that holds a guard indefinitely stalls
//! the writer forever; in particular, calling `write` on a thread that
//! itself holds a [`ReadGuard`] deadlocks. Readers are expected to keep
//! their read scopes short and bounded.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::trace::trace;

/// Shared state behind both handles.
///
/// `current` is always a valid pointer produced by `Box::into_raw`; it is
/// replaced atomically by the writer and freed either by the writer (old
/// versions, after quiescence) or by `Drop` (the final version, once no
/// handle and therefore no guard can exist).
struct RcuCore<T> {
    current: AtomicPtr<T>,
    active_readers: AtomicUsize,
}

impl<T> Drop for RcuCore<T> {
    fn drop(&mut self) {
        // SAFETY: The core is dropped only once every Writer/Reader handle is
        // gone. ReadGuards borrow their Reader, so no guard can outlive the
        // last handle, and `current` always holds a live Box::into_raw pointer.
        unsafe {
            drop(Box::from_raw(self.current.load(Ordering::Acquire)));
        }
    }
}

// SAFETY: The core is shared across threads; the pointer swap plus the
// quiescence protocol mediate all access to the pointee. Readers get &T,
// so T must be Sync; values cross threads through the core, so T: Send.
unsafe impl<T: Send + Sync> Send for RcuCore<T> {}
unsafe impl<T: Send + Sync> Sync for RcuCore<T> {}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of an RCU-protected value.
///
/// Exactly one `Writer` exists per protected value; it is not `Clone` and
/// not `Sync`, so the single-writer requirement is enforced by ownership
/// rather than by convention.
pub struct Writer<T: Send + Sync> {
    core: Arc<RcuCore<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of an RCU-protected value.
///
/// Cloneable and shareable; any number of threads may hold readers and take
/// snapshots concurrently with each other and with the writer.
pub struct Reader<T: Send + Sync> {
    core: Arc<RcuCore<T>>,
}

impl<T: Send + Sync> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

/// Creates an RCU-protected value, heap-allocating `initial`.
///
/// Returns the unique [`Writer`] and a cloneable [`Reader`].
#[must_use]
pub fn protect<T: Send + Sync>(initial: T) -> (Writer<T>, Reader<T>) {
    let core = Arc::new(RcuCore {
        current: AtomicPtr::new(Box::into_raw(Box::new(initial))),
        active_readers: AtomicUsize::new(0),
    });

    let writer = Writer {
        core: Arc::clone(&core),
        _unsync: PhantomData,
    };

    (writer, Reader { core })
}

/// A borrowed snapshot of the protected value.
///
/// Holding a guard keeps the snapshot's memory alive: the writer will not
/// reclaim any version until this guard (and every other in-flight guard)
/// is dropped. Dereferences to `&T`.
pub struct ReadGuard<'a, T> {
    core: &'a RcuCore<T>,
    snapshot: *const T,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: `snapshot` was loaded while active_readers was already
        // incremented, so the writer cannot have freed it: reclamation only
        // happens after the writer observes active_readers == 0, and our
        // decrement happens in Drop, after the last deref.
        unsafe { &*self.snapshot }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        // Release pairs with the writer's Acquire load in synchronize(),
        // ordering our last read of the snapshot before reclamation.
        self.core.active_readers.fetch_sub(1, Ordering::Release);
    }
}

impl<T: Send + Sync> Reader<T> {
    /// Enters a read scope and returns a stable snapshot of the current value.
    ///
    /// Never blocks and never fails. The returned guard must be dropped for
    /// concurrent writers to make progress reclaiming old versions.
    #[inline]
    #[must_use]
    pub fn read(&self) -> ReadGuard<'_, T> {
        // Register before loading the pointer: once the increment is visible,
        // the writer's quiescence wait covers us, so the loaded snapshot
        // cannot be reclaimed while the guard lives.
        self.core.active_readers.fetch_add(1, Ordering::Acquire);
        let snapshot = self.core.current.load(Ordering::Acquire);
        ReadGuard {
            core: &self.core,
            snapshot,
        }
    }
}

impl<T: Send + Sync> Writer<T> {
    /// Publishes `new` as the current value and reclaims the old version.
    ///
    /// Swaps the pointer, then spins (yielding between checks) until all
    /// readers that may have seen the old pointer have exited their scopes,
    /// then frees the old value. Infallible; see the module docs for the
    /// liveness caveat.
    pub fn write(&self, new: T) {
        let fresh = Box::into_raw(Box::new(new));
        let old = self.core.current.swap(fresh, Ordering::AcqRel);

        self.synchronize();

        // SAFETY: `old` came from Box::into_raw at construction or a previous
        // write. synchronize() observed active_readers == 0 after the swap:
        // readers that entered before the swap have exited, and readers that
        // enter after it load `fresh`. Nobody can still reference `old`.
        unsafe {
            drop(Box::from_raw(old));
        }
    }

    /// Read-modify-write: clones the current value, applies `mutator`, and
    /// publishes the result via [`write`](Writer::write).
    ///
    /// There is no compare-and-swap race handling here because the `Writer`
    /// handle is unique: no other write can interleave between the read and
    /// the publish.
    pub fn update(&self, mutator: impl FnOnce(&mut T))
    where
        T: Clone,
    {
        // SAFETY: We are the sole writer, so the current value cannot be
        // swapped out or reclaimed between this load and the write below.
        let current = unsafe { &*self.core.current.load(Ordering::Acquire) };
        let mut copy = current.clone();
        mutator(&mut copy);
        self.write(copy);
    }

    /// Grace period: waits until no reader is inside a read scope.
    fn synchronize(&self) {
        let mut spins = 0u64;
        while self.core.active_readers.load(Ordering::Acquire) > 0 {
            spins += 1;
            std::thread::yield_now();
        }
        if spins > 0 {
            trace!(spins, "rcu reclamation waited for readers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_initial_value() {
        let (_writer, reader) = protect(42u64);
        assert_eq!(*reader.read(), 42);
    }

    #[test]
    fn write_then_read() {
        let (writer, reader) = protect(String::from("old"));
        writer.write(String::from("new"));
        assert_eq!(*reader.read(), "new");
    }

    #[test]
    fn update_clones_and_mutates() {
        let (writer, reader) = protect(vec![1u32, 2, 3]);
        writer.update(|v| v.push(4));
        assert_eq!(*reader.read(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn cloned_readers_observe_writes() {
        let (writer, reader) = protect(0u32);
        let other = reader.clone();

        writer.write(7);
        assert_eq!(*reader.read(), 7);
        assert_eq!(*other.read(), 7);
    }

    #[test]
    fn guard_count_tracks_scopes() {
        let (_writer, reader) = protect(1u8);

        assert_eq!(reader.core.active_readers.load(Ordering::Relaxed), 0);
        {
            let _a = reader.read();
            let _b = reader.read();
            assert_eq!(reader.core.active_readers.load(Ordering::Relaxed), 2);
        }
        assert_eq!(reader.core.active_readers.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn snapshot_survives_concurrent_write() {
        let (writer, reader) = protect(vec![1u8; 64]);
        let reader2 = reader.clone();

        let t = std::thread::spawn(move || {
            let guard = reader2.read();
            let before = guard.clone();
            // Spin long enough for the writer to land its swap.
            for _ in 0..1000 {
                std::hint::spin_loop();
            }
            assert_eq!(*guard, before);
        });

        writer.write(vec![2u8; 64]);
        t.join().unwrap();

        assert_eq!(*reader.read(), vec![2u8; 64]);
    }

    #[test]
    fn writer_is_send() {
        let (writer, reader) = protect(0u64);
        let t = std::thread::spawn(move || {
            writer.write(99);
        });
        t.join().unwrap();
        assert_eq!(*reader.read(), 99);
    }
}
