//! Lock-free SPSC queue of fixed-size elements with batch operations.
//!
//! Unlike the framed byte queue in [`crate::ring::spsc`], this ring stores
//! `N` slots of one `Copy` type and counts in elements, not bytes - no
//! headers, no variable-size framing. What it adds is batching:
//! [`Producer::push_many`] and [`Consumer::pop_many`] move a whole run of
//! elements under a single counter update, all-or-nothing.
//!
//! # Example
//!
//! ```
//! use coil::ring::fixed;
//!
//! let (producer, consumer) = fixed::channel::<u32, 8>();
//!
//! producer.push_many(&[1, 2, 3]).unwrap();
//! assert_eq!(consumer.pop(), Some(1));
//! assert_eq!(consumer.pop_many(2), Some(vec![2, 3]));
//! assert_eq!(consumer.pop(), None);
//! ```

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::ring::layout::Span;
use crate::ring::spsc::OffsetCache;
use crate::trace::trace;

/// Error returned when a batch cannot be enqueued.
///
/// Recoverable: the queue state is unchanged and the caller may retry later
/// or drop the batch.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The batch does not fit: either it exceeds the slot count outright, or
    /// the currently occupied slots leave too little room. Batches are never
    /// split.
    #[error("batch of {required} elements needs more room than the {available} free slots")]
    CapacityExceeded { required: usize, available: usize },
}

/// Producer-side state: published write index plus a cached read index.
#[repr(C, align(64))]
struct ProducerSide {
    /// Monotonic element index one past the last published slot.
    /// Owned by the producer, acquire-loaded by the consumer.
    write: AtomicU64,

    /// Producer-private cache of the consumer's read index.
    cached_read: OffsetCache,
}

/// Consumer-side state: read index plus a cached write index.
#[repr(C, align(64))]
struct ConsumerSide {
    /// Monotonic element index of the next unread slot.
    /// Owned by the consumer, acquire-loaded by the producer.
    read: AtomicU64,

    /// Consumer-private cache of the producer's write index.
    cached_write: OffsetCache,
}

/// Core ring storage: both counter blocks on their own cache lines, then
/// the slot array.
#[repr(C)]
struct ElementRing<T, const N: usize> {
    producer: ProducerSide,
    consumer: ConsumerSide,
    /// Slots outside `[read % N, write % N)` are uninitialized; the counters
    /// are the only record of which slots hold values.
    slots: UnsafeCell<[MaybeUninit<T>; N]>,
}

impl<T: Copy, const N: usize> ElementRing<T, N> {
    fn new() -> Self {
        Self {
            producer: ProducerSide {
                write: AtomicU64::new(0),
                cached_read: OffsetCache::new(),
            },
            consumer: ConsumerSide {
                read: AtomicU64::new(0),
                cached_write: OffsetCache::new(),
            },
            slots: UnsafeCell::new([const { MaybeUninit::uninit() }; N]),
        }
    }

    /// Attempts to enqueue `values` as one batch.
    ///
    /// # Safety
    ///
    /// Caller must be the unique producer.
    unsafe fn push_many(&self, values: &[T]) -> Result<(), PushError> {
        if values.len() > N {
            // Can never fit, not even into an empty queue.
            return Err(PushError::CapacityExceeded {
                required: values.len(),
                available: N,
            });
        }

        let write = self.producer.write.load(Ordering::Relaxed);

        // SAFETY: We are the unique producer.
        let mut read = unsafe { self.producer.cached_read.load() };

        if (write - read) as usize + values.len() > N {
            // The cached value says full; refresh from the consumer
            // (acquire pairs with its release-store on advance) and retry.
            read = self.consumer.read.load(Ordering::Acquire);
            // SAFETY: We are the unique producer.
            unsafe { self.producer.cached_read.store(read) };

            let occupied = (write - read) as usize;
            if occupied + values.len() > N {
                trace!(
                    required = values.len(),
                    occupied,
                    capacity = N,
                    "batch push rejected, insufficient slots"
                );
                return Err(PushError::CapacityExceeded {
                    required: values.len(),
                    available: N - occupied,
                });
            }
        }

        let storage = self.slots.get().cast::<MaybeUninit<T>>();
        let (head, tail) = Span::new(write, values.len()).split::<N>();

        // SAFETY: The slots [write, write + len) are unpublished and outside
        // [read, write), so the consumer will not touch them until the
        // release-store below; head/tail are in-bounds ranges of the array.
        unsafe {
            std::ptr::copy_nonoverlapping(
                values.as_ptr(),
                storage.add(head.start).cast::<T>(),
                head.len(),
            );
            if let Some(tail) = tail {
                std::ptr::copy_nonoverlapping(
                    values.as_ptr().add(head.len()),
                    storage.cast::<T>(),
                    tail.len(),
                );
            }
        }

        // Publish the whole batch at once.
        self.producer
            .write
            .store(write + values.len() as u64, Ordering::Release);

        Ok(())
    }

    /// Attempts to dequeue exactly `count` elements.
    ///
    /// # Safety
    ///
    /// Caller must be the unique consumer.
    unsafe fn pop_many(&self, count: usize) -> Option<Vec<T>> {
        let read = self.consumer.read.load(Ordering::Relaxed);

        // SAFETY: We are the unique consumer.
        let mut write = unsafe { self.consumer.cached_write.load() };

        if ((write - read) as usize) < count {
            // The cached value says not enough; refresh from the producer.
            write = self.producer.write.load(Ordering::Acquire);
            // SAFETY: We are the unique consumer.
            unsafe { self.consumer.cached_write.store(write) };

            if ((write - read) as usize) < count {
                return None;
            }
        }

        let storage = self.slots.get().cast::<MaybeUninit<T>>().cast_const();
        let (head, tail) = Span::new(read, count).split::<N>();

        let mut out = Vec::with_capacity(count);
        // SAFETY: The slots [read, read + count) are published and
        // initialized; head/tail are in-bounds ranges of the array, and the
        // destination has capacity for `count` elements.
        unsafe {
            std::ptr::copy_nonoverlapping(
                storage.add(head.start).cast::<T>(),
                out.as_mut_ptr(),
                head.len(),
            );
            if let Some(tail) = tail {
                std::ptr::copy_nonoverlapping(
                    storage.cast::<T>(),
                    out.as_mut_ptr().add(head.len()),
                    tail.len(),
                );
            }
            out.set_len(count);
        }

        // Release the slots back to the producer in one step.
        self.consumer
            .read
            .store(read + count as u64, Ordering::Release);

        Some(out)
    }
}

// SAFETY: Concurrent access is mediated by the atomic counters with
// release/acquire ordering; slots are only touched on the correct side of
// the published boundary, and the caches are role-exclusive.
unsafe impl<T: Send, const N: usize> Send for ElementRing<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for ElementRing<T, N> {}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the queue. Not `Clone`, not `Sync`.
pub struct Producer<T: Copy + Send, const N: usize> {
    ring: Arc<ElementRing<T, N>>,
    _unsync: PhantomUnsync,
}

/// Read end of the queue. Same ownership rules as [`Producer`].
pub struct Consumer<T: Copy + Send, const N: usize> {
    ring: Arc<ElementRing<T, N>>,
    _unsync: PhantomUnsync,
}

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    const OK: () = assert!(N > 0, "queue needs at least one slot");
}

/// Creates an SPSC channel over `N` slots of `T`.
///
/// Returns a `(Producer, Consumer)` pair; each may be sent to its own
/// thread. Fails to compile if `N == 0`.
#[must_use]
pub fn channel<T: Copy + Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(ElementRing::new());

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

impl<T: Copy + Send, const N: usize> Producer<T, N> {
    /// Attempts to enqueue one element (wait-free).
    ///
    /// # Errors
    ///
    /// [`PushError::CapacityExceeded`] when every slot is occupied. The
    /// queue is unchanged; retry or drop.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), PushError> {
        self.push_many(std::slice::from_ref(&value))
    }

    /// Attempts to enqueue `values` as one batch (wait-free).
    ///
    /// All-or-nothing: the batch is published under a single counter update,
    /// so the consumer never observes a partial batch.
    ///
    /// # Errors
    ///
    /// [`PushError::CapacityExceeded`] when the free slots cannot hold the
    /// whole batch. The queue is unchanged; retry or drop.
    #[inline]
    pub fn push_many(&self, values: &[T]) -> Result<(), PushError> {
        // SAFETY: This handle is the unique producer (not Clone, not Sync).
        unsafe { self.ring.push_many(values) }
    }
}

impl<T: Copy + Send, const N: usize> Consumer<T, N> {
    /// Attempts to dequeue the oldest element (wait-free).
    ///
    /// Returns `None` if the queue is empty; empty pops never move the
    /// counters.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: This handle is the unique consumer (not Clone, not Sync).
        unsafe { self.ring.pop_many(1) }.map(|batch| batch[0])
    }

    /// Attempts to dequeue exactly `count` elements (wait-free).
    ///
    /// All-or-nothing: returns `None` when fewer than `count` elements are
    /// available, consuming nothing. A smaller batch already in the queue
    /// stays readable with a smaller `count`.
    #[inline]
    #[must_use]
    pub fn pop_many(&self, count: usize) -> Option<Vec<T>> {
        // SAFETY: This handle is the unique consumer (not Clone, not Sync).
        unsafe { self.ring.pop_many(count) }
    }
}
