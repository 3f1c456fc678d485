//! Lock-free SPSC queue of framed variable-length byte messages.
//!
//! A bounded ring of `N` bytes shared by exactly one producer and one
//! consumer. Messages are laid out as `[8-byte LE length][payload]` and may
//! straddle the physical wrap point; the monotonic byte counters never wrap
//! themselves.
//!
//! # Overview
//!
//! - [`Producer`] - write end (single producer per queue)
//! - [`Consumer`] - read end (single consumer per queue)
//! - Wait-free: `push`/`pop` never block, they return
//!   [`PushError::CapacityExceeded`] / `None` instead
//!
//! # Example
//!
//! ```
//! use coil::ring::spsc;
//!
//! let (producer, consumer) = spsc::channel::<64>();
//!
//! producer.push(b"hello").unwrap();
//! assert_eq!(consumer.pop().as_deref(), Some(&b"hello"[..]));
//! assert_eq!(consumer.pop(), None);
//! ```
//!
//! # Synchronization
//!
//! The producer's release-store of the write counter happens after every
//! payload byte is written; the consumer's acquire-load of the same counter
//! happens before it reads any byte. That single edge is all the buffer
//! relies on - individual bytes are not independently synchronized.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ring::layout::{self, Span};
use crate::ring::{HEADER_SIZE, PushError};
use crate::trace::{debug, trace};

/// Interior-mutable counter cache owned by exactly one side of a queue.
///
/// The producer caches the consumer's read offset (and vice versa) to avoid
/// touching the other side's cache line on every operation; the cache is
/// only refreshed when the stale value would reject the operation. Shared
/// with the element queue in [`crate::ring::fixed`].
#[repr(transparent)]
pub(crate) struct OffsetCache(UnsafeCell<u64>);

impl OffsetCache {
    pub(crate) const fn new() -> Self {
        Self(UnsafeCell::new(0))
    }

    /// # Safety
    ///
    /// Only the owning side (the single producer or the single consumer)
    /// may call this.
    #[inline]
    pub(crate) unsafe fn load(&self) -> u64 {
        // SAFETY: Exclusive to the owning role per the SPSC contract.
        unsafe { *self.0.get() }
    }

    /// # Safety
    ///
    /// Only the owning side may call this.
    #[inline]
    pub(crate) unsafe fn store(&self, value: u64) {
        // SAFETY: Exclusive to the owning role per the SPSC contract.
        unsafe { *self.0.get() = value }
    }
}

// SAFETY: Each cache is touched by exactly one role; the role handles are
// not Sync and not Clone, so no two threads can reach the same cache.
unsafe impl Sync for OffsetCache {}
unsafe impl Send for OffsetCache {}

/// Producer-side state: published write offset plus a cached read offset.
#[repr(C, align(64))]
struct ProducerSide {
    /// Monotonic byte offset one past the last published message.
    /// Owned by the producer, acquire-loaded by the consumer.
    write: AtomicU64,

    /// Producer-private cache of the consumer's read offset.
    cached_read: OffsetCache,
}

/// Consumer-side state: read offset plus a cached write offset.
#[repr(C, align(64))]
struct ConsumerSide {
    /// Monotonic byte offset of the next unread message.
    /// Owned by the consumer, acquire-loaded by the producer.
    read: AtomicU64,

    /// Consumer-private cache of the producer's write offset.
    cached_write: OffsetCache,
}

/// Core ring storage: both counter blocks on their own cache lines, then
/// the byte array.
#[repr(C)]
struct FrameRing<const N: usize> {
    producer: ProducerSide,
    consumer: ConsumerSide,
    buffer: UnsafeCell<[u8; N]>,
}

impl<const N: usize> FrameRing<N> {
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
            buffer: UnsafeCell::new([0u8; N]),
        }
    }

    /// Attempts to enqueue one framed message.
    ///
    /// # Safety
    ///
    /// Caller must be the unique producer.
    unsafe fn push(&self, payload: &[u8]) -> Result<(), PushError> {
        let total = HEADER_SIZE + payload.len();
        if total > N {
            // Can never fit, not even into an empty queue.
            return Err(PushError::CapacityExceeded {
                required: total,
                available: N,
            });
        }

        let write = self.producer.write.load(Ordering::Relaxed);

        // SAFETY: We are the unique producer.
        let mut read = unsafe { self.producer.cached_read.load() };

        if (write - read) as usize + total > N {
            // The cached value says full; refresh from the consumer
            // (acquire pairs with its release-store on advance) and retry.
            read = self.consumer.read.load(Ordering::Acquire);
            // SAFETY: We are the unique producer.
            unsafe { self.producer.cached_read.store(read) };

            let occupied = (write - read) as usize;
            if occupied + total > N {
                trace!(
                    required = total,
                    occupied,
                    capacity = N,
                    "push rejected, insufficient space"
                );
                return Err(PushError::CapacityExceeded {
                    required: total,
                    available: N - occupied,
                });
            }
        }

        let storage = self.buffer.get().cast::<u8>();
        let header = (payload.len() as u64).to_le_bytes();

        // SAFETY: The region [write, write + total) is unpublished and
        // outside [read, write), so the consumer will not touch it until the
        // release-store below; total <= N was checked above.
        unsafe {
            layout::copy_in::<N>(storage, Span::new(write, HEADER_SIZE), &header);
            layout::copy_in::<N>(
                storage,
                Span::new(write + HEADER_SIZE as u64, payload.len()),
                payload,
            );
        }

        // Publish: after this store the consumer may read every byte above.
        self.producer
            .write
            .store(write + total as u64, Ordering::Release);

        Ok(())
    }

    /// Attempts to dequeue one framed message.
    ///
    /// # Safety
    ///
    /// Caller must be the unique consumer.
    unsafe fn pop(&self) -> Option<Vec<u8>> {
        let read = self.consumer.read.load(Ordering::Relaxed);

        // SAFETY: We are the unique consumer.
        let mut write = unsafe { self.consumer.cached_write.load() };

        if write == read {
            // The cached value says empty; refresh from the producer.
            write = self.producer.write.load(Ordering::Acquire);
            // SAFETY: We are the unique consumer.
            unsafe { self.consumer.cached_write.store(write) };

            if write == read {
                return None;
            }
        }

        let storage = self.buffer.get().cast::<u8>().cast_const();

        let mut header = [0u8; HEADER_SIZE];
        // SAFETY: [read, write) is published; write != read implies at least
        // one whole framed message (the producer only publishes whole frames).
        unsafe { layout::copy_out::<N>(storage, Span::new(read, HEADER_SIZE), &mut header) };
        let len = u64::from_le_bytes(header) as usize;
        let total = (HEADER_SIZE + len) as u64;

        // Defensive: a header pointing past the published boundary would mean
        // a torn publish. Unreachable given the release/acquire pairing, but
        // cheap to treat as "no message available yet".
        if read + total > write {
            debug!(read, write, len, "header exceeds published boundary");
            return None;
        }

        let mut payload = vec![0u8; len];
        // SAFETY: The whole frame is inside the published region.
        unsafe {
            layout::copy_out::<N>(storage, Span::new(read + HEADER_SIZE as u64, len), &mut payload)
        };

        // Release the bytes back to the producer.
        self.consumer.read.store(read + total, Ordering::Release);

        Some(payload)
    }
}

// SAFETY: Concurrent access is mediated by the atomic counters with
// release/acquire ordering; buffer bytes are only touched on the correct
// side of the published boundary, and the caches are role-exclusive.
unsafe impl<const N: usize> Send for FrameRing<N> {}
unsafe impl<const N: usize> Sync for FrameRing<N> {}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the queue.
///
/// Not `Clone` and not `Sync`: exactly one thread at a time can push, which
/// is what the ring's safety argument relies on.
pub struct Producer<const N: usize> {
    ring: Arc<FrameRing<N>>,
    _unsync: PhantomUnsync,
}

/// Read end of the queue. Same ownership rules as [`Producer`].
pub struct Consumer<const N: usize> {
    ring: Arc<FrameRing<N>>,
    _unsync: PhantomUnsync,
}

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    /// Compile-time assertion that the ring can hold at least a header and
    /// one payload byte.
    const OK: () = assert!(N > HEADER_SIZE, "capacity must exceed the 8-byte header");
}

/// Creates a framed SPSC channel over an `N`-byte ring.
///
/// Returns a `(Producer, Consumer)` pair; each may be sent to its own
/// thread. Fails to compile if `N <= 8`.
#[must_use]
pub fn channel<const N: usize>() -> (Producer<N>, Consumer<N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(FrameRing::new());

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

impl<const N: usize> Producer<N> {
    /// Attempts to enqueue `payload` as one message (wait-free).
    ///
    /// A framed message of exactly `N` bytes is accepted only when the queue
    /// is completely empty.
    ///
    /// # Errors
    ///
    /// [`PushError::CapacityExceeded`] when the framed message exceeds the
    /// free space (or the total capacity). The queue is unchanged; retry or
    /// drop.
    #[inline]
    pub fn push(&self, payload: &[u8]) -> Result<(), PushError> {
        // SAFETY: This handle is the unique producer (not Clone, not Sync).
        unsafe { self.ring.push(payload) }
    }
}

impl<const N: usize> Consumer<N> {
    /// Attempts to dequeue the oldest message (wait-free).
    ///
    /// Returns `None` if the queue is empty; repeated empty pops are
    /// idempotent and never move the counters.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<Vec<u8>> {
        // SAFETY: This handle is the unique consumer (not Clone, not Sync).
        unsafe { self.ring.pop() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_push_pop() {
        let (producer, consumer) = channel::<64>();

        producer.push(&[0x48, 0x65, 0x6c, 0x6c, 0x6f]).unwrap();
        assert_eq!(consumer.pop(), Some(vec![0x48, 0x65, 0x6c, 0x6c, 0x6f]));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn fifo_order_and_byte_fidelity() {
        let (producer, consumer) = channel::<128>();

        let messages: Vec<Vec<u8>> = vec![
            vec![0x01, 0x02, 0x03],
            vec![0x0a, 0x0b],
            vec![0xff, 0xfe, 0xfd, 0xfc],
        ];

        for msg in &messages {
            producer.push(msg).unwrap();
        }
        for msg in &messages {
            assert_eq!(consumer.pop().as_ref(), Some(msg));
        }
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn zero_length_payload() {
        let (producer, consumer) = channel::<32>();

        producer.push(&[]).unwrap();
        assert_eq!(consumer.pop(), Some(vec![]));
    }

    #[test]
    fn message_larger_than_capacity_is_rejected() {
        let (producer, _consumer) = channel::<16>();

        let err = producer.push(&[0u8; 9]).unwrap_err();
        assert_eq!(
            err,
            PushError::CapacityExceeded {
                required: 17,
                available: 16
            }
        );
    }

    #[test]
    fn full_capacity_message_requires_empty_queue() {
        let (producer, consumer) = channel::<16>();

        // Framed size 16 == N: legal only because the queue is empty.
        producer.push(&[7u8; 8]).unwrap();
        assert!(producer.push(&[0u8]).is_err());

        assert_eq!(consumer.pop(), Some(vec![7u8; 8]));
        producer.push(&[8u8; 8]).unwrap();
    }

    #[test]
    fn full_queue_rejects_and_leaves_counters_unchanged() {
        let (producer, consumer) = channel::<32>();

        producer.push(&[1u8; 8]).unwrap();
        producer.push(&[2u8; 8]).unwrap();

        let write_before = producer.ring.producer.write.load(Ordering::Relaxed);
        let read_before = producer.ring.consumer.read.load(Ordering::Relaxed);

        // 1-byte payload frames to 9 bytes; only 0 remain.
        assert!(producer.push(&[3u8]).is_err());

        assert_eq!(
            producer.ring.producer.write.load(Ordering::Relaxed),
            write_before
        );
        assert_eq!(
            producer.ring.consumer.read.load(Ordering::Relaxed),
            read_before
        );

        // Draining one message makes room again.
        assert_eq!(consumer.pop(), Some(vec![1u8; 8]));
        producer.push(&[3u8]).unwrap();
    }

    #[test]
    fn wrap_around_preserves_content_and_order() {
        let (producer, consumer) = channel::<32>();

        producer.push(&[0xaa, 0xbb]).unwrap(); // framed 10, offsets 0..10
        producer.push(&[0xcc, 0xdd]).unwrap(); // framed 10, offsets 10..20
        producer.push(&[0xee]).unwrap(); // framed 9, offsets 20..29

        assert_eq!(consumer.pop(), Some(vec![0xaa, 0xbb]));

        // Framed 10 at offsets 29..39: crosses the physical end of the array.
        producer.push(&[0xff, 0x00]).unwrap();

        assert_eq!(consumer.pop(), Some(vec![0xcc, 0xdd]));
        assert_eq!(consumer.pop(), Some(vec![0xee]));
        assert_eq!(consumer.pop(), Some(vec![0xff, 0x00]));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn empty_pop_is_idempotent() {
        let (producer, consumer) = channel::<64>();

        for _ in 0..5 {
            assert_eq!(consumer.pop(), None);
        }
        assert_eq!(consumer.ring.consumer.read.load(Ordering::Relaxed), 0);
        assert_eq!(consumer.ring.producer.write.load(Ordering::Relaxed), 0);

        producer.push(&[1]).unwrap();
        assert_eq!(consumer.pop(), Some(vec![1]));
        let read = consumer.ring.consumer.read.load(Ordering::Relaxed);
        for _ in 0..5 {
            assert_eq!(consumer.pop(), None);
        }
        assert_eq!(consumer.ring.consumer.read.load(Ordering::Relaxed), read);
    }

    #[test]
    fn interleaved_operations() {
        let (producer, consumer) = channel::<128>();

        producer.push(&[0x10, 0x20]).unwrap();
        assert_eq!(consumer.pop(), Some(vec![0x10, 0x20]));

        producer.push(&[0x30, 0x40]).unwrap();
        producer.push(&[0x50, 0x60]).unwrap();
        assert_eq!(consumer.pop(), Some(vec![0x30, 0x40]));
        assert_eq!(consumer.pop(), Some(vec![0x50, 0x60]));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn many_rounds_of_wrapping() {
        let (producer, consumer) = channel::<32>();

        for round in 0..50u8 {
            producer.push(&[round, round.wrapping_add(1)]).unwrap();
            producer.push(&[round ^ 0xff]).unwrap();
            assert_eq!(consumer.pop(), Some(vec![round, round.wrapping_add(1)]));
            assert_eq!(consumer.pop(), Some(vec![round ^ 0xff]));
            assert_eq!(consumer.pop(), None);
        }
    }

    #[test]
    fn concurrent_push_pop() {
        let (producer, consumer) = channel::<256>();
        let count = 1000u64;

        let producer_handle = std::thread::spawn(move || {
            for i in 0..count {
                let payload = i.to_le_bytes();
                while producer.push(&payload).is_err() {
                    std::hint::spin_loop();
                }
            }
        });

        let consumer_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count as usize);
            while received.len() < count as usize {
                if let Some(payload) = consumer.pop() {
                    received.push(u64::from_le_bytes(payload.try_into().unwrap()));
                } else {
                    std::hint::spin_loop();
                }
            }
            received
        });

        producer_handle.join().unwrap();
        let received = consumer_handle.join().unwrap();

        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }
}
