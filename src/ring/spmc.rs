//! Broadcast SPMC ring of framed variable-length byte messages.
//!
//! Same framing and wrap rules as [`crate::ring::spsc`], but one producer
//! multicasts to any number of independent consumers. Each consumer owns a
//! private cursor and sees every message - provided it reads the message
//! before the producer laps it. There is no per-consumer flow control: the
//! producer never waits, so a slow consumer can be overrun.
//!
//! # Overrun policy
//!
//! Two counters separate "data in flight" from "data visible":
//!
//! - `reserve` is advanced *before* the producer touches the buffer (an
//!   acquire RMW, so the buffer writes cannot become visible ahead of it)
//! - `published` is advanced *after* the payload copy completes
//!
//! Consumers validate a copy the way a seqlock read does: copy first, then
//! re-check `reserve`. If the producer's in-flight boundary moved past
//! `cursor + N`, the copied bytes may be torn; the copy is discarded, the
//! cursor resynchronizes to the current `published` boundary (the oldest
//! offset that is certainly an intact frame boundary - everything older is
//! unrecoverable because the framing itself is overwritten), and the caller
//! gets [`ReadError::Lagged`] exactly once for the gap.
//!
//! # Example
//!
//! ```
//! use coil::ring::spmc;
//!
//! let (producer, mut a) = spmc::broadcast::<64>();
//! let mut b = a.clone();
//!
//! producer.push(b"tick").unwrap();
//!
//! let mut buf = [0u8; 16];
//! assert_eq!(a.try_read(&mut buf).unwrap(), 4);
//! assert_eq!(b.try_read(&mut buf).unwrap(), 4); // every consumer sees it
//! ```

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use thiserror::Error;

use crate::ring::layout::{self, Span};
use crate::ring::{HEADER_SIZE, PushError};
use crate::trace::{debug, trace};

/// Error returned by [`Consumer::try_read`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    /// The producer overwrote data this consumer had not read yet. The
    /// cursor has been moved to the live edge; subsequent reads resume with
    /// fresh messages. Recoverable.
    #[error("consumer overrun by the producer; cursor resynchronized to the live edge")]
    Lagged,

    /// The destination buffer cannot hold the next payload. Nothing was
    /// consumed; retry with at least `required` bytes.
    #[error("destination buffer too small, payload is {required} bytes")]
    BufferTooSmall { required: usize },
}

/// Producer counters, one cache line (written only by the producer).
#[repr(C, align(64))]
struct WriteSide {
    /// In-flight boundary: advanced before buffer bytes are written.
    /// Consumers use it to detect overruns and torn copies.
    reserve: AtomicU64,

    /// Published boundary: advanced after the full payload copy. The only
    /// counter that makes a message visible.
    published: AtomicU64,
}

#[repr(C)]
struct BroadcastRing<const N: usize> {
    writer: WriteSide,
    buffer: UnsafeCell<[u8; N]>,
}

impl<const N: usize> BroadcastRing<N> {
    fn new() -> Self {
        Self {
            writer: WriteSide {
                reserve: AtomicU64::new(0),
                published: AtomicU64::new(0),
            },
            buffer: UnsafeCell::new([0u8; N]),
        }
    }
}

// SAFETY: Only the unique producer writes the buffer; consumers copy out and
// validate against `reserve` afterwards, discarding any copy the producer
// may have raced.
unsafe impl<const N: usize> Send for BroadcastRing<N> {}
unsafe impl<const N: usize> Sync for BroadcastRing<N> {}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the broadcast ring. Not `Clone`, not `Sync`.
pub struct Producer<const N: usize> {
    ring: Arc<BroadcastRing<N>>,
    _unsync: PhantomUnsync,
}

/// One consumer's view of the broadcast ring.
///
/// Cloning yields an independent consumer that continues from the same
/// position; consumers never affect the producer or each other.
pub struct Consumer<const N: usize> {
    ring: Arc<BroadcastRing<N>>,
    /// Monotonic byte offset of the next unread message.
    cursor: u64,
}

impl<const N: usize> Clone for Consumer<N> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
            cursor: self.cursor,
        }
    }
}

struct CapacityCheck<const N: usize>;

impl<const N: usize> CapacityCheck<N> {
    const OK: () = assert!(N > HEADER_SIZE, "capacity must exceed the 8-byte header");
}

/// Creates a broadcast channel over an `N`-byte ring.
///
/// Returns the unique [`Producer`] and an initial [`Consumer`]; clone the
/// consumer for additional subscribers. Fails to compile if `N <= 8`.
#[must_use]
pub fn broadcast<const N: usize>() -> (Producer<N>, Consumer<N>) {
    let () = CapacityCheck::<N>::OK;

    let ring = Arc::new(BroadcastRing::new());

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    (producer, Consumer { ring, cursor: 0 })
}

impl<const N: usize> Producer<N> {
    /// Broadcasts `payload` as one message (wait-free).
    ///
    /// Never waits for consumers: old messages are overwritten regardless of
    /// who has read them.
    ///
    /// # Errors
    ///
    /// [`PushError::CapacityExceeded`] only when the framed message exceeds
    /// the ring capacity outright.
    pub fn push(&self, payload: &[u8]) -> Result<(), PushError> {
        let total = HEADER_SIZE + payload.len();
        if total > N {
            return Err(PushError::CapacityExceeded {
                required: total,
                available: N,
            });
        }

        let ring = &*self.ring;

        // Announce the in-flight region before touching the buffer so a
        // consumer copying bytes we are about to clobber can detect it. This
        // must be an acquire RMW, not a plain release store: release only
        // keeps *earlier* accesses above the counter update, while the
        // acquire half keeps the buffer writes below from becoming visible
        // before the new `reserve` does. Same role as the seqlock writer's
        // acquire CAS into the odd state.
        let write = ring
            .writer
            .reserve
            .fetch_add(total as u64, Ordering::AcqRel);

        let storage = ring.buffer.get().cast::<u8>();
        let header = (payload.len() as u64).to_le_bytes();

        // SAFETY: We are the unique producer; consumers never write the
        // buffer and validate their copies against `reserve`, so clobbering
        // a slow consumer's region is detected on their side.
        unsafe {
            layout::copy_in::<N>(storage, Span::new(write, HEADER_SIZE), &header);
            layout::copy_in::<N>(
                storage,
                Span::new(write + HEADER_SIZE as u64, payload.len()),
                payload,
            );
        }

        // Publish: pairs with the consumers' acquire load.
        ring.writer
            .published
            .store(write + total as u64, Ordering::Release);

        Ok(())
    }
}

impl<const N: usize> Consumer<N> {
    /// Attempts to read the next message into `out` (wait-free).
    ///
    /// Returns `Ok(bytes_read)`; `Ok(0)` means no message is available
    /// (normal empty state, not an error).
    ///
    /// # Errors
    ///
    /// - [`ReadError::Lagged`] - the producer lapped this consumer; the
    ///   cursor has moved to the live edge and the next call reads fresh data
    /// - [`ReadError::BufferTooSmall`] - `out` cannot hold the payload;
    ///   nothing was consumed
    pub fn try_read(&mut self, out: &mut [u8]) -> Result<usize, ReadError> {
        let ring = &*self.ring;
        let cursor = self.cursor;

        let published = ring.writer.published.load(Ordering::Acquire);
        if cursor == published {
            return Ok(0);
        }

        // The oldest byte we are about to read lives at physical position
        // cursor % N; it is intact only while reserve <= cursor + N.
        if ring.writer.reserve.load(Ordering::Acquire) - cursor > N as u64 {
            return Err(self.resync());
        }

        let storage = ring.buffer.get().cast::<u8>().cast_const();

        let mut header = [0u8; HEADER_SIZE];
        // SAFETY: cursor < published, so a frame was published here; if the
        // producer overwrites it mid-copy the validation below rejects it.
        unsafe { layout::copy_out::<N>(storage, Span::new(cursor, HEADER_SIZE), &mut header) };

        // Seqlock-style bracket: order the copy before re-checking reserve.
        fence(Ordering::Acquire);
        if ring.writer.reserve.load(Ordering::Relaxed) - cursor > N as u64 {
            // Header bytes may be torn; the length cannot be trusted.
            return Err(self.resync());
        }

        let len = u64::from_le_bytes(header) as usize;
        let total = (HEADER_SIZE + len) as u64;

        // Defensive, as in the SPSC pop: an untorn header inside the
        // published region always frames a fully published message.
        if cursor + total > published {
            debug!(cursor, published, len, "header exceeds published boundary");
            return Ok(0);
        }

        if out.len() < len {
            return Err(ReadError::BufferTooSmall { required: len });
        }

        // SAFETY: Whole frame inside the published region; validated below.
        unsafe {
            layout::copy_out::<N>(
                storage,
                Span::new(cursor + HEADER_SIZE as u64, len),
                &mut out[..len],
            )
        };

        fence(Ordering::Acquire);
        if ring.writer.reserve.load(Ordering::Relaxed) - cursor > N as u64 {
            // The payload copy raced an overwrite; discard it.
            return Err(self.resync());
        }

        self.cursor = cursor + total;
        Ok(len)
    }

    /// Moves the cursor to the live edge after an overrun.
    fn resync(&mut self) -> ReadError {
        let live = self.ring.writer.published.load(Ordering::Acquire);
        trace!(
            from = self.cursor,
            to = live,
            "consumer lagged, resynchronizing"
        );
        self.cursor = live;
        ReadError::Lagged
    }
}
