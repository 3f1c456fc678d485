//! Wrap-around span arithmetic and byte copy helpers.
//!
//! The ring counters are monotonic 64-bit byte offsets; a message's logical
//! region `[offset, offset + len)` maps onto the physical array as one or
//! two segments depending on whether it crosses the wrap point. [`Span`]
//! makes that split explicit so the wrap and no-wrap paths are ordinary
//! slice ranges that can be unit-tested, instead of ad hoc modulo pointer
//! arithmetic at every call site.

use std::ops::Range;

/// A logical region of a ring with capacity `N` units (bytes for the framed
/// queues, slots for the element queue).
///
/// `offset` is a monotonic counter value (not reduced modulo `N`); `len`
/// must be at most `N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: u64,
    pub len: usize,
}

impl Span {
    pub const fn new(offset: u64, len: usize) -> Self {
        Self { offset, len }
    }

    /// Splits the span into physical segments of an `N`-byte array.
    ///
    /// Returns the first segment and, when the span crosses the wrap point,
    /// a second segment starting at index 0. A span ending exactly at the
    /// array boundary does not wrap.
    pub fn split<const N: usize>(self) -> (Range<usize>, Option<Range<usize>>) {
        debug_assert!(self.len <= N);
        let start = (self.offset % N as u64) as usize;
        let first = self.len.min(N - start);
        let head = start..start + first;
        let tail = (first < self.len).then(|| 0..self.len - first);
        (head, tail)
    }
}

/// Copies `src` into the ring storage at `span` (wrap-aware).
///
/// # Safety
///
/// Caller must guarantee exclusive write access to the bytes covered by
/// `span` under the ring protocol (the region is reserved and no consumer
/// has been shown a counter covering it), and that `src.len() == span.len`
/// with `span.len <= N`.
#[inline]
pub unsafe fn copy_in<const N: usize>(storage: *mut u8, span: Span, src: &[u8]) {
    debug_assert_eq!(src.len(), span.len);
    let (head, tail) = span.split::<N>();
    // SAFETY: head/tail are in-bounds ranges of the N-byte array, and the
    // caller guarantees no concurrent access to these bytes.
    unsafe {
        std::ptr::copy_nonoverlapping(src.as_ptr(), storage.add(head.start), head.len());
        if let Some(tail) = tail {
            std::ptr::copy_nonoverlapping(src.as_ptr().add(head.len()), storage, tail.len());
        }
    }
}

/// Copies the ring storage at `span` into `dst` (wrap-aware).
///
/// # Safety
///
/// Caller must guarantee the bytes covered by `span` were published (written
/// before a release-store the caller has acquire-loaded), and that
/// `dst.len() == span.len` with `span.len <= N`.
#[inline]
pub unsafe fn copy_out<const N: usize>(storage: *const u8, span: Span, dst: &mut [u8]) {
    debug_assert_eq!(dst.len(), span.len);
    let (head, tail) = span.split::<N>();
    // SAFETY: head/tail are in-bounds ranges of the N-byte array; the caller
    // guarantees the producer will not overwrite them during this copy (SPSC)
    // or validates the copy afterwards (SPMC).
    unsafe {
        std::ptr::copy_nonoverlapping(storage.add(head.start), dst.as_mut_ptr(), head.len());
        if let Some(tail) = tail {
            std::ptr::copy_nonoverlapping(storage, dst.as_mut_ptr().add(head.len()), tail.len());
        }
    }
}
