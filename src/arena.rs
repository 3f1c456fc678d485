//! Bump arena allocator.
//!
//! A fixed-capacity byte arena that hands out aligned blocks by bumping an
//! offset. Allocation is a couple of integer operations; individual blocks
//! are never freed - [`Arena::reset`] releases everything at once, which the
//! borrow checker permits only after every outstanding reference is gone.
//!
//! The rings and RCU own their backing storage, but accept this as the
//! external collaborator for staging payloads: `allocate(size, align)`
//! returns a block of at least `size` bytes aligned to `align`, valid until
//! the arena is reset or dropped.
//!
//! Single-threaded by construction (`!Sync`); placement is restricted to
//! `Copy` types so that `reset` never skips a destructor.

use std::cell::{Cell, UnsafeCell};
use std::ptr::NonNull;

/// A fixed-capacity bump allocator.
///
/// # Example
///
/// ```
/// use coil::arena::Arena;
///
/// let arena = Arena::with_capacity(1024);
/// let x = arena.alloc(42u64).unwrap();
/// assert_eq!(*x, 42);
///
/// let buf = arena.alloc_slice(64).unwrap();
/// assert_eq!(buf.len(), 64);
/// ```
pub struct Arena {
    storage: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    offset: Cell<usize>,
}

impl Arena {
    /// Creates an arena backed by `capacity` zeroed bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            capacity,
            offset: Cell::new(0),
        }
    }

    /// Returns a block of at least `size` bytes aligned to `align`, or
    /// `None` if the arena is exhausted.
    ///
    /// `align` must be a power of two. The block stays valid until the arena
    /// is reset or dropped.
    pub fn allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        debug_assert!(align.is_power_of_two());

        // Align the actual address, not the offset: the backing bytes carry
        // no alignment guarantee of their own.
        // SAFETY: No reference to the Box itself is ever handed out, only
        // to the bytes it owns.
        let base = unsafe { (*self.storage.get()).as_mut_ptr() };
        let addr = (base as usize).checked_add(self.offset.get())?;
        let start = addr.checked_next_multiple_of(align)? - base as usize;
        let end = start.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.offset.set(end);

        // SAFETY: end <= capacity, so the pointer is within (or one past)
        // the backing allocation.
        let ptr = unsafe { base.add(start) };
        NonNull::new(ptr)
    }

    /// Places `value` in the arena and returns a reference to it.
    ///
    /// Restricted to `Copy` types: the arena never runs destructors.
    pub fn alloc<T: Copy>(&self, value: T) -> Option<&mut T> {
        let ptr = self.allocate(size_of::<T>(), align_of::<T>())?.cast::<T>();
        // SAFETY: The block is fresh (the bump offset never reuses bytes
        // before a reset, and reset requires &mut self), properly aligned,
        // and large enough for T.
        unsafe {
            ptr.as_ptr().write(value);
            Some(&mut *ptr.as_ptr())
        }
    }

    /// Returns a zeroed byte slice of length `len` from the arena.
    pub fn alloc_slice(&self, len: usize) -> Option<&mut [u8]> {
        let ptr = self.allocate(len, 1)?;
        // SAFETY: The block is fresh, disjoint from every previously handed
        // out block, and lives as long as the arena.
        unsafe { Some(std::slice::from_raw_parts_mut(ptr.as_ptr(), len)) }
    }

    /// Releases every allocation at once.
    ///
    /// Takes `&mut self`, so it cannot be called while any reference handed
    /// out by this arena is still alive.
    pub fn reset(&mut self) {
        self.offset.set(0);
    }

    /// Bytes handed out so far, including alignment padding.
    #[must_use]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_read_back() {
        let arena = Arena::with_capacity(128);

        let a = arena.alloc(7u32).unwrap();
        let b = arena.alloc(9u64).unwrap();
        assert_eq!(*a, 7);
        assert_eq!(*b, 9);
    }

    #[test]
    fn blocks_are_aligned() {
        let arena = Arena::with_capacity(256);

        let _byte = arena.allocate(1, 1).unwrap();
        for align in [2usize, 4, 8, 16, 64] {
            let ptr = arena.allocate(8, align).unwrap();
            assert_eq!(ptr.as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn exhaustion_returns_none() {
        let arena = Arena::with_capacity(16);

        assert!(arena.allocate(16, 1).is_some());
        assert!(arena.allocate(1, 1).is_none());
        assert_eq!(arena.used(), 16);
    }

    #[test]
    fn alignment_padding_counts_toward_capacity() {
        let arena = Arena::with_capacity(32);

        arena.allocate(1, 1).unwrap();
        let ptr = arena.allocate(8, 8).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 8, 0);
        // The skipped padding bytes are gone for good.
        assert!(arena.used() > 8);
    }

    #[test]
    fn reset_reclaims_everything() {
        let mut arena = Arena::with_capacity(32);

        assert!(arena.alloc_slice(32).is_some());
        assert!(arena.alloc_slice(1).is_none());

        arena.reset();
        assert_eq!(arena.used(), 0);
        assert!(arena.alloc_slice(32).is_some());
    }

    #[test]
    fn slices_are_disjoint() {
        let arena = Arena::with_capacity(64);

        let a = arena.alloc_slice(8).unwrap();
        let b = arena.alloc_slice(8).unwrap();
        a.fill(0xaa);
        b.fill(0xbb);
        assert_eq!(a, &[0xaa; 8]);
        assert_eq!(b, &[0xbb; 8]);
    }

    #[test]
    fn zero_sized_allocation() {
        let arena = Arena::with_capacity(8);
        assert!(arena.allocate(0, 1).is_some());
        assert_eq!(arena.used(), 0);
    }
}
