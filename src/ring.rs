//! Fixed-capacity ring buffers carrying length-prefixed byte messages.
//!
//! Each enqueued message occupies a logically contiguous region of the ring:
//! an 8-byte little-endian length header followed by the payload. Regions
//! may physically straddle the wrap point of the backing array; the
//! monotonic 64-bit byte counters are never wrapped themselves, only reduced
//! modulo the capacity when indexing (see [`layout`]).
//!
//! Two variants share the framing and wrap rules:
//!
//! - [`spsc`] - one producer, one consumer, bounded back-pressure: `push`
//!   fails when the free space runs out, every message is popped exactly once
//! - [`spmc`] - one producer, many independent consumers, broadcast: the
//!   producer never waits, each consumer tracks its own cursor and a slow
//!   consumer can be overrun (detected, reported as [`spmc::ReadError::Lagged`])
//!
//! Neither variant ever blocks; the producer's release-store of its counter
//! is the only synchronization edge consumers rely on, so no message is
//! visible before its payload is fully written.
//!
//! [`fixed`] is the unframed sibling: `N` slots of one `Copy` type with
//! all-or-nothing batch push/pop, sharing the counter scheme but not the
//! byte framing.

use thiserror::Error;

pub mod fixed;
pub mod layout;
pub mod spmc;
pub mod spsc;
pub mod typed;

/// Size in bytes of the per-message length header.
pub const HEADER_SIZE: usize = 8;

/// Error returned when a message cannot be enqueued.
///
/// Recoverable: the queue state is unchanged and the caller may retry later
/// or drop the message.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The framed message does not fit: either it exceeds the total capacity
    /// outright, or the currently occupied bytes leave too little room.
    #[error("message needs {required} bytes but only {available} are free")]
    CapacityExceeded { required: usize, available: usize },
}
