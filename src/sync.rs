//! Value-protection primitives for single-writer, multi-reader sharing.
//!
//! Two alternative protocols for publishing a changing value to concurrent
//! readers without locks:
//!
//! - [`rcu`] - pointer indirection with deferred reclamation. Readers take a
//!   borrowed snapshot that stays stable for the whole read scope; the writer
//!   swaps in a new heap allocation and waits for in-flight readers to drain
//!   before freeing the old one.
//! - [`Seqlock`] - inline storage with sequence-counter validation. Readers
//!   copy the value and retry if a write raced the copy; the writer never
//!   waits for readers at all.
//!
//! RCU suits larger values read through a reference; the seqlock suits small
//! `Copy` values where a retried byte copy is cheaper than indirection.

pub mod rcu;
pub mod seqlock;

pub use seqlock::Seqlock;
