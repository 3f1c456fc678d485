//! Lock-free single-writer synchronization primitives and framed byte queues.
//!
//! `coil` is an in-process concurrency toolkit built around three independent
//! components:
//!
//! - [`sync::rcu`] - a single-writer, multi-reader protected pointer with
//!   deferred reclamation (readers never block, the writer waits for quiescence)
//! - [`sync::Seqlock`] - a single-writer, multi-reader protected scalar using
//!   sequence-counter validation instead of pointer indirection
//! - [`ring`] - fixed-capacity SPSC and SPMC ring buffers carrying
//!   length-prefixed variable-size byte messages, plus an unframed
//!   fixed-size-element queue with batch operations ([`ring::fixed`])
//!
//! No component depends on another; they are alternative answers to related
//! problems (protecting a changing value vs. streaming framed messages) with
//! a common contract: never block, never tear data, never reclaim memory
//! still observable by a concurrent reader.
//!
//! All coordination is done with atomic loads, stores and compare-and-swap
//! with explicit memory orderings. No mutexes, no syscalls on the hot path.
//! Single-writer and single-consumer roles are enforced by handle ownership
//! (`Send` but not `Sync`, not `Clone`) rather than runtime checks.

pub mod arena;
pub mod ring;
pub mod sync;
pub(crate) mod trace;

pub use trace::init_tracing;
