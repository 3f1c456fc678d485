//! Typed message channel layered over the framed SPSC byte queue.
//!
//! Serializes messages with `postcard` and carries them as framed byte
//! payloads, turning the byte ring into a bounded channel of `T`s. The
//! queue's back-pressure carries through: `send` fails when the ring is
//! out of space.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ring::spsc;
use crate::ring::PushError;

/// Marker trait for types that can travel through a typed channel.
///
/// Automatically implemented for all `Serialize + Deserialize` types.
pub trait Wire: Serialize + for<'de> Deserialize<'de> {}
impl<T> Wire for T where T: Serialize + for<'de> Deserialize<'de> {}

/// Errors that can occur when sending or receiving typed messages.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Message serialization failed.
    #[error("message serialization failed: {0}")]
    Encode(postcard::Error),
    /// A received payload did not deserialize to `T`.
    #[error("message deserialization failed: {0}")]
    Decode(postcard::Error),
    /// The underlying ring has no room for the serialized message.
    #[error(transparent)]
    Full(PushError),
}

/// Type-safe write end over an `N`-byte SPSC ring.
pub struct Sender<T: Wire, const N: usize> {
    producer: spsc::Producer<N>,
    _phantom: PhantomData<T>,
}

/// Type-safe read end over an `N`-byte SPSC ring.
pub struct Receiver<T: Wire, const N: usize> {
    consumer: spsc::Consumer<N>,
    _phantom: PhantomData<T>,
}

/// Creates a typed channel over a fresh `N`-byte ring.
#[must_use]
pub fn channel<T: Wire, const N: usize>() -> (Sender<T, N>, Receiver<T, N>) {
    let (producer, consumer) = spsc::channel::<N>();
    (
        Sender {
            producer,
            _phantom: PhantomData,
        },
        Receiver {
            consumer,
            _phantom: PhantomData,
        },
    )
}

impl<T: Wire, const N: usize> Sender<T, N> {
    /// Serializes and enqueues `msg` (wait-free).
    ///
    /// # Errors
    ///
    /// [`ChannelError::Encode`] if serialization fails,
    /// [`ChannelError::Full`] if the ring has no room; the queue is
    /// unchanged in both cases.
    pub fn send(&self, msg: &T) -> Result<(), ChannelError> {
        let bytes = postcard::to_stdvec(msg).map_err(ChannelError::Encode)?;
        self.producer.push(&bytes).map_err(ChannelError::Full)
    }
}

impl<T: Wire, const N: usize> Receiver<T, N> {
    /// Attempts to dequeue and deserialize one message (wait-free).
    ///
    /// Returns `None` if the queue is empty, `Some(Err)` if the payload did
    /// not deserialize (the message is consumed either way).
    #[must_use]
    pub fn recv(&self) -> Option<Result<T, ChannelError>> {
        self.consumer
            .pop()
            .map(|bytes| postcard::from_bytes(&bytes).map_err(ChannelError::Decode))
    }
}
