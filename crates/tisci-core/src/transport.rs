//! Secure proxy transport abstraction.
//!
//! The secure proxy moves opaque byte buffers between the secure world and
//! the system controller over numbered hardware threads. This crate never
//! touches the hardware; production code supplies an implementation backed
//! by the proxy registers, tests use the in-memory doubles from the harness.

use std::{sync::Arc, time::Duration};

use thiserror::Error;

/// Largest message a secure proxy thread carries.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 56;

/// Secure proxy thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyThread(pub u8);

impl std::fmt::Display for ProxyThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread {}", self.0)
    }
}

/// Transport-layer failures. Never retried by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transport used before `init` completed
    #[error("secure proxy not initialized")]
    NotInitialized,

    /// Outbound buffer exceeds what one proxy message can carry
    #[error("message of {len} bytes exceeds proxy limit of {max}")]
    MessageTooLarge {
        /// Size of the rejected buffer
        len: usize,
        /// Proxy message capacity
        max: usize,
    },

    /// The proxy thread has been shut down
    #[error("secure proxy thread closed")]
    Closed,

    /// Hardware reported an error state
    #[error("secure proxy hardware error: {0}")]
    Hardware(String),
}

/// Blocking byte-buffer transport to the system controller.
///
/// Implementations must be safe to share between threads; the channel
/// serializes receives itself.
pub trait SecureProxy: Send + Sync {
    /// Prepare the proxy threads for use.
    ///
    /// Must be idempotent. Called once before first use; not safe to call
    /// concurrently with in-flight traffic.
    fn init(&self) -> Result<(), TransportError>;

    /// Queue one message on `thread`.
    fn send(&self, thread: ProxyThread, message: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one message on `thread`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn receive(&self, thread: ProxyThread, timeout: Duration)
    -> Result<Option<Vec<u8>>, TransportError>;

    /// Capacity of a single proxy message.
    fn max_message_size(&self) -> usize {
        DEFAULT_MAX_MESSAGE_SIZE
    }
}

impl<T: SecureProxy + ?Sized> SecureProxy for Arc<T> {
    fn init(&self) -> Result<(), TransportError> {
        (**self).init()
    }

    fn send(&self, thread: ProxyThread, message: &[u8]) -> Result<(), TransportError> {
        (**self).send(thread, message)
    }

    fn receive(
        &self,
        thread: ProxyThread,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        (**self).receive(thread, timeout)
    }

    fn max_message_size(&self) -> usize {
        (**self).max_message_size()
    }
}
