//! Environment abstraction for time.
//!
//! Deadlines are computed from [`Environment::now`] so tests can drive the
//! clock explicitly instead of sleeping.

use std::time::Instant;

/// Source of the current time.
pub trait Environment: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock environment backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Environment + ?Sized> Environment for std::sync::Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}
