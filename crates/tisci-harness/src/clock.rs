//! Manually driven clock.

use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use tisci_core::Environment;

/// Clock that only moves when told to.
///
/// Share it as `Arc<ManualClock>`: the channel reads it through the
/// [`Environment`] blanket impl for `Arc`, while the scripted proxy advances
/// it on every empty receive.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock at its origin.
    pub fn new() -> Self {
        Self { origin: Instant::now(), elapsed: Mutex::new(Duration::ZERO) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Time since the origin.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}
