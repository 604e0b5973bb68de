//! Shared clock for a sync session.
//!
//! `send` and `recv` read and then write the same `(millis, counter)` pair,
//! so concurrent callers go through one mutex. Each handle owns an
//! independent clock; clones share it.

use crate::clock::{Clock, ClockOptions};
use crate::hlc::{current_time_ms, ClockError, Timestamp};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Source of wall-clock readings in milliseconds since the UNIX epoch.
pub type TimeSource = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Cloneable, thread-safe handle to a [`Clock`].
#[derive(Clone)]
pub struct ClockHandle {
    clock: Arc<Mutex<Clock>>,
    now: TimeSource,
}

impl ClockHandle {
    /// Wrap a clock, reading time from the system clock.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self::with_time_source(clock, current_time_ms)
    }

    /// Wrap a clock with a custom wall-clock source.
    #[must_use]
    pub fn with_time_source(clock: Clock, now: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(Mutex::new(clock)),
            now: Arc::new(now),
        }
    }

    /// Restore from [`Clock::serialize`] output, falling back to a fresh
    /// clock when it cannot be read.
    #[must_use]
    pub fn from_serialized(input: &str) -> Self {
        Self::new(Clock::deserialize(input))
    }

    /// Reset the shared clock to the zero timestamp.
    ///
    /// # Errors
    ///
    /// See [`Clock::init`].
    pub fn init(&self, options: ClockOptions) -> Result<(), ClockError> {
        self.lock().init(options)
    }

    /// Snapshot of the current clock.
    #[must_use]
    pub fn get(&self) -> Clock {
        self.lock().clone()
    }

    /// Replace the shared clock.
    pub fn set(&self, clock: Clock) {
        *self.lock() = clock;
    }

    /// Current timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.lock().timestamp()
    }

    /// Stamp a local event.
    ///
    /// # Errors
    ///
    /// See [`Clock::send_at`].
    pub fn send(&self) -> Result<Timestamp, ClockError> {
        let mut clock = self.lock();
        clock.send_at((self.now)())
    }

    /// Fold in a remote timestamp.
    ///
    /// # Errors
    ///
    /// See [`Clock::recv_at`].
    pub fn recv(&self, remote: &Timestamp) -> Result<Timestamp, ClockError> {
        let mut clock = self.lock();
        clock.recv_at(remote, (self.now)())
    }

    /// Run `f` with exclusive access to the clock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Clock) -> R) -> R {
        f(&mut *self.lock())
    }

    /// Serialized clock for handing to storage.
    #[must_use]
    pub fn serialize(&self) -> String {
        self.lock().serialize()
    }

    // A panic elsewhere never leaves the clock half-updated: send/recv
    // commit only after every check passed.
    fn lock(&self) -> MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClockHandle {
    fn default() -> Self {
        Self::new(Clock::default())
    }
}

impl fmt::Debug for ClockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockHandle")
            .field("timestamp", &self.timestamp().to_string())
            .finish_non_exhaustive()
    }
}
