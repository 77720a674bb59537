//! Time sources.
//!
//! Every elapsed-time decision in the recorder (debounce cadence, silence
//! timeout, upload gating, error cooldown) is a difference of
//! [`Clock::now`] values, so the whole state machine can run against a
//! [`ManualClock`] in tests and simulations. Wall-clock time exists only
//! to name recordings.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Abstraction over time for testability.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time.
    fn wall(&self) -> SystemTime;
}

/// Production clock backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hold one handle
/// while the recorder owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<(Instant, SystemTime)>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new((Instant::now(), SystemTime::UNIX_EPOCH))),
        }
    }

    /// Starts wall time at `wall` instead of the epoch.
    pub fn starting_at(wall: SystemTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new((Instant::now(), wall))),
        }
    }

    /// Advances both monotonic and wall time.
    pub fn advance(&self, duration: Duration) {
        let mut guard = self.lock();
        guard.0 += duration;
        guard.1 += duration;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (Instant, SystemTime)> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.lock().0
    }

    fn wall(&self) -> SystemTime {
        self.lock().1
    }
}
