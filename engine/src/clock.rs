//! Time sources for phase timing and record timestamps.
//!
//! Phase durations are measured in elapsed wall time, never in frames.
//! Sessions use `SystemClock`; tests and the headless runner use
//! `TestClock`, which only moves when advanced.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Monotonic + wall-clock time source.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Wall-clock milliseconds since UNIX epoch (session metadata only).
    fn unix_millis(&self) -> i64;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> i64 {
        system_unix_millis()
    }
}

fn system_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Manually advanced clock.
pub struct TestClock {
    state: Mutex<(Instant, i64)>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((Instant::now(), system_unix_millis())),
        }
    }

    /// Move both time bases forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0 += duration;
        state.1 += duration.as_millis() as i64;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn unix_millis(&self) -> i64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

/// Converts instants into milliseconds since the session started.
///
/// All timestamps written to trial records go through this so that the
/// values are comparable within a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimer {
    origin: Instant,
    started_unix_ms: i64,
}

impl SessionTimer {
    pub fn start(clock: &dyn Clock) -> Self {
        Self {
            origin: clock.now(),
            started_unix_ms: clock.unix_millis(),
        }
    }

    pub fn started_unix_ms(&self) -> i64 {
        self.started_unix_ms
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.origin)
    }

    /// Session-relative timestamp in milliseconds.
    pub fn stamp(&self, now: Instant) -> f64 {
        self.elapsed(now).as_secs_f64() * 1000.0
    }
}
