//! Convergence outcomes and the fixed-cadence polling they are built on.

use std::thread;
use std::time::{Duration, Instant};

/// Result of an exposure or brightness request.
///
/// Only [`Convergence::Converged`] is a success. None of the other variants is
/// an error in the `Result` sense; they are answers to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// The device reached the target.
    Converged,
    /// The target was not reached before the deadline.
    TimedOut,
    /// The device or the first frame was not available in time.
    NotReady,
    /// The wait loop ended but the final measurement is off target.
    ValidationFailed {
        /// Requested mean intensity.
        target: u8,
        /// Mean intensity of the current frame.
        measured: u8,
    },
    /// Another brightness request is still converging.
    Busy,
    /// The request is not served in the current acquisition mode.
    Unavailable,
    /// The requested target is outside the device's domain.
    InvalidTarget,
    /// A device control read or write failed.
    DeviceFault(String),
}

impl Convergence {
    /// Whether the request succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held before the deadline.
    Converged,
    /// The deadline passed without the predicate holding.
    TimedOut,
}

/// Interval for a polling rate in Hz.
#[must_use]
pub fn interval_from_hz(hz: f64) -> Duration {
    if hz.is_finite() && hz > 0.0 {
        Duration::from_secs_f64(1.0 / hz)
    } else {
        Duration::from_secs(1)
    }
}

/// Evaluate `predicate` every `interval` until it holds or `deadline` elapses.
///
/// The predicate is checked once before the first sleep, so an already
/// satisfied condition returns immediately. Sleeps never overshoot the
/// deadline by more than one interval.
pub fn poll<F>(interval: Duration, deadline: Duration, mut predicate: F) -> PollOutcome
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if predicate() {
            return PollOutcome::Converged;
        }
        if start.elapsed() > deadline {
            return PollOutcome::TimedOut;
        }
        thread::sleep(interval);
    }
}
