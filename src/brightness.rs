//! Brightness convergence.
//!
//! The controller measures the mean intensity of the current frame, commands
//! a brightness setpoint once, then waits for the converging flag to drop.
//! The flag is lowered by the acquisition tick when the device reports its
//! auto-brightness routine idle, or by the controller itself on timeout.
//! Whatever ended the wait, the result is re-checked against fresh pixels.

use crate::config::ConvergenceConfig;
use crate::convergence::{interval_from_hz, poll, Convergence, PollOutcome};
use crate::engine::AcquisitionEngine;
use crate::traits::CameraDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Settle budget for a brightness target.
///
/// Bright targets take the device noticeably longer to reach.
#[must_use]
pub fn brightness_deadline(target: u8, config: &ConvergenceConfig) -> Duration {
    if target > config.brightness_high_threshold {
        config.brightness_high_timeout
    } else {
        config.brightness_timeout
    }
}

/// Drives the mean frame intensity to a target within a bounded time.
pub struct BrightnessController<'a, D> {
    engine: &'a AcquisitionEngine<D>,
    config: &'a ConvergenceConfig,
    converging: &'a AtomicBool,
}

impl<'a, D: CameraDevice> BrightnessController<'a, D> {
    /// Create a controller sharing the session's converging flag.
    pub fn new(
        engine: &'a AcquisitionEngine<D>,
        config: &'a ConvergenceConfig,
        converging: &'a AtomicBool,
    ) -> Self {
        Self {
            engine,
            config,
            converging,
        }
    }

    /// Bring the mean intensity of the current frame to `target`.
    pub fn converge(&self, target: u8) -> Convergence {
        if !self.wait_for_first_frame() {
            error!(
                timeout = ?self.config.readiness_timeout,
                "Camera has not grabbed an image yet"
            );
            return Convergence::NotReady;
        }

        let Some(current) = self.engine.mean_brightness() else {
            return Convergence::NotReady;
        };
        info!(requested = target, current, "New brightness request");

        if current == target {
            return Convergence::Converged;
        }

        if let Err(err) = self.engine.command_brightness(target, self.converging) {
            warn!(error = %err, requested = target, "Cannot write brightness");
            return Convergence::DeviceFault(err.to_string());
        }

        let deadline = brightness_deadline(target, self.config);
        let outcome = poll(
            interval_from_hz(self.config.brightness_poll_hz),
            deadline,
            || !self.converging.load(Ordering::Acquire),
        );

        if outcome == PollOutcome::TimedOut {
            self.converging.store(false, Ordering::Release);
            error!(requested = target, ?deadline, "Did not reach the required brightness in time");
            return Convergence::TimedOut;
        }

        self.validate(target)
    }

    fn wait_for_first_frame(&self) -> bool {
        if self.engine.has_frame() {
            return true;
        }
        poll(
            interval_from_hz(self.config.readiness_poll_hz),
            self.config.readiness_timeout,
            || self.engine.has_frame(),
        ) == PollOutcome::Converged
    }

    fn validate(&self, target: u8) -> Convergence {
        match self.engine.mean_brightness() {
            Some(measured) if measured.abs_diff(target) <= self.config.brightness_tolerance => {
                Convergence::Converged
            }
            Some(measured) => {
                warn!(requested = target, measured, "Brightness settled off target");
                Convergence::ValidationFailed { target, measured }
            }
            None => Convergence::NotReady,
        }
    }
}
