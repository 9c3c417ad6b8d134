//! Exposure convergence: command one setpoint, then poll the readback.

use crate::config::ConvergenceConfig;
use crate::convergence::{interval_from_hz, poll, Convergence, PollOutcome};
use crate::engine::AcquisitionEngine;
use crate::traits::CameraDevice;
use tracing::{debug, error, warn};

/// Drives the device exposure to a target within a bounded time.
pub struct ExposureController<'a, D> {
    engine: &'a AcquisitionEngine<D>,
    config: &'a ConvergenceConfig,
}

impl<'a, D: CameraDevice> ExposureController<'a, D> {
    /// Create a controller over an engine.
    pub fn new(engine: &'a AcquisitionEngine<D>, config: &'a ConvergenceConfig) -> Self {
        Self { engine, config }
    }

    /// Bring the exposure readback within one exposure step of `target`.
    ///
    /// Writes the setpoint at most once and never when the readback is
    /// already within tolerance.
    pub fn converge(&self, target: f64) -> Convergence {
        if !(target.is_finite() && target > 0.0) {
            warn!(requested = target, "Rejecting exposure request");
            return Convergence::InvalidTarget;
        }

        if !self.engine.is_device_ready() {
            warn!(requested = target, "Exposure request before camera is ready");
            return Convergence::NotReady;
        }

        let step = self.engine.exposure_step();
        let current = match self.engine.current_exposure() {
            Ok(current) => current,
            Err(err) => {
                warn!(error = %err, "Cannot read exposure");
                return Convergence::DeviceFault(err.to_string());
            }
        };

        if (current - target).abs() < step {
            debug!(current, requested = target, "Exposure already on target");
            return Convergence::Converged;
        }

        if let Err(err) = self.engine.set_exposure(target) {
            warn!(error = %err, requested = target, "Cannot write exposure");
            return Convergence::DeviceFault(err.to_string());
        }

        let outcome = poll(
            interval_from_hz(self.config.exposure_poll_hz),
            self.config.exposure_timeout,
            || match self.engine.current_exposure() {
                Ok(current) => (current - target).abs() < step,
                Err(err) => {
                    debug!(error = %err, "Exposure readback failed");
                    false
                }
            },
        );

        match outcome {
            PollOutcome::Converged => Convergence::Converged,
            PollOutcome::TimedOut => {
                error!(requested = target, "Did not reach the required exposure in time");
                Convergence::TimedOut
            }
        }
    }
}
