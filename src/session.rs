//! Camera session: mode flags, request handlers and the periodic tick.
//!
//! A `CameraSession` is shared by reference between the driver thread that
//! calls [`CameraSession::run`] and any number of request-handling threads.
//! Convergence requests block their calling thread while the driver keeps
//! ticking.

use crate::brightness::BrightnessController;
use crate::config::NodeConfig;
use crate::convergence::{interval_from_hz, Convergence};
use crate::engine::AcquisitionEngine;
use crate::exposure::ExposureController;
use crate::publish::FrameSink;
use crate::traits::{
    CameraDevice, CameraInfo, ExposureTimes, Frame, Result, SequenceResult,
    DEFAULT_DISTORTION_MODEL,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Frame rate used when neither the device nor the config names one.
const FALLBACK_FRAME_RATE: f64 = 10.0;

/// Resolve the tick rate from the configured and the device maximum rate.
#[must_use]
pub fn effective_frame_rate(desired: Option<f64>, max: f64) -> f64 {
    let max_known = max.is_finite() && max > 0.0;
    match desired {
        Some(rate) if max_known && rate > max => {
            info!(
                desired = rate,
                max, "Desired frame rate is higher than max possible, limiting"
            );
            max
        }
        Some(rate) => rate,
        None if max_known => {
            info!(max, "Using max possible frame rate");
            max
        }
        None => {
            warn!(
                rate = FALLBACK_FRAME_RATE,
                "Device reports no max frame rate, using fallback"
            );
            FALLBACK_FRAME_RATE
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Sleeping or nobody listening; the camera was not touched.
    Idle,
    /// The grab failed transiently; nothing was published.
    Skipped,
    /// A frame was published.
    Published,
}

/// One camera, its acquisition engine and its mode flags.
pub struct CameraSession<D, S> {
    engine: AcquisitionEngine<D>,
    sink: S,
    config: NodeConfig,
    frame_rate: f64,
    sleeping: AtomicBool,
    brightness_converging: AtomicBool,
    brightness_request: Mutex<()>,
}

impl<D: CameraDevice, S: FrameSink> CameraSession<D, S> {
    /// Build a session and settle the effective frame rate.
    ///
    /// The effective rate is written back into the session's config.
    pub fn new(device: D, sink: S, mut config: NodeConfig) -> Self {
        let engine = AcquisitionEngine::new(device);
        let frame_rate = effective_frame_rate(config.desired_frame_rate, engine.max_frame_rate());
        config.desired_frame_rate = Some(frame_rate);

        Self {
            engine,
            sink,
            config,
            frame_rate,
            sleeping: AtomicBool::new(false),
            brightness_converging: AtomicBool::new(false),
            brightness_request: Mutex::new(()),
        }
    }

    /// Rate the driver ticks at, after clamping.
    pub fn effective_frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// Configuration in effect.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The acquisition engine.
    pub fn engine(&self) -> &AcquisitionEngine<D> {
        &self.engine
    }

    /// The sink frames are published to.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Whether acquisition is suspended.
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Acquire)
    }

    /// Whether a brightness change is believed to be in progress.
    pub fn is_brightness_converging(&self) -> bool {
        self.brightness_converging.load(Ordering::Acquire)
    }

    /// Suspend or resume acquisition. Always succeeds.
    pub fn set_sleeping(&self, sleeping: bool) -> bool {
        self.sleeping.store(sleeping, Ordering::Release);
        if sleeping {
            info!("Setting camera to sleep");
        } else {
            info!("Camera continues grabbing");
        }
        true
    }

    /// Grab and publish one frame if awake and subscribed.
    ///
    /// # Errors
    ///
    /// Returns `DeviceRemoved`; the caller must stop acquisition.
    pub fn tick(&self) -> Result<TickOutcome> {
        if self.is_sleeping() || self.sink.subscriber_count() == 0 {
            return Ok(TickOutcome::Idle);
        }

        if let Err(fault) = self
            .engine
            .observe_auto_brightness(&self.brightness_converging)
        {
            debug!(error = %fault, "Auto brightness status unavailable");
        }

        if self.config.use_sequencer {
            let times = &self.config.sequence_exposure_times;
            let Some(frame) = self.engine.grab_sequence_background(times)? else {
                return Ok(TickOutcome::Skipped);
            };
            let stamp = frame.metadata.timestamp;
            self.publish(frame);
            self.sink.publish_exposure_times(&ExposureTimes {
                stamp,
                exposure_times: times.clone(),
            });
        } else {
            let Some(frame) = self.engine.grab_frame()? else {
                return Ok(TickOutcome::Skipped);
            };
            self.publish(frame);
        }

        Ok(TickOutcome::Published)
    }

    fn publish(&self, frame: Arc<Frame>) {
        let info = self.camera_info(frame.metadata.timestamp);
        self.sink.publish_frame(frame, &info);
    }

    /// Camera info stamped with `stamp`.
    pub fn camera_info(&self, stamp: Duration) -> CameraInfo {
        let geometry = self.engine.geometry();
        CameraInfo {
            frame_id: self.config.frame_id.clone(),
            width: geometry.width,
            height: geometry.height,
            distortion_model: DEFAULT_DISTORTION_MODEL.to_owned(),
            stamp,
        }
    }

    /// Handle a set-exposure request.
    pub fn set_exposure(&self, target: f64) -> Convergence {
        if self.config.use_sequencer {
            warn!(requested = target, "Exposure is owned by the sequencer");
            return Convergence::Unavailable;
        }
        ExposureController::new(&self.engine, &self.config.convergence).converge(target)
    }

    /// Handle a set-brightness request.
    pub fn set_brightness(&self, target: u8) -> Convergence {
        if self.config.use_sequencer {
            warn!(requested = target, "Brightness is owned by the sequencer");
            return Convergence::Unavailable;
        }
        let Some(_guard) = self.brightness_request.try_lock() else {
            warn!(requested = target, "Brightness request already in progress");
            return Convergence::Busy;
        };
        if self.is_brightness_converging() {
            warn!(requested = target, "Brightness is still converging");
            return Convergence::Busy;
        }
        BrightnessController::new(
            &self.engine,
            &self.config.convergence,
            &self.brightness_converging,
        )
        .converge(target)
    }

    /// Handle an on-demand sequence grab.
    ///
    /// # Errors
    ///
    /// Returns `DeviceRemoved`; the caller must stop acquisition.
    pub fn grab_sequence(&self, exposure_times: &[f64]) -> Result<SequenceResult> {
        self.engine.grab_sequence(exposure_times)
    }

    /// Tick at the effective frame rate until `stop` is raised.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; ticking stops immediately.
    pub fn run(&self, stop: &AtomicBool) -> Result<()> {
        let period = interval_from_hz(self.frame_rate);
        info!(rate = self.frame_rate, "Driver started");

        while !stop.load(Ordering::Acquire) {
            let started = Instant::now();
            if let Err(err) = self.tick() {
                error!(error = %err, "Stopping acquisition");
                return Err(err);
            }
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }

        info!("Driver stopped");
        Ok(())
    }
}
