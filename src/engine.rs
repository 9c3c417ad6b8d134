//! Acquisition engine: the only path to the camera hardware.
//!
//! Every device call and every access to the current frame goes through one
//! mutex. A single-frame grab and a sequence grab each hold it for their whole
//! duration, so grabs never interleave.

use crate::traits::{
    now_stamp, CameraDevice, CameraError, Frame, FrameMetadata, Geometry, Result, SequenceResult,
    TransientFault,
};
use crate::validation::validate_frame_layout;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

struct Hardware<D> {
    device: D,
    current: Option<Arc<Frame>>,
    grabbed: u64,
}

impl<D: CameraDevice> Hardware<D> {
    /// Grab one buffer and wrap it as a frame.
    ///
    /// `Ok(None)` is a transient failure; `Err` is always `DeviceRemoved`.
    fn grab_one(&mut self, geometry: Geometry) -> Result<Option<Frame>> {
        let data = match self.device.grab() {
            Ok(data) => data,
            Err(err) => {
                if self.device.is_removed() {
                    error!("Camera has been removed");
                    return Err(CameraError::DeviceRemoved);
                }
                warn!(error = %err, "Camera returned invalid image, skipping");
                return Ok(None);
            }
        };

        if let Err(err) = validate_frame_layout(&data, &geometry) {
            warn!(error = %err, "Discarding malformed frame");
            return Ok(None);
        }

        let frame = Frame {
            data,
            geometry,
            metadata: FrameMetadata {
                sequence: self.grabbed,
                timestamp: now_stamp(),
            },
        };
        self.grabbed += 1;
        Ok(Some(frame))
    }
}

/// Serialised owner of a [`CameraDevice`] and the most recent frame.
pub struct AcquisitionEngine<D> {
    hardware: Mutex<Hardware<D>>,
    geometry: Geometry,
    max_frame_rate: f64,
}

impl<D: CameraDevice> AcquisitionEngine<D> {
    /// Take ownership of a device.
    pub fn new(device: D) -> Self {
        let geometry = device.geometry();
        let max_frame_rate = device.max_frame_rate();
        info!(
            width = geometry.width,
            height = geometry.height,
            encoding = geometry.encoding.as_str(),
            max_frame_rate,
            "Acquisition engine ready"
        );
        Self {
            hardware: Mutex::new(Hardware {
                device,
                current: None,
                grabbed: 0,
            }),
            geometry,
            max_frame_rate,
        }
    }

    /// Static geometry of every frame this engine produces.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Maximum frame rate reported by the device at construction.
    pub fn max_frame_rate(&self) -> f64 {
        self.max_frame_rate
    }

    /// Grab a single frame and make it current.
    ///
    /// Returns `Ok(None)` when the device produced no usable frame.
    ///
    /// # Errors
    ///
    /// Returns `DeviceRemoved` if the camera is gone.
    pub fn grab_frame(&self) -> Result<Option<Arc<Frame>>> {
        let mut hw = self.hardware.lock();
        let Some(frame) = hw.grab_one(self.geometry)? else {
            return Ok(None);
        };
        let frame = Arc::new(frame);
        hw.current = Some(Arc::clone(&frame));
        Ok(Some(frame))
    }

    /// Grab one frame per exposure time and keep only the middle one.
    ///
    /// The frame at index `len / 2` becomes current only if every grab of the
    /// burst succeeded. Returns `Ok(None)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `DeviceRemoved` if the camera is gone; the burst is abandoned.
    pub fn grab_sequence_background(&self, exposure_times: &[f64]) -> Result<Option<Arc<Frame>>> {
        if exposure_times.is_empty() {
            warn!("Sequence grab requested with no exposure times");
            return Ok(None);
        }

        let mut hw = self.hardware.lock();
        let mid = exposure_times.len() / 2;
        let mut success = true;
        let mut kept = None;

        for idx in 0..exposure_times.len() {
            match hw.grab_one(self.geometry)? {
                Some(frame) if idx == mid => kept = Some(frame),
                Some(_) => {}
                None => success = false,
            }
        }

        if !success {
            return Ok(None);
        }

        let Some(frame) = kept else {
            return Ok(None);
        };
        let frame = Arc::new(frame);
        hw.current = Some(Arc::clone(&frame));
        Ok(Some(frame))
    }

    /// Grab one frame per exposure time and return all of them.
    ///
    /// Every grab is attempted even after a failure. If any failed, the
    /// result is unsuccessful and carries no frames. The current frame is
    /// left untouched.
    ///
    /// # Errors
    ///
    /// Returns `DeviceRemoved` if the camera is gone.
    pub fn grab_sequence(&self, exposure_times: &[f64]) -> Result<SequenceResult> {
        let mut hw = self.hardware.lock();
        let mut frames = Vec::with_capacity(exposure_times.len());
        let mut success = true;

        for _ in exposure_times {
            match hw.grab_one(self.geometry)? {
                Some(frame) => frames.push(frame),
                None => success = false,
            }
        }

        if !success {
            frames.clear();
        }

        Ok(SequenceResult {
            frames,
            exposure_times: exposure_times.to_vec(),
            success,
        })
    }

    /// The most recently grabbed frame, if any.
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.hardware.lock().current.clone()
    }

    /// Whether at least one frame has been grabbed.
    pub fn has_frame(&self) -> bool {
        self.hardware.lock().current.is_some()
    }

    /// Mean intensity of the current frame.
    pub fn mean_brightness(&self) -> Option<u8> {
        self.current_frame()?.mean_intensity()
    }

    /// Whether the device accepts control requests.
    pub fn is_device_ready(&self) -> bool {
        self.hardware.lock().device.is_ready()
    }

    /// Exposure readback.
    ///
    /// # Errors
    ///
    /// Propagates device control errors.
    pub fn current_exposure(&self) -> Result<f64> {
        self.hardware.lock().device.current_exposure()
    }

    /// Command a new exposure setpoint.
    ///
    /// # Errors
    ///
    /// Propagates device control errors.
    pub fn set_exposure(&self, exposure: f64) -> Result<()> {
        self.hardware.lock().device.set_exposure(exposure)
    }

    /// Raise `converging` and command a new brightness setpoint.
    ///
    /// Both happen under the hardware lock, so a concurrent
    /// [`observe_auto_brightness`](Self::observe_auto_brightness) sees either
    /// neither or both. The flag is lowered again if the write fails.
    ///
    /// # Errors
    ///
    /// Propagates device control errors.
    pub fn command_brightness(&self, brightness: u8, converging: &AtomicBool) -> Result<()> {
        let mut hw = self.hardware.lock();
        converging.store(true, Ordering::Release);
        hw.device.set_brightness(brightness).inspect_err(|_| {
            converging.store(false, Ordering::Release);
        })
    }

    /// Device exposure resolution.
    pub fn exposure_step(&self) -> f64 {
        self.hardware.lock().device.exposure_step()
    }

    /// Query the vendor auto-brightness routine and store the answer in `converging`.
    ///
    /// A fault is reported to the caller but still stored as `false`; it
    /// never prevents the tick from grabbing.
    ///
    /// # Errors
    ///
    /// Returns the device's fault when the feature is not accessible.
    pub fn observe_auto_brightness(
        &self,
        converging: &AtomicBool,
    ) -> std::result::Result<bool, TransientFault> {
        let hw = self.hardware.lock();
        let observed = hw.device.is_auto_brightness_running();
        converging.store(matches!(observed, Ok(true)), Ordering::Release);
        observed
    }
}
