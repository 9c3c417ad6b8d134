//! Mock device implementation for testing without hardware.
//!
//! `MockDevice` is cheaply cloneable; every clone shares the same state, so a
//! test can keep one handle for scripting while the engine owns another.

use crate::traits::{CameraDevice, CameraError, Geometry, PixelEncoding, Result, TransientFault};
use parking_lot::Mutex;
use std::sync::Arc;

/// Pixel content of mocked frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Every byte has the same value.
    Solid(u8),
    /// Every byte holds the index of the grab (wrapping at 256).
    Counter,
}

/// Scriptable auto-brightness behaviour.
#[derive(Debug, Clone, Copy)]
pub struct BrightnessResponse {
    /// Grabs until the auto routine finishes.
    pub settle_grabs: u32,
    /// Mean the frames settle to; `None` settles exactly on the setpoint.
    pub settle_to: Option<u8>,
}

#[derive(Debug)]
struct MockState {
    geometry: Geometry,
    max_frame_rate: f64,
    pattern: TestPattern,
    grab_count: u64,
    failures_remaining: u32,
    removed: bool,
    ready: bool,
    exposure: f64,
    exposure_target: f64,
    exposure_step: f64,
    exposure_settle_reads: u32,
    exposure_reads_remaining: u32,
    exposure_stuck: bool,
    exposure_writes: u32,
    brightness_response: BrightnessResponse,
    brightness_writes: u32,
    auto_running: bool,
    auto_grabs_remaining: u32,
    auto_settle_to: u8,
    auto_fault: bool,
}

/// Mock camera for testing without hardware.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new 64x48 mono8 mock device.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                geometry: Geometry::new(64, 48, PixelEncoding::Mono8),
                max_frame_rate: 200.0,
                pattern: TestPattern::Solid(100),
                grab_count: 0,
                failures_remaining: 0,
                removed: false,
                ready: true,
                exposure: 1000.0,
                exposure_target: 1000.0,
                exposure_step: 10.0,
                exposure_settle_reads: 2,
                exposure_reads_remaining: 0,
                exposure_stuck: false,
                exposure_writes: 0,
                brightness_response: BrightnessResponse {
                    settle_grabs: 3,
                    settle_to: None,
                },
                brightness_writes: 0,
                auto_running: false,
                auto_grabs_remaining: 0,
                auto_settle_to: 0,
                auto_fault: false,
            })),
        }
    }

    /// Set the geometry for this mock device.
    #[must_use]
    pub fn with_geometry(self, geometry: Geometry) -> Self {
        self.state.lock().geometry = geometry;
        self
    }

    /// Set the maximum frame rate.
    #[must_use]
    pub fn with_max_frame_rate(self, rate: f64) -> Self {
        self.state.lock().max_frame_rate = rate;
        self
    }

    /// Set the frame content pattern.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.state.lock().pattern = pattern;
        self
    }

    /// Set the initial exposure readback.
    #[must_use]
    pub fn with_exposure(self, exposure: f64) -> Self {
        {
            let mut state = self.state.lock();
            state.exposure = exposure;
            state.exposure_target = exposure;
        }
        self
    }

    /// Set the exposure step.
    #[must_use]
    pub fn with_exposure_step(self, step: f64) -> Self {
        self.state.lock().exposure_step = step;
        self
    }

    /// Never move the exposure readback after a write.
    #[must_use]
    pub fn with_stuck_exposure(self) -> Self {
        self.state.lock().exposure_stuck = true;
        self
    }

    /// Script the reaction to brightness setpoints.
    #[must_use]
    pub fn with_brightness_response(self, response: BrightnessResponse) -> Self {
        self.state.lock().brightness_response = response;
        self
    }

    /// Make the auto-function query raise a transient fault.
    #[must_use]
    pub fn with_auto_fault(self) -> Self {
        self.state.lock().auto_fault = true;
        self
    }

    /// Mark the device ready or not.
    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    /// Fail the next `count` grabs with a transient error.
    pub fn fail_next_grabs(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    /// Simulate unplugging the camera.
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    /// Number of grabs attempted so far.
    #[must_use]
    pub fn grab_count(&self) -> u64 {
        self.state.lock().grab_count
    }

    /// Number of exposure setpoints written.
    #[must_use]
    pub fn exposure_writes(&self) -> u32 {
        self.state.lock().exposure_writes
    }

    /// Number of brightness setpoints written.
    #[must_use]
    pub fn brightness_writes(&self) -> u32 {
        self.state.lock().brightness_writes
    }
}

impl MockState {
    fn fill_value(&self, index: u64) -> u8 {
        match self.pattern {
            TestPattern::Solid(value) => value,
            #[allow(clippy::cast_possible_truncation)]
            TestPattern::Counter => (index % 256) as u8,
        }
    }

    fn advance_auto_brightness(&mut self) {
        if !self.auto_running {
            return;
        }
        self.auto_grabs_remaining = self.auto_grabs_remaining.saturating_sub(1);
        if self.auto_grabs_remaining == 0 {
            self.pattern = TestPattern::Solid(self.auto_settle_to);
            self.auto_running = false;
        }
    }
}

impl CameraDevice for MockDevice {
    fn geometry(&self) -> Geometry {
        self.state.lock().geometry
    }

    fn max_frame_rate(&self) -> f64 {
        self.state.lock().max_frame_rate
    }

    fn grab(&mut self) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let index = state.grab_count;
        state.grab_count += 1;

        if state.removed {
            return Err(CameraError::GrabFailed("device not responding".to_owned()));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CameraError::GrabFailed("incomplete buffer".to_owned()));
        }

        state.advance_auto_brightness();
        Ok(vec![state.fill_value(index); state.geometry.frame_size()])
    }

    fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn current_exposure(&self) -> Result<f64> {
        let mut state = self.state.lock();
        if state.exposure_reads_remaining > 0 {
            state.exposure_reads_remaining -= 1;
            if state.exposure_reads_remaining == 0 && !state.exposure_stuck {
                state.exposure = state.exposure_target;
            }
        }
        Ok(state.exposure)
    }

    fn set_exposure(&mut self, exposure: f64) -> Result<()> {
        let mut state = self.state.lock();
        state.exposure_writes += 1;
        state.exposure_target = exposure;
        state.exposure_reads_remaining = state.exposure_settle_reads;
        Ok(())
    }

    fn set_brightness(&mut self, brightness: u8) -> Result<()> {
        let mut state = self.state.lock();
        state.brightness_writes += 1;
        let response = state.brightness_response;
        state.auto_settle_to = response.settle_to.unwrap_or(brightness);
        state.auto_grabs_remaining = response.settle_grabs.max(1);
        state.auto_running = true;
        Ok(())
    }

    fn exposure_step(&self) -> f64 {
        self.state.lock().exposure_step
    }

    fn is_auto_brightness_running(&self) -> std::result::Result<bool, TransientFault> {
        let state = self.state.lock();
        if state.auto_fault {
            return Err(TransientFault("ExposureAuto not readable".to_owned()));
        }
        Ok(state.auto_running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_grab_size() {
        let mut device = MockDevice::new();
        let data = device.grab().expect("grab should succeed");
        assert_eq!(data.len(), 64 * 48);
        assert_eq!(device.grab_count(), 1);
    }

    #[test]
    fn test_counter_pattern() {
        let mut device = MockDevice::new().with_pattern(TestPattern::Counter);
        for expected in 0u8..4 {
            let data = device.grab().expect("grab should succeed");
            assert!(data.iter().all(|&b| b == expected));
        }
    }

    #[test]
    fn test_scripted_failures_and_removal() {
        let mut device = MockDevice::new();
        device.fail_next_grabs(1);
        assert!(device.grab().is_err());
        assert!(!device.is_removed());
        assert!(device.grab().is_ok());

        device.remove();
        assert!(device.grab().is_err());
        assert!(device.is_removed());
    }

    #[test]
    fn test_exposure_settles_after_reads() {
        let mut device = MockDevice::new().with_exposure(1000.0);
        device.set_exposure(2000.0).expect("set_exposure should succeed");
        assert!((device.current_exposure().expect("read") - 1000.0).abs() < f64::EPSILON);
        assert!((device.current_exposure().expect("read") - 2000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_brightness_settles_after_grabs() {
        let mut device = MockDevice::new().with_brightness_response(BrightnessResponse {
            settle_grabs: 2,
            settle_to: Some(127),
        });
        device.set_brightness(128).expect("set_brightness should succeed");
        assert_eq!(device.is_auto_brightness_running(), Ok(true));

        device.grab().expect("grab");
        assert_eq!(device.is_auto_brightness_running(), Ok(true));
        let data = device.grab().expect("grab");
        assert_eq!(device.is_auto_brightness_running(), Ok(false));
        assert!(data.iter().all(|&b| b == 127));
    }
}
