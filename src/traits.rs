//! Core traits and types for camera acquisition and control.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Pixel format representation (e.g., YUYV, GREY, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// 8-bit greyscale.
    pub const GREY: Self = Self::new(b"GREY");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel encoding of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    /// One byte per pixel, luminance only.
    Mono8,
    /// Packed YUV 4:2:2, two bytes per pixel.
    Yuv422,
    /// Three bytes per pixel, red/green/blue.
    Rgb8,
}

impl PixelEncoding {
    /// Bytes per pixel.
    #[must_use]
    pub const fn pixel_depth(self) -> u32 {
        match self {
            Self::Mono8 => 1,
            Self::Yuv422 => 2,
            Self::Rgb8 => 3,
        }
    }

    /// Canonical encoding name (`mono8`, `yuv422`, `rgb8`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mono8 => "mono8",
            Self::Yuv422 => "yuv422",
            Self::Rgb8 => "rgb8",
        }
    }
}

impl TryFrom<FourCC> for PixelEncoding {
    type Error = CameraError;

    fn try_from(fourcc: FourCC) -> Result<Self> {
        match fourcc {
            FourCC::GREY => Ok(Self::Mono8),
            FourCC::YUYV => Ok(Self::Yuv422),
            FourCC::RGB3 => Ok(Self::Rgb8),
            other => Err(CameraError::FormatNotSupported(other)),
        }
    }
}

/// Video format requested from a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
}

impl Format {
    /// Create a format request.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
        }
    }
}

/// Static image geometry reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Image width in pixels (cols).
    pub width: u32,
    /// Image height in pixels (rows).
    pub height: u32,
    /// Pixel encoding.
    pub encoding: PixelEncoding,
}

impl Geometry {
    /// Create a geometry.
    #[must_use]
    pub const fn new(width: u32, height: u32, encoding: PixelEncoding) -> Self {
        Self {
            width,
            height,
            encoding,
        }
    }

    /// Bytes per pixel.
    #[must_use]
    pub const fn pixel_depth(&self) -> u32 {
        self.encoding.pixel_depth()
    }

    /// Full row length in bytes.
    #[must_use]
    pub const fn step(&self) -> u32 {
        self.width * self.pixel_depth()
    }

    /// Frame buffer size in bytes (`step * height`).
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.step() as usize * self.height as usize
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Number of successful grabs before this one.
    pub sequence: u64,
    /// Acquisition time since the Unix epoch.
    pub timestamp: Duration,
}

/// A captured frame.
///
/// Frames are never mutated after creation; a new grab produces a new frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw pixel data, `geometry.frame_size()` bytes.
    pub data: Vec<u8>,
    /// Geometry and encoding inherited from the device.
    pub geometry: Geometry,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Unweighted mean over every byte of the buffer, truncated.
    ///
    /// Returns `None` for an empty buffer.
    #[must_use]
    pub fn mean_intensity(&self) -> Option<u8> {
        if self.data.is_empty() {
            return None;
        }
        let sum: u64 = self.data.iter().map(|&b| u64::from(b)).sum();
        let mean = sum / self.data.len() as u64;
        u8::try_from(mean).ok()
    }
}

/// Camera info published alongside every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Coordinate frame id of the camera.
    pub frame_id: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Distortion model name.
    pub distortion_model: String,
    /// Stamp shared with the published frame.
    pub stamp: Duration,
}

/// Distortion model advertised until calibration data is supplied.
pub const DEFAULT_DISTORTION_MODEL: &str = "plumb_bob";

/// Exposure times of the sequencer, stamped with the published frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureTimes {
    /// Stamp shared with the published frame.
    pub stamp: Duration,
    /// Programmed exposure times in device units.
    pub exposure_times: Vec<f64>,
}

/// Result of an on-demand sequence grab.
#[derive(Debug, Clone)]
pub struct SequenceResult {
    /// One frame per requested exposure time, or empty on failure.
    pub frames: Vec<Frame>,
    /// The requested exposure times.
    pub exposure_times: Vec<f64>,
    /// Whether every grab succeeded.
    pub success: bool,
}

/// Current wall-clock time as a duration since the Unix epoch.
#[must_use]
pub fn now_stamp() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Pixel format has no supported encoding.
    #[error("Format not supported: {0}")]
    FormatNotSupported(FourCC),
    /// The device returned no usable frame.
    #[error("Grab failed: {0}")]
    GrabFailed(String),
    /// The device is gone; nothing on it can be retried.
    #[error("Camera has been removed")]
    DeviceRemoved,
    /// Reading or writing a device control failed.
    #[error("Control error: {0}")]
    Control(String),
    /// A grabbed buffer does not match the advertised geometry.
    #[error("Invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame {
        /// Expected buffer length.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether the error must stop acquisition for good.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceRemoved)
    }
}

/// A device feature that is temporarily not accessible.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Device feature not accessible: {0}")]
pub struct TransientFault(pub String);

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the imaging hardware.
///
/// Implementations need not be internally synchronised; the acquisition
/// engine serialises every call behind one lock.
pub trait CameraDevice: Send {
    /// Static image geometry.
    fn geometry(&self) -> Geometry;

    /// Maximum frame rate the device supports, in Hz.
    fn max_frame_rate(&self) -> f64;

    /// Grab one frame into a new buffer.
    fn grab(&mut self) -> Result<Vec<u8>>;

    /// Whether the device has been disconnected.
    fn is_removed(&self) -> bool;

    /// Whether the device is grabbing and accepts control requests.
    fn is_ready(&self) -> bool;

    /// Exposure readback in device time units.
    fn current_exposure(&self) -> Result<f64>;

    /// Command a new exposure setpoint.
    fn set_exposure(&mut self, exposure: f64) -> Result<()>;

    /// Command a new brightness setpoint (mean intensity 0-255).
    fn set_brightness(&mut self, brightness: u8) -> Result<()>;

    /// Smallest exposure increment the device resolves.
    fn exposure_step(&self) -> f64;

    /// Whether the device is still settling a brightness change.
    fn is_auto_brightness_running(&self) -> std::result::Result<bool, TransientFault>;
}
