//! V4L2 device implementation using the v4l crate.

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::fraction::Fraction;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraDevice, CameraError, DeviceCapabilities, Format, FourCC, Geometry, PixelEncoding,
    Result, TransientFault,
};
use crate::validation::pack_rows;
use std::path::PathBuf;

const V4L2_CID_BRIGHTNESS: u32 = 0x0098_0900;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// `V4L2_EXPOSURE_MANUAL`.
const EXPOSURE_MANUAL: i64 = 1;

/// Errno reported once the device node has been unplugged.
const ENODEV: i32 = 19;

const BUFFER_COUNT: u32 = 4;

/// Grabs after a brightness write before the stream can show its effect.
///
/// V4L2 has no routine to report on; every queued buffer may predate the
/// write, so the setting counts as settling until they have all cycled.
const BRIGHTNESS_SETTLE_GRABS: u32 = BUFFER_COUNT + 1;

fn rate_of(interval: &Fraction) -> Option<f64> {
    (interval.numerator != 0 && interval.denominator != 0)
        .then(|| f64::from(interval.denominator) / f64::from(interval.numerator))
}

/// Highest rate among enumerated frame intervals.
fn fastest_rate<'a, I>(intervals: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a FrameIntervalEnum>,
{
    intervals
        .into_iter()
        .filter_map(|interval| match interval {
            FrameIntervalEnum::Discrete(fraction) => rate_of(fraction),
            FrameIntervalEnum::Stepwise(stepwise) => rate_of(&stepwise.min),
        })
        .reduce(f64::max)
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    node: PathBuf,
    device: Device,
    stream: Option<Stream<'static>>,
    capabilities: DeviceCapabilities,
    geometry: Geometry,
    stride: usize,
    max_frame_rate: f64,
    exposure_step: f64,
    removed: bool,
    ready: bool,
    brightness_settle: u32,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0) and apply `format`.
    pub fn open(index: u32, format: &Format) -> Result<Self> {
        let node = PathBuf::from(format!("/dev/video{index}"));
        if !node.exists() {
            return Err(CameraError::DeviceNotFound(index));
        }

        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        let mut fmt = device
            .format()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let encoding = PixelEncoding::try_from(FourCC::from(fmt.fourcc))?;
        let geometry = Geometry::new(fmt.width, fmt.height, encoding);

        // Drivers without frame interval support report nothing; the session falls back.
        let max_frame_rate = device
            .enum_frameintervals(fmt.fourcc, fmt.width, fmt.height)
            .ok()
            .and_then(|intervals| fastest_rate(intervals.iter().map(|fi| &fi.interval)))
            .or_else(|| device.params().ok().and_then(|params| rate_of(&params.interval)))
            .unwrap_or(0.0);

        #[allow(clippy::cast_precision_loss)]
        let exposure_step = device
            .query_controls()
            .ok()
            .and_then(|descs| {
                descs
                    .into_iter()
                    .find(|desc| desc.id == V4L2_CID_EXPOSURE_ABSOLUTE)
                    .map(|desc| desc.step.max(1) as f64)
            })
            .unwrap_or(1.0);

        Ok(Self {
            node,
            device,
            stream: None,
            capabilities,
            geometry,
            stride: fmt.stride as usize,
            max_frame_rate,
            exposure_step,
            removed: false,
            ready: false,
            brightness_settle: 0,
        })
    }

    /// Device capabilities queried at open.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn note_io_error(&mut self, err: &std::io::Error) {
        if err.raw_os_error() == Some(ENODEV) {
            self.removed = true;
        }
    }

    fn read_integer(&self, id: u32) -> Result<i64> {
        let control = self
            .device
            .control(id)
            .map_err(|err| CameraError::Control(err.to_string()))?;
        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            other => Err(CameraError::Control(format!(
                "Control {id:#x} has non-integer value {other:?}"
            ))),
        }
    }

    fn write_integer(&mut self, id: u32, value: i64) -> Result<()> {
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| {
                self.note_io_error(&err);
                CameraError::Control(err.to_string())
            })
    }
}

impl CameraDevice for V4L2Device {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn max_frame_rate(&self) -> f64 {
        self.max_frame_rate
    }

    fn grab(&mut self) -> Result<Vec<u8>> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => Stream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|err| {
                    self.note_io_error(&err);
                    CameraError::GrabFailed(err.to_string())
                })?,
        };
        let stream = self.stream.insert(stream);

        let (buf, _meta) = match stream.next() {
            Ok(next) => next,
            Err(err) => {
                self.note_io_error(&err);
                return Err(CameraError::GrabFailed(err.to_string()));
            }
        };

        let step = self.geometry.step() as usize;
        let stride = self.stride.max(step);
        let data = pack_rows(buf, stride, step, self.geometry.height as usize)?;
        self.ready = true;
        self.brightness_settle = self.brightness_settle.saturating_sub(1);
        Ok(data)
    }

    fn is_removed(&self) -> bool {
        self.removed || !self.node.exists()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_exposure(&self) -> Result<f64> {
        self.read_integer(V4L2_CID_EXPOSURE_ABSOLUTE)
            .map(|value| value as f64)
    }

    fn set_exposure(&mut self, exposure: f64) -> Result<()> {
        self.write_integer(V4L2_CID_EXPOSURE_AUTO, EXPOSURE_MANUAL)?;
        #[allow(clippy::cast_possible_truncation)]
        let value = exposure.round() as i64;
        self.write_integer(V4L2_CID_EXPOSURE_ABSOLUTE, value)
    }

    fn set_brightness(&mut self, brightness: u8) -> Result<()> {
        self.write_integer(V4L2_CID_BRIGHTNESS, i64::from(brightness))?;
        self.brightness_settle = BRIGHTNESS_SETTLE_GRABS;
        Ok(())
    }

    fn exposure_step(&self) -> f64 {
        self.exposure_step
    }

    fn is_auto_brightness_running(&self) -> std::result::Result<bool, TransientFault> {
        if self.removed {
            return Err(TransientFault("device removed".to_owned()));
        }
        Ok(self.brightness_settle > 0)
    }
}
