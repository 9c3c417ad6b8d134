//! Cam-Acquire: acquisition and convergence control for a single camera
//!
//! This library serialises all access to one imaging device, grabs single
//! frames or exposure bursts on a periodic tick, and drives exposure and
//! brightness to requested targets within bounded time.

pub mod brightness;
pub mod config;
pub mod convergence;
pub mod device;
pub mod engine;
pub mod exposure;
pub mod publish;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use config::{ConfigError, ConvergenceConfig, NodeConfig};
pub use convergence::Convergence;
pub use device::V4L2Device;
pub use engine::AcquisitionEngine;
pub use publish::{ChannelSink, FrameSink, Published};
pub use session::{CameraSession, TickOutcome};
pub use traits::{
    CameraDevice, CameraError, CameraInfo, ExposureTimes, Format, FourCC, Frame, FrameMetadata,
    Geometry, PixelEncoding, SequenceResult, TransientFault,
};
