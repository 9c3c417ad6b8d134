//! Outbound surface: where ticks deliver frames.

use crate::traits::{CameraInfo, ExposureTimes, Frame};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Messages buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 16;

/// Consumer of published frames.
pub trait FrameSink: Send + Sync {
    /// Number of live subscribers; ticks grab nothing while this is zero.
    fn subscriber_count(&self) -> usize;

    /// Deliver a frame together with its camera info.
    fn publish_frame(&self, frame: Arc<Frame>, info: &CameraInfo);

    /// Deliver the exposure times of the sequencer burst a frame came from.
    fn publish_exposure_times(&self, times: &ExposureTimes);
}

/// A message delivered to a [`ChannelSink`] subscriber.
#[derive(Debug, Clone)]
pub enum Published {
    /// A frame and its camera info.
    Frame {
        /// The frame, shared with the engine.
        frame: Arc<Frame>,
        /// Camera info stamped like the frame.
        info: CameraInfo,
    },
    /// Exposure times of a sequencer burst.
    ExposureTimes(ExposureTimes),
}

/// Bounded fan-out sink over a broadcast channel.
///
/// Each subscriber holds at most `capacity` messages. A subscriber that falls
/// further behind loses the oldest ones and sees `RecvError::Lagged`.
#[derive(Debug)]
pub struct ChannelSink {
    tx: broadcast::Sender<Published>,
}

impl ChannelSink {
    /// Create a sink with no subscribers and the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a sink buffering up to `capacity` messages per subscriber.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.tx.subscribe()
    }

    fn broadcast(&self, message: Published) {
        // No receivers is not an error; ticks check the count first.
        let _ = self.tx.send(message);
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for ChannelSink {
    fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish_frame(&self, frame: Arc<Frame>, info: &CameraInfo) {
        self.broadcast(Published::Frame {
            frame,
            info: info.clone(),
        });
    }

    fn publish_exposure_times(&self, times: &ExposureTimes) {
        self.broadcast(Published::ExposureTimes(times.clone()));
    }
}
