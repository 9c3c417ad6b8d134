//! Node configuration loaded from TOML.
//!
//! ```toml
//! device_index = 0
//! frame_id = "camera"
//! desired_frame_rate = 10.0
//! use_sequencer = false
//! sequence_exposure_times = [5000.0, 10000.0, 20000.0]
//!
//! [convergence]
//! exposure_timeout = "5s"
//! brightness_high_timeout = "15s"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// Values parse but make no sense together.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Timing and tolerance of the convergence controllers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvergenceConfig {
    /// How long an exposure request may take to settle.
    #[serde(with = "humantime_serde")]
    pub exposure_timeout: Duration,
    /// Exposure readback polling rate in Hz.
    pub exposure_poll_hz: f64,
    /// How long a brightness request waits for the first frame.
    #[serde(with = "humantime_serde")]
    pub readiness_timeout: Duration,
    /// Readiness polling rate in Hz.
    pub readiness_poll_hz: f64,
    /// Brightness settle time for targets up to the high threshold.
    #[serde(with = "humantime_serde")]
    pub brightness_timeout: Duration,
    /// Brightness settle time for targets above the high threshold.
    #[serde(with = "humantime_serde")]
    pub brightness_high_timeout: Duration,
    /// Targets above this use `brightness_high_timeout`.
    pub brightness_high_threshold: u8,
    /// Brightness flag polling rate in Hz.
    pub brightness_poll_hz: f64,
    /// Largest accepted distance between target and measured mean.
    pub brightness_tolerance: u8,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            exposure_timeout: Duration::from_secs(5),
            exposure_poll_hz: 5.0,
            readiness_timeout: Duration::from_secs(3),
            readiness_poll_hz: 2.0,
            brightness_timeout: Duration::from_secs(5),
            brightness_high_timeout: Duration::from_secs(15),
            brightness_high_threshold: 205,
            brightness_poll_hz: 5.0,
            brightness_tolerance: 2,
        }
    }
}

/// Configuration of one camera node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// V4L2 device index (`/dev/videoN`).
    pub device_index: u32,
    /// Coordinate frame id stamped into camera info.
    pub frame_id: String,
    /// Requested frame rate in Hz; the device maximum when absent.
    pub desired_frame_rate: Option<f64>,
    /// Grab exposure bursts instead of single frames.
    pub use_sequencer: bool,
    /// Exposure times of the burst, in device units.
    pub sequence_exposure_times: Vec<f64>,
    /// Convergence controller settings.
    pub convergence: ConvergenceConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            frame_id: "camera".to_owned(),
            desired_frame_rate: None,
            use_sequencer: false,
            sequence_exposure_times: Vec::new(),
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `Parse` or `Invalid`.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `Io`, `Parse` or `Invalid`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rate) = self.desired_frame_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "desired_frame_rate must be positive, got {rate}"
                )));
            }
        }

        if self.use_sequencer && self.sequence_exposure_times.is_empty() {
            return Err(ConfigError::Invalid(
                "use_sequencer requires sequence_exposure_times".to_owned(),
            ));
        }

        if let Some(bad) = self
            .sequence_exposure_times
            .iter()
            .find(|t| !(t.is_finite() && **t > 0.0))
        {
            return Err(ConfigError::Invalid(format!(
                "sequence exposure times must be positive, got {bad}"
            )));
        }

        let c = &self.convergence;
        for (name, hz) in [
            ("exposure_poll_hz", c.exposure_poll_hz),
            ("readiness_poll_hz", c.readiness_poll_hz),
            ("brightness_poll_hz", c.brightness_poll_hz),
        ] {
            if !(hz.is_finite() && hz > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {hz}"
                )));
            }
        }

        Ok(())
    }
}
