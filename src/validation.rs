//! Frame and sequence validation utilities.
//!
//! The acquisition engine runs every grabbed buffer through these checks
//! before it becomes the current frame. Integration tests use the same
//! functions to verify frames produced by virtual cameras.

use crate::traits::{CameraError, Frame, Geometry, Result, SequenceResult};

/// Validates that a buffer has exactly `step * height` bytes.
///
/// # Errors
///
/// Returns `InvalidFrame` if the length does not match the geometry.
pub fn validate_frame_layout(data: &[u8], geometry: &Geometry) -> Result<()> {
    let expected = geometry.frame_size();
    if data.len() == expected {
        Ok(())
    } else {
        Err(CameraError::InvalidFrame {
            expected,
            actual: data.len(),
        })
    }
}

/// Validates the all-or-nothing contract of a sequence result.
///
/// A successful result holds one frame per requested exposure time; a
/// failed result holds none.
///
/// # Errors
///
/// Returns `GrabFailed` describing the first violation found.
pub fn validate_sequence_result(result: &SequenceResult) -> Result<()> {
    let expected = if result.success {
        result.exposure_times.len()
    } else {
        0
    };

    if result.frames.len() != expected {
        return Err(CameraError::GrabFailed(format!(
            "Sequence result (success={}) holds {} frames, expected {expected}",
            result.success,
            result.frames.len()
        )));
    }

    for (idx, frame) in result.frames.iter().enumerate() {
        validate_frame_layout(&frame.data, &frame.geometry).map_err(|err| {
            CameraError::GrabFailed(format!("Sequence frame {idx} is malformed: {err}"))
        })?;
    }

    Ok(())
}

/// Validates that a frame's mean intensity lies within `tolerance` of `expected`.
///
/// # Errors
///
/// Returns `GrabFailed` if the frame is empty or the mean is out of range.
pub fn validate_mean_intensity(frame: &Frame, expected: u8, tolerance: u8) -> Result<()> {
    let mean = frame
        .mean_intensity()
        .ok_or_else(|| CameraError::GrabFailed("Cannot measure an empty frame".to_owned()))?;

    if mean.abs_diff(expected) > tolerance {
        return Err(CameraError::GrabFailed(format!(
            "Mean intensity {mean} not within {tolerance} of {expected}"
        )));
    }

    Ok(())
}

/// Copies the first `step` bytes of every `stride`-long row into a packed buffer.
///
/// Drivers may pad rows; frames must not carry that padding.
///
/// # Errors
///
/// Returns `InvalidFrame` if `raw` is too short for `height` rows.
pub fn pack_rows(raw: &[u8], stride: usize, step: usize, height: usize) -> Result<Vec<u8>> {
    let expected = step * height;

    if stride == step {
        return raw
            .get(..expected)
            .map(<[u8]>::to_vec)
            .ok_or(CameraError::InvalidFrame {
                expected,
                actual: raw.len(),
            });
    }

    let mut packed = Vec::with_capacity(expected);
    for row in 0..height {
        let start = row * stride;
        let line = raw
            .get(start..start + step)
            .ok_or(CameraError::InvalidFrame {
                expected: stride * height,
                actual: raw.len(),
            })?;
        packed.extend_from_slice(line);
    }
    Ok(packed)
}
