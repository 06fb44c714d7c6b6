//! Stage positions and z-drift ("shake") detection.

use crate::coords::Addressing;
use crate::source::AcquisitionSource;
use crate::{Error, Result};
use serde::Deserialize;

/// Step variation above this many nanometres is reported as drift.
pub const DRIFT_TOLERANCE_NM: f64 = 1.0;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(default)]
    channels: Vec<RawFrameChannel>,
}

#[derive(Deserialize)]
struct RawFrameChannel {
    position: RawPosition,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    stage_position_um: [f64; 3],
}

/// Extracts per-channel `(x, y, z)` stage positions in µm from one frame document.
///
/// # Errors
/// Returns an error if the document is malformed or describes a different
/// number of channels than `channels`.
pub fn parse_frame_positions(json: &str, channels: usize) -> Result<Vec<[f64; 3]>> {
    let frame: RawFrame = serde_json::from_str(json)?;
    if frame.channels.len() != channels {
        return Err(Error::Metadata(format!(
            "frame metadata describes {} channels, expected {channels}",
            frame.channels.len()
        )));
    }
    Ok(frame
        .channels
        .into_iter()
        .map(|c| c.position.stage_position_um)
        .collect())
}

/// Stage position of every frame and channel.
///
/// Stored flat as `index * 3 * channels + channel * 3 + axis`. This is the
/// only structure that scales with the whole acquisition, so it is built on
/// demand.
#[derive(Debug, Clone)]
pub struct StagePositionTable {
    channels: usize,
    frames: usize,
    data: Vec<f64>,
}

impl StagePositionTable {
    /// Reads the frame metadata of every frame in `source`.
    ///
    /// # Errors
    /// Returns an error if any frame document cannot be read or parsed.
    pub fn from_source<S: AcquisitionSource + ?Sized>(
        source: &S,
        frames: usize,
        channels: usize,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(frames * 3 * channels);
        for sequence in 0..frames {
            let positions = parse_frame_positions(&source.frame_metadata(sequence)?, channels)?;
            data.extend(positions.iter().flatten());
        }
        Ok(Self {
            channels,
            frames,
            data,
        })
    }

    /// Builds a table from flat data laid out as described on the type.
    ///
    /// # Errors
    /// Returns an error if `data` does not hold `3 * channels` values per frame.
    pub fn from_raw(data: Vec<f64>, channels: usize) -> Result<Self> {
        if channels == 0 || data.len() % (3 * channels) != 0 {
            return Err(Error::Metadata(format!(
                "{} stage values do not fit {channels} channels",
                data.len()
            )));
        }
        Ok(Self {
            channels,
            frames: data.len() / (3 * channels),
            data,
        })
    }

    /// Returns the number of frames covered.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Returns the `(x, y, z)` position of `channel` in frame `sequence`.
    ///
    /// # Errors
    /// Returns an error if either index is out of range.
    pub fn position(&self, sequence: usize, channel: usize) -> Result<[f64; 3]> {
        if channel >= self.channels {
            return Err(Error::InvalidChannel {
                channel,
                channels: self.channels,
            });
        }
        if sequence >= self.frames {
            return Err(Error::InvalidSequenceIndex {
                index: sequence,
                count: self.frames,
            });
        }
        let base = sequence * 3 * self.channels + channel * 3;
        Ok([self.data[base], self.data[base + 1], self.data[base + 2]])
    }
}

/// Outcome of a z-step consistency check for one `(fov, channel)` stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageDrift {
    pub fov: usize,
    pub channel: usize,
    /// Smallest step between consecutive planes, µm.
    pub min_step_um: f64,
    /// Largest step between consecutive planes, µm.
    pub max_step_um: f64,
}

impl StageDrift {
    /// Spread of the z-steps in nm.
    #[must_use]
    pub fn variation_nm(&self) -> f64 {
        (self.max_step_um - self.min_step_um).abs() * 1000.0
    }

    /// True if the z-step varies by more than [`DRIFT_TOLERANCE_NM`].
    #[must_use]
    pub fn is_drifting(&self) -> bool {
        self.variation_nm() > DRIFT_TOLERANCE_NM
    }
}

/// Compares successive z-steps of the stack at `(fov, channel)`.
///
/// Stacks with fewer than two planes have no steps and report zero variation.
///
/// # Errors
/// Returns an error if the stack is not covered by `table`.
pub fn check_stage_drift(
    table: &StagePositionTable,
    addressing: &Addressing,
    fov: usize,
    channel: usize,
) -> Result<StageDrift> {
    let mut min_step = f64::INFINITY;
    let mut max_step = f64::NEG_INFINITY;

    let mut previous = table.position(addressing.sequence_index(fov, 0), channel)?[2];
    for plane in 1..addressing.plane_count() {
        let z = table.position(addressing.sequence_index(fov, plane), channel)?[2];
        let step = z - previous;
        min_step = min_step.min(step);
        max_step = max_step.max(step);
        previous = z;
    }

    if addressing.plane_count() < 2 {
        min_step = 0.0;
        max_step = 0.0;
    }

    Ok(StageDrift {
        fov,
        channel,
        min_step_um: min_step,
        max_step_um: max_step,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(z: &[f64], channels: usize) -> StagePositionTable {
        let mut data = Vec::new();
        for &value in z {
            for _ in 0..channels {
                data.extend([10.0, 20.0, value]);
            }
        }
        StagePositionTable::from_raw(data, channels).unwrap()
    }

    #[test]
    fn test_uniform_steps_do_not_drift() {
        let z: Vec<f64> = (0..8).map(|k| 100.0 + 0.3 * f64::from(k)).collect();
        let table = table(&z, 2);
        let drift = check_stage_drift(&table, &Addressing::new(1, 8), 0, 1).unwrap();
        assert_relative_eq!(drift.min_step_um, 0.3, epsilon = 1e-9);
        assert_relative_eq!(drift.max_step_um, 0.3, epsilon = 1e-9);
        assert!(!drift.is_drifting());
    }

    #[test]
    fn test_outlier_step_drifts() {
        let mut z: Vec<f64> = (0..8).map(|k| 100.0 + 0.3 * f64::from(k)).collect();
        for value in &mut z[5..] {
            *value += 0.002;
        }
        let table = table(&z, 1);
        let drift = check_stage_drift(&table, &Addressing::new(1, 8), 0, 0).unwrap();
        assert!(drift.is_drifting());
        assert_relative_eq!(drift.variation_nm(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_second_fov_uses_its_own_frames() {
        let mut z: Vec<f64> = (0..4).map(|k| 0.5 * f64::from(k)).collect();
        z.extend([0.0, 0.1, 0.2, 0.3]);
        let table = table(&z, 1);
        let addressing = Addressing::new(2, 4);

        let first = check_stage_drift(&table, &addressing, 0, 0).unwrap();
        let second = check_stage_drift(&table, &addressing, 1, 0).unwrap();
        assert_relative_eq!(first.max_step_um, 0.5, epsilon = 1e-9);
        assert_relative_eq!(second.max_step_um, 0.1, epsilon = 1e-9);
        assert!(!second.is_drifting());
    }

    #[test]
    fn test_single_plane() {
        let table = table(&[3.0], 1);
        let drift = check_stage_drift(&table, &Addressing::new(1, 1), 0, 0).unwrap();
        assert!(!drift.is_drifting());
    }

    #[test]
    fn test_out_of_range() {
        let table = table(&[0.0, 1.0], 1);
        assert!(check_stage_drift(&table, &Addressing::new(2, 2), 1, 0).is_err());
        assert!(table.position(0, 1).is_err());
    }

    #[test]
    fn test_parse_frame_positions() {
        let json = r#"{"contents": {"channelCount": 2}, "channels": [
            {"position": {"stagePositionUm": [1.0, 2.0, 3.0]}, "time": {}},
            {"position": {"stagePositionUm": [1.0, 2.0, 3.5]}}
        ]}"#;
        let positions = parse_frame_positions(json, 2).unwrap();
        assert_eq!(positions, vec![[1.0, 2.0, 3.0], [1.0, 2.0, 3.5]]);
        assert!(parse_frame_positions(json, 3).is_err());
    }
}
