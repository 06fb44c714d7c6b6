//! In-memory acquisition with predictable pixel values.
//!
//! Every sample encodes where it came from, see [`SyntheticAcquisition::sample`],
//! so converted output can be checked without a real file.

use crate::coords::{LoopDescriptor, POSITION_LOOP, ZSTACK_LOOP};
use crate::source::{AcquisitionSource, Frame};
use crate::{Error, Result};
use serde_json::json;
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Synthetic acquisition of `fovs` z-stacks with any number of channels.
#[derive(Debug, Clone)]
pub struct SyntheticAcquisition {
    path: PathBuf,
    width: usize,
    height: usize,
    planes: usize,
    fovs: usize,
    channels: Vec<(String, f64)>,
    bits_per_sample: u32,
    pixel_size_um: [f64; 3],
    voxel_planes: Option<usize>,
    z_offsets_um: HashMap<usize, f64>,
    missing_frames: HashSet<usize>,
    failing_frames: HashSet<usize>,
    failing_frame_metadata: HashSet<usize>,
    frames_read: usize,
    frame_metadata_reads: Cell<usize>,
}

impl SyntheticAcquisition {
    /// Creates a single-FOV acquisition without channels.
    #[must_use]
    pub fn new(width: usize, height: usize, planes: usize) -> Self {
        Self {
            path: PathBuf::from("synthetic.nd2"),
            width,
            height,
            planes,
            fovs: 1,
            channels: Vec::new(),
            bits_per_sample: 16,
            pixel_size_um: [0.13, 0.13, 0.3],
            voxel_planes: None,
            z_offsets_um: HashMap::new(),
            missing_frames: HashSet::new(),
            failing_frames: HashSet::new(),
            failing_frame_metadata: HashSet::new(),
            frames_read: 0,
            frame_metadata_reads: Cell::new(0),
        }
    }

    /// Sets the reported file path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the number of fields of view.
    #[must_use]
    pub fn with_fovs(mut self, fovs: usize) -> Self {
        self.fovs = fovs;
        self
    }

    /// Appends a channel.
    #[must_use]
    pub fn with_channel(mut self, name: impl Into<String>, emission_nm: f64) -> Self {
        self.channels.push((name.into(), emission_nm));
        self
    }

    /// Sets the reported bits per sample in memory.
    #[must_use]
    pub fn with_bits_per_sample(mut self, bits: u32) -> Self {
        self.bits_per_sample = bits;
        self
    }

    /// Sets the voxel size in µm.
    #[must_use]
    pub fn with_pixel_size_um(mut self, dx: f64, dy: f64, dz: f64) -> Self {
        self.pixel_size_um = [dx, dy, dz];
        self
    }

    /// Reports `planes` as the volume depth regardless of the z-loop.
    #[must_use]
    pub fn with_voxel_planes(mut self, planes: usize) -> Self {
        self.voxel_planes = Some(planes);
        self
    }

    /// Shifts the stage z of frame `sequence` by `offset_um`.
    #[must_use]
    pub fn with_stage_offset(mut self, sequence: usize, offset_um: f64) -> Self {
        self.z_offsets_um.insert(sequence, offset_um);
        self
    }

    /// Makes frame `sequence` come back without pixel data.
    #[must_use]
    pub fn with_missing_frame(mut self, sequence: usize) -> Self {
        self.missing_frames.insert(sequence);
        self
    }

    /// Makes reading frame `sequence` fail.
    #[must_use]
    pub fn with_failing_frame(mut self, sequence: usize) -> Self {
        self.failing_frames.insert(sequence);
        self
    }

    /// Makes reading the metadata of frame `sequence` fail.
    #[must_use]
    pub fn with_failing_frame_metadata(mut self, sequence: usize) -> Self {
        self.failing_frame_metadata.insert(sequence);
        self
    }

    /// Returns how many frame metadata documents were requested so far.
    #[must_use]
    pub fn frame_metadata_reads(&self) -> usize {
        self.frame_metadata_reads.get()
    }

    /// Returns how many frames were read so far.
    #[must_use]
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Value of every pixel of `(fov, plane, channel)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample(fov: usize, plane: usize, channel: usize) -> u16 {
        (fov * 1000 + plane * 10 + channel) as u16
    }

    fn frame_count(&self) -> usize {
        self.fovs * self.planes
    }

    fn check_sequence(&self, sequence: usize) -> Result<()> {
        if sequence < self.frame_count() {
            Ok(())
        } else {
            Err(Error::InvalidSequenceIndex {
                index: sequence,
                count: self.frame_count(),
            })
        }
    }
}

impl AcquisitionSource for SyntheticAcquisition {
    fn path(&self) -> &Path {
        &self.path
    }

    fn loop_descriptors(&self) -> Result<Vec<LoopDescriptor>> {
        let mut loops = Vec::new();
        if self.fovs > 1 {
            loops.push(LoopDescriptor::new(POSITION_LOOP, self.fovs));
        }
        loops.push(LoopDescriptor::new(ZSTACK_LOOP, self.planes));
        Ok(loops)
    }

    fn sequence_count(&self) -> Result<usize> {
        Ok(self.frame_count())
    }

    fn attributes(&self) -> Result<String> {
        Ok(json!({
            "bitsPerComponentInMemory": self.bits_per_sample,
            "bitsPerComponentSignificant": self.bits_per_sample,
            "componentCount": self.channels.len(),
            "heightPx": self.height,
            "pixelDataType": "unsigned",
            "sequenceCount": self.frame_count(),
            "widthBytes": self.width * self.channels.len() * 2,
            "widthPx": self.width,
        })
        .to_string())
    }

    fn channel_metadata(&self) -> Result<String> {
        let channels: Vec<_> = self
            .channels
            .iter()
            .enumerate()
            .map(|(index, (name, emission))| {
                json!({
                    "channel": {"name": name, "index": index, "emissionLambdaNm": emission},
                    "microscope": {
                        "objectiveName": "Plan Apo VC 60x Oil",
                        "objectiveMagnification": 60.0,
                        "objectiveNumericalAperture": 1.4,
                        "immersionRefractiveIndex": 1.515,
                    },
                    "volume": {
                        "axesCalibration": self.pixel_size_um,
                        "voxelCount": [
                            self.width,
                            self.height,
                            self.voxel_planes.unwrap_or(self.planes),
                        ],
                    },
                })
            })
            .collect();
        Ok(json!({
            "contents": {"channelCount": self.channels.len(), "frameCount": self.frame_count()},
            "channels": channels,
        })
        .to_string())
    }

    #[allow(clippy::cast_precision_loss)]
    fn frame_metadata(&self, sequence: usize) -> Result<String> {
        self.frame_metadata_reads.set(self.frame_metadata_reads.get() + 1);
        self.check_sequence(sequence)?;
        if self.failing_frame_metadata.contains(&sequence) {
            return Err(Error::Source(format!("no metadata for frame {sequence}")));
        }
        let fov = sequence / self.planes;
        let plane = sequence % self.planes;
        let z = 1000.0
            + plane as f64 * self.pixel_size_um[2]
            + self.z_offsets_um.get(&sequence).copied().unwrap_or(0.0);
        let channels: Vec<_> = (0..self.channels.len())
            .map(|_| json!({"position": {"stagePositionUm": [fov as f64 * 500.0, 250.0, z]}}))
            .collect();
        Ok(json!({
            "contents": {"channelCount": self.channels.len()},
            "channels": channels,
        })
        .to_string())
    }

    fn text_info(&self) -> Result<String> {
        Ok(format!(
            "Metadata:\\r\\nDimensions: XY({}) x λ({}) x Z({})\\r\\n",
            self.fovs,
            self.channels.len(),
            self.planes
        ))
    }

    fn read_frame(&mut self, sequence: usize, frame: &mut Frame) -> Result<()> {
        self.check_sequence(sequence)?;
        if self.failing_frames.contains(&sequence) {
            return Err(Error::Source(format!("failed to read frame {sequence}")));
        }
        self.frames_read += 1;

        frame.width = self.width;
        frame.height = self.height;
        frame.components = self.channels.len();
        frame.data.clear();
        if self.missing_frames.contains(&sequence) {
            return Ok(());
        }

        let fov = sequence / self.planes;
        let plane = sequence % self.planes;
        let pixel: Vec<u16> = (0..self.channels.len())
            .map(|channel| Self::sample(fov, plane, channel))
            .collect();
        for _ in 0..self.width * self.height {
            frame.data.extend_from_slice(&pixel);
        }
        Ok(())
    }
}
