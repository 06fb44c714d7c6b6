//! Typed acquisition metadata.
//!
//! The reader hands out JSON documents; these types pick the fields the
//! conversion needs and validate them once per acquisition.

use crate::{Error, Result};
use serde::Deserialize;

/// Relative tolerance when comparing calibrations between channels.
const CALIBRATION_TOLERANCE: f64 = 1e-9;

/// Whole-file attributes (`Lim_FileGetAttributes`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAttributes {
    /// Bits per sample as stored in memory.
    pub bits_per_component_in_memory: u32,
    /// Bits per sample carrying signal.
    pub bits_per_component_significant: u32,
    /// Samples per interleaved pixel, i.e. the channel count.
    pub component_count: usize,
    /// Frame height in pixels.
    pub height_px: usize,
    /// Frame width in pixels.
    pub width_px: usize,
    /// Number of frames in the file.
    pub sequence_count: usize,
    /// Sample type, usually `unsigned`.
    #[serde(default)]
    pub pixel_data_type: String,
}

impl FileAttributes {
    /// Parses the attribute document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON or lacks a field.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks that samples are 16 bit in memory, the only convertible depth.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedBitDepth`] otherwise.
    pub fn ensure_16_bit(&self) -> Result<()> {
        if self.bits_per_component_in_memory == 16 {
            Ok(())
        } else {
            Err(Error::UnsupportedBitDepth(self.bits_per_component_in_memory))
        }
    }
}

/// Volume shape in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeShape {
    /// Columns.
    pub width: usize,
    /// Rows.
    pub height: usize,
    /// Planes in the z-stack.
    pub planes: usize,
}

impl VolumeShape {
    /// Returns the number of pixels in one plane.
    #[must_use]
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }
}

/// Calibrated voxel size in nanometres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSize {
    pub dx_nm: f64,
    pub dy_nm: f64,
    pub dz_nm: f64,
}

impl PixelSize {
    fn approx_eq(&self, other: &Self) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= CALIBRATION_TOLERANCE * a.abs().max(b.abs());
        close(self.dx_nm, other.dx_nm)
            && close(self.dy_nm, other.dy_nm)
            && close(self.dz_nm, other.dz_nm)
    }
}

/// Optics and calibration of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    /// Channel position in the interleaved frame.
    pub index: usize,
    /// Label such as `DAPI`, not guaranteed to be unique.
    pub name: String,
    /// Emission wavelength in nm.
    pub emission_nm: Option<f64>,
    pub objective_name: Option<String>,
    pub objective_magnification: Option<f64>,
    pub numerical_aperture: Option<f64>,
    pub immersion_refractive_index: Option<f64>,
    pub shape: VolumeShape,
    pub pixel_size: PixelSize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    contents: RawContents,
    #[serde(default)]
    channels: Vec<RawChannel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContents {
    channel_count: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChannel {
    channel: RawChannelDesc,
    #[serde(default)]
    microscope: RawMicroscope,
    volume: RawVolume,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChannelDesc {
    name: String,
    index: Option<usize>,
    emission_lambda_nm: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawMicroscope {
    objective_name: Option<String>,
    objective_magnification: Option<f64>,
    objective_numerical_aperture: Option<f64>,
    immersion_refractive_index: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVolume {
    /// Voxel size in micrometres, x y z.
    axes_calibration: [f64; 3],
    /// Voxel count, x y z.
    voxel_count: [usize; 3],
}

impl RawChannel {
    fn into_info(self, position: usize) -> ChannelInfo {
        let [dx, dy, dz] = self.volume.axes_calibration;
        let [width, height, planes] = self.volume.voxel_count;
        ChannelInfo {
            index: self.channel.index.unwrap_or(position),
            name: self.channel.name,
            emission_nm: self.channel.emission_lambda_nm,
            objective_name: self.microscope.objective_name,
            objective_magnification: self.microscope.objective_magnification,
            numerical_aperture: self.microscope.objective_numerical_aperture,
            immersion_refractive_index: self.microscope.immersion_refractive_index,
            shape: VolumeShape {
                width,
                height,
                planes,
            },
            pixel_size: PixelSize {
                dx_nm: dx * 1000.0,
                dy_nm: dy * 1000.0,
                dz_nm: dz * 1000.0,
            },
        }
    }
}

/// Per-channel metadata of an acquisition (`Lim_FileGetMetadata`).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMetadata {
    channels: Vec<ChannelInfo>,
}

impl ChannelMetadata {
    /// Parses the metadata document.
    ///
    /// # Errors
    /// Returns an error if the document is malformed, declares no channels,
    /// or declares a different number of channels than it describes.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawMetadata = serde_json::from_str(json)?;
        if raw.contents.channel_count == 0 {
            return Err(Error::Metadata("acquisition declares no channels".into()));
        }
        if raw.channels.len() != raw.contents.channel_count {
            return Err(Error::Metadata(format!(
                "channelCount is {} but {} channels are described",
                raw.contents.channel_count,
                raw.channels.len()
            )));
        }

        let channels = raw
            .channels
            .into_iter()
            .enumerate()
            .map(|(position, channel)| channel.into_info(position))
            .collect();
        Ok(Self { channels })
    }

    /// Creates metadata from already parsed channels.
    ///
    /// # Errors
    /// Returns an error if `channels` is empty.
    pub fn new(channels: Vec<ChannelInfo>) -> Result<Self> {
        if channels.is_empty() {
            return Err(Error::Metadata("acquisition declares no channels".into()));
        }
        Ok(Self { channels })
    }

    /// Returns all channels in frame order.
    #[must_use]
    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    /// Returns the channel at `index`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidChannel`] if there is no such channel.
    pub fn channel(&self, index: usize) -> Result<&ChannelInfo> {
        self.channels.get(index).ok_or(Error::InvalidChannel {
            channel: index,
            channels: self.channels.len(),
        })
    }

    /// Returns the number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Volume shape, taken from channel 0.
    #[must_use]
    pub fn volume(&self) -> VolumeShape {
        self.channels[0].shape
    }

    /// Voxel size, taken from channel 0.
    #[must_use]
    pub fn pixel_size(&self) -> PixelSize {
        self.channels[0].pixel_size
    }

    /// Checks that all channels share channel 0's shape and calibration.
    ///
    /// # Errors
    /// Returns [`Error::NonUniformChannels`] naming the first channel that differs.
    pub fn ensure_uniform(&self) -> Result<()> {
        let reference = &self.channels[0];
        for channel in &self.channels[1..] {
            if channel.shape != reference.shape {
                return Err(Error::NonUniformChannels {
                    channel: channel.index,
                    reason: format!(
                        "volume {}x{}x{} vs {}x{}x{}",
                        channel.shape.width,
                        channel.shape.height,
                        channel.shape.planes,
                        reference.shape.width,
                        reference.shape.height,
                        reference.shape.planes
                    ),
                });
            }
            if !channel.pixel_size.approx_eq(&reference.pixel_size) {
                return Err(Error::NonUniformChannels {
                    channel: channel.index,
                    reason: "pixel size differs".into(),
                });
            }
        }
        Ok(())
    }
}
