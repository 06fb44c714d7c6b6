//! Acquisition summary built once per file.

use crate::coords::{Addressing, LoopDescriptor};
use crate::metadata::{ChannelMetadata, FileAttributes, PixelSize, VolumeShape};
use crate::source::AcquisitionSource;
use crate::{Error, Result};
use log::debug;
use std::path::PathBuf;

/// Everything the conversion needs to know about an acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionInfo {
    pub path: PathBuf,
    pub loops: Vec<LoopDescriptor>,
    pub addressing: Addressing,
    pub sequence_count: usize,
    pub attributes: FileAttributes,
    pub metadata: ChannelMetadata,
    /// The `Dimensions:` line of the text info, describing loop order.
    pub dimensions: Option<String>,
}

impl AcquisitionInfo {
    /// Queries and parses the metadata of `source`.
    ///
    /// # Errors
    /// Returns an error if the reader fails, a document cannot be parsed,
    /// or the loops contain no z-stack.
    pub fn read<S: AcquisitionSource + ?Sized>(source: &S) -> Result<Self> {
        let loops = source.loop_descriptors()?;
        for descriptor in &loops {
            debug!("loop {} (size {})", descriptor.name, descriptor.extent);
        }
        let addressing = Addressing::from_loops(&loops)?;
        let sequence_count = source.sequence_count()?;
        let attributes = FileAttributes::from_json(&source.attributes()?)?;
        let metadata = ChannelMetadata::from_json(&source.channel_metadata()?)?;

        let text = normalize_text_info(&source.text_info()?);
        let dimensions = text
            .lines()
            .find(|line| line.starts_with("Dimensions:"))
            .map(|line| line.trim_end().to_string());

        Ok(Self {
            path: source.path().to_path_buf(),
            loops,
            addressing,
            sequence_count,
            attributes,
            metadata,
            dimensions,
        })
    }

    /// Number of channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.metadata.channel_count()
    }

    /// Volume shape of channel 0.
    #[must_use]
    pub fn volume(&self) -> VolumeShape {
        self.metadata.volume()
    }

    /// Voxel size of channel 0.
    #[must_use]
    pub fn pixel_size(&self) -> PixelSize {
        self.metadata.pixel_size()
    }

    /// Checks the preconditions for converting to 16-bit planes.
    ///
    /// # Errors
    /// Returns an error if the bit depth is not 16, channels disagree on
    /// shape or calibration, frames do not interleave one sample per channel,
    /// the volume depth disagrees with the z-loop, or the loops address more
    /// frames than the file holds.
    pub fn validate_for_conversion(&self) -> Result<()> {
        self.attributes.ensure_16_bit()?;
        self.metadata.ensure_uniform()?;

        if self.attributes.component_count != self.channel_count() {
            return Err(Error::Metadata(format!(
                "frames carry {} components but {} channels are described",
                self.attributes.component_count,
                self.channel_count()
            )));
        }

        let volume = self.volume();
        if volume.width != self.attributes.width_px || volume.height != self.attributes.height_px {
            return Err(Error::Metadata(format!(
                "volume is {}x{} but frames are {}x{}",
                volume.width, volume.height, self.attributes.width_px, self.attributes.height_px
            )));
        }

        if volume.planes != self.addressing.plane_count() {
            return Err(Error::Metadata(format!(
                "volume holds {} planes but the z-loop has {}",
                volume.planes,
                self.addressing.plane_count()
            )));
        }

        if self.addressing.frame_count() > self.sequence_count {
            return Err(Error::SequenceCountMismatch {
                expected: self.addressing.frame_count(),
                available: self.sequence_count,
            });
        }
        Ok(())
    }
}

/// Turns the literal `\r\n` escapes found in text info into line breaks.
#[must_use]
pub fn normalize_text_info(text: &str) -> String {
    text.replace("\\r\\n", "\n")
}
