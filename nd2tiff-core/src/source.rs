//! The acquisition reader capability.

use crate::coords::LoopDescriptor;
use crate::Result;
use std::path::Path;

/// One interleaved frame as delivered by a reader.
///
/// Holds `width * height` pixels with `components` samples each.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub components: usize,
    /// Interleaved samples. Readers leave this empty when no data is available.
    pub data: Vec<u16>,
}

impl Frame {
    /// Allocates a zeroed frame.
    #[must_use]
    pub fn new(width: usize, height: usize, components: usize) -> Self {
        Self {
            width,
            height,
            components,
            data: vec![0; width * height * components],
        }
    }

    /// Returns the number of samples a full frame holds.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.width * self.height * self.components
    }

    /// Returns the interleaved samples.
    #[must_use]
    pub fn samples(&self) -> &[u16] {
        &self.data
    }
}

/// Read access to a multi-dimensional acquisition.
///
/// Metadata is handed out as the JSON documents the vendor reader produces;
/// the typed model in [`crate::metadata`] parses them. Implementations exist
/// for the Nikon SDK and for synthetic in-memory data.
pub trait AcquisitionSource {
    /// Path of the acquisition on disk, used in logs and file tags.
    fn path(&self) -> &Path;

    /// Coordinate loops, outermost first.
    ///
    /// # Errors
    /// Returns an error if the reader fails.
    fn loop_descriptors(&self) -> Result<Vec<LoopDescriptor>>;

    /// Number of frames in the file.
    ///
    /// # Errors
    /// Returns an error if the reader fails.
    fn sequence_count(&self) -> Result<usize>;

    /// Whole-file attribute document.
    ///
    /// # Errors
    /// Returns an error if the reader fails.
    fn attributes(&self) -> Result<String>;

    /// Channel and volume metadata document.
    ///
    /// # Errors
    /// Returns an error if the reader fails.
    fn channel_metadata(&self) -> Result<String>;

    /// Metadata document of the frame at `sequence`.
    ///
    /// # Errors
    /// Returns an error if the reader fails or `sequence` is out of range.
    fn frame_metadata(&self, sequence: usize) -> Result<String>;

    /// Free-form text description of the acquisition.
    ///
    /// # Errors
    /// Returns an error if the reader fails.
    fn text_info(&self) -> Result<String> {
        Ok(String::new())
    }

    /// Experiment description document.
    ///
    /// # Errors
    /// Returns an error if the reader fails.
    fn experiment(&self) -> Result<String> {
        Ok(String::new())
    }

    /// Reads the interleaved pixels of frame `sequence` into `frame`.
    ///
    /// # Errors
    /// Returns an error if the reader fails or `sequence` is out of range.
    fn read_frame(&mut self, sequence: usize, frame: &mut Frame) -> Result<()>;
}

impl<S: AcquisitionSource + ?Sized> AcquisitionSource for &mut S {
    fn path(&self) -> &Path {
        (**self).path()
    }

    fn loop_descriptors(&self) -> Result<Vec<LoopDescriptor>> {
        (**self).loop_descriptors()
    }

    fn sequence_count(&self) -> Result<usize> {
        (**self).sequence_count()
    }

    fn attributes(&self) -> Result<String> {
        (**self).attributes()
    }

    fn channel_metadata(&self) -> Result<String> {
        (**self).channel_metadata()
    }

    fn frame_metadata(&self, sequence: usize) -> Result<String> {
        (**self).frame_metadata(sequence)
    }

    fn text_info(&self) -> Result<String> {
        (**self).text_info()
    }

    fn experiment(&self) -> Result<String> {
        (**self).experiment()
    }

    fn read_frame(&mut self, sequence: usize, frame: &mut Frame) -> Result<()> {
        (**self).read_frame(sequence, frame)
    }
}
