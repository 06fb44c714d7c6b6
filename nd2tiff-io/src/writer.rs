//! Streaming multi-page TIFF writer.
//!
//! Planes are appended one at a time so only a single plane is ever held in
//! memory. Files that would pass 4 GiB are written as BigTIFF.

use crate::tags::ContainerTags;
use crate::{Error, Result};
use log::debug;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use tiff::encoder::{colortype, TiffEncoder, TiffKind, TiffKindBig, TiffKindStandard};
use tiff::tags::{ResolutionUnit, Tag};

/// Files at least this large (pixel bytes) use 64-bit offsets.
pub const BIG_TIFF_THRESHOLD: u64 = 1 << 32;

/// `PageNumber` tag, `(page, total)` as two shorts.
const PAGE_NUMBER_TAG: u16 = 297;
/// ImageJ private tags for composite display metadata.
const IJ_META_DATA_BYTE_COUNTS_TAG: u16 = 50838;
const IJ_META_DATA_TAG: u16 = 50839;

/// The `PageNumber` tag as the decoder keys it.
#[must_use]
pub fn page_number_tag() -> Tag {
    Tag::from_u16_exhaustive(PAGE_NUMBER_TAG)
}

/// ImageJ's `MetaDataByteCounts` and `MetaData` tags as the decoder keys them.
#[must_use]
pub fn imagej_metadata_tags() -> (Tag, Tag) {
    (
        Tag::from_u16_exhaustive(IJ_META_DATA_BYTE_COUNTS_TAG),
        Tag::from_u16_exhaustive(IJ_META_DATA_TAG),
    )
}

/// `NewSubfileType` value for one page of a multi-page file.
const FILETYPE_PAGE: u32 = 2;
const ORIENTATION_TOP_LEFT: u16 = 1;
const PLANAR_CONTIG: u16 = 1;

/// Returns true if `pages` 16-bit planes need a BigTIFF container.
#[must_use]
pub fn needs_big_tiff(width: u32, height: u32, pages: usize) -> bool {
    u64::from(width) * u64::from(height) * pages as u64 * 2 >= BIG_TIFF_THRESHOLD
}

/// What a finished writer produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Planes written.
    pub written: usize,
    /// Planes declared when the file was opened.
    pub expected: usize,
    /// True if the file uses 64-bit offsets.
    pub big_tiff: bool,
}

impl WriteSummary {
    /// True if every declared plane was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.written == self.expected
    }
}

enum Encoder<W: Write + Seek> {
    Standard(TiffEncoder<W, TiffKindStandard>),
    Big(TiffEncoder<W, TiffKindBig>),
}

/// Multi-page 16-bit grayscale TIFF writer with a fixed page count.
///
/// The Software and ImageDescription tags, and ImageJ's composite metadata
/// when there is more than one channel, go on the first page. Every page
/// records its ordinal and the declared total in `PageNumber`.
pub struct StreamingWriter<W: Write + Seek> {
    encoder: Encoder<W>,
    tags: ContainerTags,
    expected: usize,
    written: usize,
}

impl StreamingWriter<File> {
    /// Creates the file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, tags: ContainerTags) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file, tags)
    }
}

impl<W: Write + Seek> StreamingWriter<W> {
    /// Starts a TIFF file on `writer` holding `tags.page_count()` pages.
    ///
    /// # Errors
    /// Returns an error if the header cannot be written or the page count
    /// does not fit the `PageNumber` tag.
    pub fn new(writer: W, tags: ContainerTags) -> Result<Self> {
        let expected = tags.page_count();
        if u16::try_from(expected).is_err() {
            return Err(Error::TooManyPages(expected));
        }

        let encoder = if needs_big_tiff(tags.width, tags.height, expected) {
            debug!("using BigTIFF for {expected} pages of {}x{}", tags.width, tags.height);
            Encoder::Big(TiffEncoder::new_big(writer)?)
        } else {
            Encoder::Standard(TiffEncoder::new(writer)?)
        };

        Ok(Self {
            encoder,
            tags,
            expected,
            written: 0,
        })
    }

    /// Number of planes written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Number of planes the file was opened for.
    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Appends one plane of `width * height` samples, rows top to bottom.
    ///
    /// # Errors
    /// Returns [`Error::TooManyPlanes`] once all declared planes are written,
    /// a core `MissingPixelData` error if `plane` is too short, or the
    /// encoder's error.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_plane(&mut self, plane: &[u16]) -> Result<()> {
        if self.written == self.expected {
            return Err(Error::TooManyPlanes {
                expected: self.expected,
            });
        }
        let needed = self.tags.width as usize * self.tags.height as usize;
        if plane.len() < needed {
            return Err(nd2tiff_core::Error::MissingPixelData {
                needed,
                available: plane.len(),
            }
            .into());
        }

        // Both fit in u16, checked in `new`.
        let page = self.written as u16;
        let total = self.expected as u16;
        let plane = &plane[..needed];
        match &mut self.encoder {
            Encoder::Standard(encoder) => write_page(encoder, &self.tags, page, total, plane)?,
            Encoder::Big(encoder) => write_page(encoder, &self.tags, page, total, plane)?,
        }
        self.written += 1;
        Ok(())
    }

    /// Closes the file.
    ///
    /// Writing fewer planes than declared is allowed; the summary tells the
    /// caller whether the file is complete.
    #[must_use]
    pub fn finish(self) -> WriteSummary {
        let big_tiff = matches!(self.encoder, Encoder::Big(_));
        WriteSummary {
            written: self.written,
            expected: self.expected,
            big_tiff,
        }
    }
}

fn write_page<W: Write + Seek, K: TiffKind>(
    encoder: &mut TiffEncoder<W, K>,
    tags: &ContainerTags,
    page: u16,
    total: u16,
    plane: &[u16],
) -> Result<()> {
    let mut image = encoder.new_image::<colortype::Gray16>(tags.width, tags.height)?;

    let directory = image.encoder();
    directory.write_tag(Tag::NewSubfileType, FILETYPE_PAGE)?;
    directory.write_tag(Tag::Orientation, ORIENTATION_TOP_LEFT)?;
    directory.write_tag(Tag::PlanarConfiguration, PLANAR_CONTIG)?;
    directory.write_tag(page_number_tag(), &[page, total][..])?;
    if page == 0 {
        directory.write_tag(Tag::ImageDescription, tags.image_description().as_str())?;
        if let Some(software) = &tags.software {
            directory.write_tag(Tag::Software, software.as_str())?;
        }
        // ImageJ only opens a composite with these present.
        if let Some((counts, data)) = tags.imagej_metadata() {
            let (counts_tag, data_tag) = imagej_metadata_tags();
            directory.write_tag(counts_tag, &counts[..])?;
            directory.write_tag(data_tag, &data[..])?;
        }
    }

    image.resolution(ResolutionUnit::None, tags.resolution());
    image.write_data(plane)?;
    Ok(())
}
