//! nd2tiff-io: TIFF writing and conversion for nd2tiff.
//!
//! Turns an [`AcquisitionSource`](nd2tiff_core::AcquisitionSource) into
//! ImageJ-compatible multi-page TIFF files, one plane at a time.
//!

pub mod convert;
mod error;
#[cfg(feature = "nd2sdk")]
pub mod nd2;
pub mod options;
mod session_log;
mod tags;
mod writer;

pub use convert::{
    channel_file_stems, convert, split_file_name, ConversionReport, Converter, UnitOutcome,
    UnitReport,
};
pub use error::{Error, Result};
#[cfg(feature = "nd2sdk")]
pub use nd2::Nd2File;
pub use options::{ConvertOptions, Layout, PlaneRange, ReadPolicy};
pub use session_log::{SessionLog, LOG_FILE_NAME};
pub use tags::ContainerTags;
pub use writer::{
    imagej_metadata_tags, needs_big_tiff, page_number_tag, StreamingWriter, WriteSummary,
    BIG_TIFF_THRESHOLD,
};
