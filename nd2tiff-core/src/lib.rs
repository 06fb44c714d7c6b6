//! nd2tiff-core: Acquisition model and plane extraction for nd2tiff.
//!
//! This crate holds everything about an acquisition that does not touch
//! output files: the typed metadata, the mapping from field of view and plane
//! to the reader's sequence index, channel de-interleaving and the stage
//! position consistency check.
//!

pub mod acquisition;
pub mod coords;
pub mod deinterleave;
pub mod error;
pub mod metadata;
pub mod source;
pub mod stage;
#[cfg(feature = "synthetic")]
pub mod synthetic;

pub use acquisition::{normalize_text_info, AcquisitionInfo};
pub use coords::{Addressing, LoopDescriptor, LoopKind};
pub use deinterleave::deinterleave;
pub use error::{Error, Result};
pub use metadata::{ChannelInfo, ChannelMetadata, FileAttributes, PixelSize, VolumeShape};
pub use source::{AcquisitionSource, Frame};
pub use stage::{check_stage_drift, StageDrift, StagePositionTable};
#[cfg(feature = "synthetic")]
pub use synthetic::SyntheticAcquisition;
