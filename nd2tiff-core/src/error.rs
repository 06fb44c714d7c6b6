//! Error types for nd2tiff-core.

use thiserror::Error;

/// Result type alias for nd2tiff operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for acquisition handling.
#[derive(Error, Debug)]
pub enum Error {
    /// The coordinate loops contain no z-stack, so there is nothing to convert.
    #[error("no image planes found (missing or empty z-stack loop)")]
    NoPlanes,

    /// Only 16 bits per sample in memory can be converted.
    #[error("can only convert 16 bits per sample, this acquisition has {0}")]
    UnsupportedBitDepth(u32),

    /// A frame buffer was empty or smaller than the plane it should fill.
    #[error("missing pixel data: needed {needed} samples, got {available}")]
    MissingPixelData { needed: usize, available: usize },

    /// Requested channel does not exist.
    #[error("invalid channel {channel} (acquisition has {channels})")]
    InvalidChannel { channel: usize, channels: usize },

    /// Channels disagree on volume shape or pixel size.
    #[error("channel {channel} differs from channel 0: {reason}")]
    NonUniformChannels { channel: usize, reason: String },

    /// Sequence index outside of the acquisition.
    #[error("sequence index {index} out of range (0..{count})")]
    InvalidSequenceIndex { index: usize, count: usize },

    /// The loops describe more frames than the reader exposes.
    #[error("loops describe {expected} frames but the acquisition holds {available}")]
    SequenceCountMismatch { expected: usize, available: usize },

    /// A metadata document lacks a field or carries an unusable value.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// A metadata document is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The acquisition reader reported a failure.
    #[error("acquisition reader error: {0}")]
    Source(String),
}
