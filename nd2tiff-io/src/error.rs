//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] nd2tiff_core::Error),

    /// The acquisition could not be opened.
    #[error("{path} is not a readable acquisition: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// Resolution tags can only express square pixels.
    #[error("only isotropic pixels are supported (dx = {dx_nm} nm, dy = {dy_nm} nm)")]
    AnisotropicPixelsUnsupported { dx_nm: f64, dy_nm: f64 },

    /// More planes were written than the file was opened for.
    #[error("trying to write too many planes: {expected} were expected and all have been written")]
    TooManyPlanes { expected: usize },

    /// A finished file holds fewer planes than declared.
    #[error("file holds {written} of {expected} planes")]
    IncompletePlanes { written: usize, expected: usize },

    /// Plane selection outside `1..=planes`.
    #[error("invalid plane range {from}..={to} for a stack of {planes} planes")]
    InvalidSliceRange { from: usize, to: usize, planes: usize },

    /// Field-of-view selection outside the acquisition.
    #[error("invalid field of view {fov} (acquisition has {count})")]
    InvalidFov { fov: usize, count: usize },

    /// Page numbers are 16 bit in TIFF.
    #[error("{0} pages do not fit the page number tag")]
    TooManyPages(usize),

    /// Output folder missing and not creatable.
    #[error("unable to create the folder {path}: {source}")]
    OutputFolder {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Temporary output file not creatable.
    #[error("failed to create a temporary file next to {path}: {source}")]
    TempFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    /// Returns true if the error ends the conversion of the whole acquisition
    /// rather than a single output file.
    ///
    /// A frame the reader fails to deliver (`Source`, `MissingPixelData`)
    /// spoils only the files that need it. A sequence index outside the
    /// acquisition means the addressing itself is wrong, so every later file
    /// would be wrong too and the acquisition is abandoned.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Tiff(_)
                | Self::Io(_)
                | Self::IncompletePlanes { .. }
                | Self::TooManyPlanes { .. }
                | Self::CoreError(
                    nd2tiff_core::Error::MissingPixelData { .. } | nd2tiff_core::Error::Source(_)
                )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InvalidSliceRange {
            from: 0,
            to: 3,
            planes: 2
        }
        .is_fatal());
        assert!(Error::CoreError(nd2tiff_core::Error::UnsupportedBitDepth(8)).is_fatal());
        assert!(!Error::CoreError(nd2tiff_core::Error::MissingPixelData {
            needed: 4,
            available: 0
        })
        .is_fatal());
        assert!(!Error::CoreError(nd2tiff_core::Error::Source("read failed".into())).is_fatal());
        assert!(Error::CoreError(nd2tiff_core::Error::InvalidSequenceIndex {
            index: 10,
            count: 10
        })
        .is_fatal());
        assert!(!Error::IncompletePlanes {
            written: 1,
            expected: 2
        }
        .is_fatal());
    }
}
