//! Conversion options.

use crate::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How output files are cut from an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// One file per `(fov, channel)` holding the z-stack.
    #[default]
    Split,
    /// One file per fov holding all channels, channel varying fastest.
    Composite,
    /// One single-page file per `(fov, channel, plane)`.
    SplitByPlane,
}

/// How often a frame is read from the acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Read each frame once per channel. Memory stays at one frame plus one
    /// plane regardless of the channel count.
    #[default]
    PerChannel,
    /// Read each frame once and feed every channel's file of that fov.
    /// Keeps one output file open per channel.
    PerFrame,
}

/// Closed, 1-based plane range `from..=to`.
///
/// Checked against the real plane count only when converting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneRange {
    pub from: usize,
    pub to: usize,
}

impl PlaneRange {
    /// Creates a range.
    #[must_use]
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }

    /// Returns the 0-based planes selected from a stack of `planes`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSliceRange`] unless `1 <= from <= to <= planes`.
    pub fn resolve(&self, planes: usize) -> Result<std::ops::Range<usize>> {
        if self.from < 1 || self.from > self.to || self.to > planes {
            return Err(Error::InvalidSliceRange {
                from: self.from,
                to: self.to,
                planes,
            });
        }
        Ok(self.from - 1..self.to)
    }
}

impl FromStr for PlaneRange {
    type Err = String;

    /// Parses `from:to`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (from, to) = s
            .split_once(':')
            .ok_or_else(|| format!("expected FROM:TO, got '{s}'"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid plane '{v}': {e}"))
        };
        Ok(Self::new(parse(from)?, parse(to)?))
    }
}

impl fmt::Display for PlaneRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

/// Options for converting one acquisition.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Folder receiving the tif files and the log.
    pub output_folder: PathBuf,
    /// Replace existing files instead of skipping them.
    pub overwrite: bool,
    /// Output file layout.
    pub layout: Layout,
    /// Only convert this field of view (0-based).
    pub fov: Option<usize>,
    /// Only write these planes.
    pub planes: Option<PlaneRange>,
    /// Report what would be written without writing.
    pub dry_run: bool,
    /// Run the stage drift check before writing each unit.
    pub check_stage: bool,
    /// Frame read policy.
    pub read_policy: ReadPolicy,
    /// Software tag override.
    pub software: Option<String>,
}

impl ConvertOptions {
    /// Creates options writing into `output_folder`.
    pub fn new(output_folder: impl Into<PathBuf>) -> Self {
        Self {
            output_folder: output_folder.into(),
            ..Self::default()
        }
    }

    /// Replace existing output files.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set the output layout.
    #[must_use]
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Restrict to one field of view (0-based).
    #[must_use]
    pub fn with_fov(mut self, fov: usize) -> Self {
        self.fov = Some(fov);
        self
    }

    /// Restrict to a plane range.
    #[must_use]
    pub fn with_planes(mut self, range: PlaneRange) -> Self {
        self.planes = Some(range);
        self
    }

    /// Enable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable the stage drift check.
    #[must_use]
    pub fn with_stage_check(mut self, check: bool) -> Self {
        self.check_stage = check;
        self
    }

    /// Set the frame read policy.
    #[must_use]
    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Override the Software tag.
    #[must_use]
    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = Some(software.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plane_range() {
        assert_eq!("3:10".parse::<PlaneRange>().unwrap(), PlaneRange::new(3, 10));
        assert_eq!(" 1 : 1 ".parse::<PlaneRange>().unwrap(), PlaneRange::new(1, 1));
        assert!("3".parse::<PlaneRange>().is_err());
        assert!("a:4".parse::<PlaneRange>().is_err());
        // Bounds are only checked when converting.
        assert!("0:900".parse::<PlaneRange>().is_ok());
    }

    #[test]
    fn test_resolve_plane_range() {
        assert_eq!(PlaneRange::new(2, 4).resolve(5).unwrap(), 1..4);
        assert_eq!(PlaneRange::new(1, 5).resolve(5).unwrap(), 0..5);
        assert!(matches!(
            PlaneRange::new(0, 3).resolve(5),
            Err(Error::InvalidSliceRange { .. })
        ));
        assert!(PlaneRange::new(2, 6).resolve(5).is_err());
        assert!(PlaneRange::new(4, 2).resolve(5).is_err());
    }

    #[test]
    fn test_builder() {
        let options = ConvertOptions::new("out")
            .with_overwrite(true)
            .with_layout(Layout::Composite)
            .with_fov(1)
            .with_dry_run(true);
        assert!(options.overwrite);
        assert_eq!(options.layout, Layout::Composite);
        assert_eq!(options.fov, Some(1));
        assert!(options.dry_run);
        assert_eq!(options.read_policy, ReadPolicy::PerChannel);
    }
}
