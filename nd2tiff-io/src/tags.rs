//! Per-file TIFF tags.
//!
//! Resolution is written as pixels per nanometre with no resolution unit,
//! since TIFF only knows inches and centimetres. The unit and the z spacing
//! travel in an ImageJ style description block that hyperstack viewers parse.

use crate::{Error, Result};
use std::fmt::Write as _;
use tiff::encoder::Rational;

/// ImageJ version announced in the description block.
const IMAGEJ_VERSION: &str = "1.52r";
/// Fixed-point scale used when storing reciprocal pixel sizes.
const RESOLUTION_SCALE: f64 = 1000.0;
/// Relative tolerance for the isotropy check.
const ISOTROPY_TOLERANCE: f64 = 1e-9;

/// Block type codes of ImageJ's private metadata, as big-endian ASCII.
const IJ_MAGIC: u32 = 0x494a_494a; // "IJIJ"
const IJ_RANGES: u32 = 0x7261_6e67; // "rang"
const IJ_LUTS: u32 = 0x6c75_7473; // "luts"
/// Bytes of one LUT: 256 red, 256 green, 256 blue.
const LUT_LEN: u32 = 768;

/// Tags attached to one output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerTags {
    /// Plane width in pixels.
    pub width: u32,
    /// Plane height in pixels.
    pub height: u32,
    /// Planes per channel.
    pub planes: usize,
    /// Channel count of a composite file, `None` for single-channel files.
    pub channels: Option<usize>,
    /// Lateral pixel size in nm.
    pub pixel_size_nm: f64,
    /// Plane spacing in nm.
    pub z_spacing_nm: f64,
    /// Value of the Software tag.
    pub software: Option<String>,
}

impl ContainerTags {
    /// Creates tags for a single-channel stack with unit pixel size.
    #[must_use]
    pub fn new(width: u32, height: u32, planes: usize) -> Self {
        Self {
            width,
            height,
            planes,
            channels: None,
            pixel_size_nm: 1.0,
            z_spacing_nm: 1.0,
            software: None,
        }
    }

    /// Sets the voxel size.
    ///
    /// # Errors
    /// Returns [`Error::AnisotropicPixelsUnsupported`] if `dx_nm != dy_nm`.
    pub fn with_pixel_size_nm(mut self, dx_nm: f64, dy_nm: f64, dz_nm: f64) -> Result<Self> {
        if (dx_nm - dy_nm).abs() > ISOTROPY_TOLERANCE * dx_nm.abs().max(dy_nm.abs()) {
            return Err(Error::AnisotropicPixelsUnsupported { dx_nm, dy_nm });
        }
        self.pixel_size_nm = dx_nm;
        self.z_spacing_nm = dz_nm;
        Ok(self)
    }

    /// Sets the Software tag.
    #[must_use]
    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = Some(software.into());
        self
    }

    /// Marks the file as a composite hyperstack of `channels` channels.
    #[must_use]
    pub fn with_composite(mut self, channels: usize) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Returns the total number of pages the file will hold.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.planes * self.channels.unwrap_or(1)
    }

    /// Returns the X and Y resolution in pixels per nm.
    #[must_use]
    pub fn resolution(&self) -> Rational {
        reciprocal_rational(self.pixel_size_nm)
    }

    /// Builds ImageJ's private composite metadata as `(byte counts, data)`,
    /// or `None` for single-channel files.
    ///
    /// The data holds a header naming the blocks, one display range block with
    /// `0..=65535` for every channel and one gray LUT per channel. Numbers use
    /// native byte order, the order the TIFF encoder writes.
    #[must_use]
    pub fn imagej_metadata(&self) -> Option<(Vec<u32>, Vec<u8>)> {
        let channels = self.channels?;
        let count = u32::try_from(channels).ok()?;

        let header = [IJ_MAGIC, IJ_RANGES, 1, IJ_LUTS, count];
        let mut data: Vec<u8> = header.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let header_len = data.len();

        for _ in 0..channels {
            data.extend(0.0f64.to_ne_bytes());
            data.extend(f64::from(u16::MAX).to_ne_bytes());
        }
        let ranges_len = data.len() - header_len;

        for _ in 0..channels {
            for _ in 0..3 {
                data.extend(0..=u8::MAX);
            }
        }

        let mut counts = Vec::with_capacity(channels + 2);
        counts.push(u32::try_from(header_len).ok()?);
        counts.push(u32::try_from(ranges_len).ok()?);
        counts.resize(channels + 2, LUT_LEN);
        Some((counts, data))
    }

    /// Builds the ImageJ description block.
    #[must_use]
    pub fn image_description(&self) -> String {
        let mut text = format!("ImageJ={IMAGEJ_VERSION}\nimages={}\n", self.page_count());
        if let Some(channels) = self.channels {
            let _ = writeln!(text, "channels={channels}");
        }
        let _ = writeln!(text, "slices={}", self.planes);
        if self.channels.is_some() {
            text.push_str("hyperstack=true\nmode=composite\n");
        }
        let _ = write!(
            text,
            "unit=nm\nspacing={:.1}\nloop=false\n",
            self.z_spacing_nm
        );
        text
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn reciprocal_rational(value: f64) -> Rational {
    let denominator = (value * RESOLUTION_SCALE)
        .round()
        .clamp(1.0, f64::from(u32::MAX)) as u32;
    Rational {
        n: RESOLUTION_SCALE as u32,
        d: denominator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_channel_description() {
        let tags = ContainerTags::new(64, 32, 5)
            .with_pixel_size_nm(130.0, 130.0, 300.0)
            .unwrap();
        assert_eq!(
            tags.image_description(),
            "ImageJ=1.52r\nimages=5\nslices=5\nunit=nm\nspacing=300.0\nloop=false\n"
        );
        assert_eq!(tags.page_count(), 5);
    }

    #[test]
    fn test_composite_description() {
        let tags = ContainerTags::new(64, 32, 5)
            .with_pixel_size_nm(130.0, 130.0, 250.0)
            .unwrap()
            .with_composite(3);
        let description = tags.image_description();
        assert!(description.contains("images=15\n"));
        assert!(description.contains("channels=3\n"));
        assert!(description.contains("slices=5\n"));
        assert!(description.contains("hyperstack=true\n"));
        assert!(description.contains("mode=composite\n"));
        assert!(description.contains("spacing=250.0\n"));
        assert_eq!(tags.page_count(), 15);
    }

    #[test]
    fn test_imagej_metadata_blocks() {
        assert!(ContainerTags::new(8, 8, 4).imagej_metadata().is_none());

        let (counts, data) = ContainerTags::new(8, 8, 4)
            .with_composite(2)
            .imagej_metadata()
            .unwrap();
        assert_eq!(counts, vec![20, 32, 768, 768]);
        assert_eq!(data.len(), 20 + 32 + 2 * 768);

        let word = |k: usize| u32::from_ne_bytes(data[4 * k..4 * k + 4].try_into().unwrap());
        assert_eq!(word(0), IJ_MAGIC);
        assert_eq!((word(1), word(2)), (IJ_RANGES, 1));
        assert_eq!((word(3), word(4)), (IJ_LUTS, 2));

        let max = f64::from_ne_bytes(data[28..36].try_into().unwrap());
        assert_relative_eq!(max, 65535.0);
        // Gray ramp: the green run of the first LUT.
        assert_eq!(data[52 + 256], 0);
        assert_eq!(data[52 + 511], 255);
    }

    #[test]
    fn test_resolution_is_pixels_per_nm() {
        let tags = ContainerTags::new(8, 8, 1)
            .with_pixel_size_nm(108.3, 108.3, 300.0)
            .unwrap();
        let resolution = tags.resolution();
        assert_relative_eq!(
            f64::from(resolution.n) / f64::from(resolution.d),
            1.0 / 108.3,
            max_relative = 1e-6
        );
    }

    #[test]
    fn test_anisotropic_rejected() {
        assert!(matches!(
            ContainerTags::new(8, 8, 1).with_pixel_size_nm(100.0, 110.0, 300.0),
            Err(Error::AnisotropicPixelsUnsupported { .. })
        ));
    }
}
