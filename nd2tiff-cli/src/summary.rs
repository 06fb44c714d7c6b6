//! Human readable acquisition summary.

use crate::srgb;
use nd2tiff_core::AcquisitionInfo;
use std::fmt::Write as _;

/// Emission wavelengths are clamped to this range before picking a colour,
/// so far-red and near-UV dyes still get a visible swatch.
const SWATCH_RANGE_NM: (f64, f64) = (425.0, 650.0);

fn optional(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "?".to_string(), |v| format!("{v:.precision$}"))
}

/// Formats the summary printed by `nd2tiff info` and appended to the log.
///
/// `ansi` draws the channel swatches in colour.
#[must_use]
pub fn format_summary(info: &AcquisitionInfo, ansi: bool) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "{} FOV in {} channels:",
        info.addressing.fov_count(),
        info.channel_count()
    );

    for (index, channel) in info.metadata.channels().iter().enumerate() {
        let _ = write!(text, "  ");
        if let Some(emission) = channel.emission_nm {
            let shown = emission.clamp(SWATCH_RANGE_NM.0, SWATCH_RANGE_NM.1);
            let [r, g, b] = srgb::srgb_from_wavelength(shown);
            let [rb, gb, bb] = srgb::to_bytes([r, g, b]);
            let _ = writeln!(
                text,
                "{}#{} '{}', λ_em={emission:.1} approx. RGB {r:.2}, {g:.2}, {b:.2} or #{rb:02X}{gb:02X}{bb:02X}",
                srgb::swatch(emission, ansi),
                index + 1,
                channel.name,
            );
        } else {
            let _ = writeln!(text, "    #{} '{}', λ_em=?", index + 1, channel.name);
        }
    }

    let _ = writeln!(
        text,
        "Bits per pixel: {}, significant: {}",
        info.attributes.bits_per_component_in_memory,
        info.attributes.bits_per_component_significant
    );
    let size = info.pixel_size();
    let _ = writeln!(
        text,
        "dx={:.1} nm, dy={:.1} nm, dz={:.1} nm",
        size.dx_nm, size.dy_nm, size.dz_nm
    );

    if let Some(first) = info.metadata.channels().first() {
        let _ = writeln!(
            text,
            "NA={}, ni={}",
            optional(first.numerical_aperture, 3),
            optional(first.immersion_refractive_index, 3)
        );
        let _ = writeln!(
            text,
            "Objective Name: {}",
            first.objective_name.as_deref().unwrap_or("?")
        );
        let _ = writeln!(
            text,
            "Objective Magnification: {}X",
            optional(first.objective_magnification, 1)
        );
    }

    let volume = info.volume();
    let _ = writeln!(
        text,
        "Volume size: {} x {} x {}",
        volume.width, volume.height, volume.planes
    );
    let _ = writeln!(text, "Looping: {}", looping(info));
    text
}

/// Loop order as described by the text info, or rebuilt from the loops.
fn looping(info: &AcquisitionInfo) -> String {
    if let Some(dimensions) = &info.dimensions {
        return dimensions
            .trim_start_matches("Dimensions:")
            .trim()
            .to_string();
    }
    info.loops
        .iter()
        .map(|l| format!("{}({})", l.name, l.extent))
        .collect::<Vec<_>>()
        .join(" x ")
}
