//! Approximate display colour of an emission wavelength.

/// Wavelengths below this are shown as `uv`.
pub const VISIBLE_MIN_NM: f64 = 400.0;
/// Wavelengths above this are shown as `ir`.
pub const VISIBLE_MAX_NM: f64 = 700.0;

/// Asymmetric Gaussian lobe of the CIE 1931 colour matching fit.
fn lobe(lambda: f64, mu: f64, sigma_below: f64, sigma_above: f64) -> f64 {
    let sigma = if lambda < mu { sigma_below } else { sigma_above };
    let t = (lambda - mu) / sigma;
    (-0.5 * t * t).exp()
}

fn gamma(linear: f64) -> f64 {
    let v = if linear <= 0.003_130_8 {
        12.92 * linear
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    };
    v.clamp(0.0, 1.0)
}

/// Returns the sRGB colour (components in `[0, 1]`) of light at `lambda_nm`.
#[must_use]
pub fn srgb_from_wavelength(lambda_nm: f64) -> [f64; 3] {
    let l = lambda_nm;
    let x = 1.056 * lobe(l, 599.8, 37.9, 31.0) + 0.362 * lobe(l, 442.0, 16.0, 26.7)
        - 0.065 * lobe(l, 501.1, 20.4, 26.2);
    let y = 0.821 * lobe(l, 568.8, 46.9, 40.5) + 0.286 * lobe(l, 530.9, 16.3, 31.1);
    let z = 1.217 * lobe(l, 437.0, 11.8, 36.0) + 0.681 * lobe(l, 459.0, 26.0, 13.8);

    // XYZ to linear sRGB, D65.
    let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g = -0.969_266_0 * x + 1.876_010_8 * y + 0.041_556_0 * z;
    let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;
    [gamma(r), gamma(g), gamma(b)]
}

/// Returns `[r, g, b]` scaled to bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_bytes(rgb: [f64; 3]) -> [u8; 3] {
    rgb.map(|v| (v * 255.0).round() as u8)
}

/// Four character colour swatch for `lambda_nm`.
///
/// With `ansi` the swatch is drawn with 24-bit terminal colours; otherwise it
/// is plain text. Wavelengths outside the visible range are labelled.
#[must_use]
pub fn swatch(lambda_nm: f64, ansi: bool) -> String {
    let label = if lambda_nm < VISIBLE_MIN_NM {
        "uv"
    } else if lambda_nm > VISIBLE_MAX_NM {
        "ir"
    } else {
        "  "
    };
    if !ansi {
        return format!(" {label} ");
    }
    let [r, g, b] = to_bytes(srgb_from_wavelength(lambda_nm));
    format!(
        "\x1b[38;2;{};{};{}m\x1b[48;2;{r};{g};{b}m {label} \x1b[0m",
        255 - r,
        255 - g,
        255 - b
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_hues() {
        let [r, g, b] = srgb_from_wavelength(450.0);
        assert!(b > r && b > g, "450 nm should be blue");
        let [r, g, b] = srgb_from_wavelength(530.0);
        assert!(g > r && g > b, "530 nm should be green");
        let [r, g, b] = srgb_from_wavelength(640.0);
        assert!(r > g && r > b, "640 nm should be red");
    }

    #[test]
    fn test_components_clamped() {
        for lambda in (350..=800).step_by(10) {
            let rgb = srgb_from_wavelength(f64::from(lambda));
            assert!(rgb.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_swatch_labels() {
        assert_eq!(swatch(350.0, false), " uv ");
        assert_eq!(swatch(750.0, false), " ir ");
        assert_eq!(swatch(520.0, false), "    ");
        assert!(swatch(520.0, true).starts_with("\x1b[38;2;"));
        assert!(swatch(520.0, true).ends_with("\x1b[0m"));
    }
}
