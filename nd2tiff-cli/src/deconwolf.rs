//! Shell script running deconwolf on converted stacks.

use log::warn;
use nd2tiff_core::AcquisitionInfo;
use nd2tiff_io::{channel_file_stems, split_file_name};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the script written next to the tif files.
pub const SCRIPT_NAME: &str = "deconwolf.sh";
/// Iterations passed to `dw`.
const ITERATIONS: u32 = 50;

/// Builds the script for the split stacks of `fovs` (0-based).
///
/// One `dw_bw` command generates the PSF of each channel and one `dw` command
/// deconvolves each stack. Channels missing the emission wavelength or the
/// objective parameters are skipped with a warning.
#[must_use]
pub fn script(info: &AcquisitionInfo, fovs: &[usize]) -> String {
    let size = info.pixel_size();
    let mut text = String::from("#!/usr/bin/env bash\nset -e\n\n");
    let _ = writeln!(text, "# Source: {}", info.path.display());

    let channels = info.metadata.channels();
    let names: Vec<&str> = channels.iter().map(|channel| channel.name.as_str()).collect();
    let stems = channel_file_stems(&names);

    let mut usable = Vec::new();
    for (channel, stem) in channels.iter().zip(&stems) {
        let (Some(lambda), Some(na), Some(ni)) = (
            channel.emission_nm,
            channel.numerical_aperture,
            channel.immersion_refractive_index,
        ) else {
            warn!("no PSF parameters for channel '{}', not in {SCRIPT_NAME}", channel.name);
            continue;
        };
        let psf = format!("PSF_{stem}.tif");
        let _ = writeln!(
            text,
            "dw_bw --lambda {lambda:.1} --NA {na:.3} --ni {ni:.3} --resxy {:.1} --resz {:.1} {psf}",
            size.dx_nm, size.dz_nm
        );
        usable.push((stem.as_str(), psf));
    }

    text.push('\n');
    for &fov in fovs {
        for (stem, psf) in &usable {
            let _ = writeln!(
                text,
                "dw --iter {ITERATIONS} {} {psf}",
                split_file_name(stem, fov)
            );
        }
    }
    text
}

/// Writes the script into `folder` and makes it executable.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_script(folder: &Path, info: &AcquisitionInfo, fovs: &[usize]) -> io::Result<PathBuf> {
    let path = folder.join(SCRIPT_NAME);
    std::fs::write(&path, script(info, fovs))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(&path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o100);
        std::fs::set_permissions(&path, permissions)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nd2tiff_core::SyntheticAcquisition;

    fn info() -> AcquisitionInfo {
        let source = SyntheticAcquisition::new(8, 8, 3)
            .with_path("/data/cells.nd2")
            .with_fovs(2)
            .with_channel("DAPI", 455.0)
            .with_channel("A647", 670.0);
        AcquisitionInfo::read(&source).unwrap()
    }

    #[test]
    fn test_script_commands() {
        let text = script(&info(), &[0, 1]);
        assert!(text.starts_with("#!/usr/bin/env bash\n"));
        assert!(text.contains(
            "dw_bw --lambda 455.0 --NA 1.400 --ni 1.515 --resxy 130.0 --resz 300.0 PSF_DAPI.tif\n"
        ));
        assert!(text.contains("dw --iter 50 A647_002.tif PSF_A647.tif\n"));
        assert_eq!(text.matches("dw_bw ").count(), 2);
        assert_eq!(text.matches("dw --iter").count(), 4);
    }

    #[test]
    fn test_shared_channel_names_get_their_own_files() {
        let source = SyntheticAcquisition::new(8, 8, 3)
            .with_channel("DAPI", 455.0)
            .with_channel("DAPI", 455.0);
        let text = script(&AcquisitionInfo::read(&source).unwrap(), &[0]);
        assert!(text.contains("dw --iter 50 DAPI_001.tif PSF_DAPI.tif\n"));
        assert!(text.contains("dw --iter 50 DAPI_ch2_001.tif PSF_DAPI_ch2.tif\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_script_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = write_script(dir.path(), &info(), &[0]).unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_ne!(mode & 0o100, 0);
    }
}
