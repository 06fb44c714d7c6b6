#![allow(clippy::unwrap_used, clippy::cast_possible_truncation)]

use nd2tiff_core::SyntheticAcquisition;
use nd2tiff_io::{
    convert, imagej_metadata_tags, page_number_tag, ConvertOptions, Error, Layout, PlaneRange,
    ReadPolicy, UnitOutcome, LOG_FILE_NAME,
};
use std::fs::File;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

/// 2 fields of view, 3 channels, 10x10 pixels, 5 planes.
fn acquisition() -> SyntheticAcquisition {
    SyntheticAcquisition::new(10, 10, 5)
        .with_path("/data/sample.nd2")
        .with_fovs(2)
        .with_channel("DAPI", 455.0)
        .with_channel("A488", 520.0)
        .with_channel("A647", 670.0)
}

/// Reads every page of a 16-bit TIFF file.
fn read_pages(path: &Path) -> Vec<Vec<u16>> {
    let mut decoder = Decoder::new(File::open(path).unwrap()).unwrap();
    let mut pages = Vec::new();
    loop {
        match decoder.read_image().unwrap() {
            DecodingResult::U16(data) => pages.push(data),
            _ => panic!("expected 16-bit pages in {}", path.display()),
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image().unwrap();
    }
    pages
}

fn tif_files(folder: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(folder)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != LOG_FILE_NAME)
        .collect();
    names.sort();
    names
}

#[test]
fn test_split_writes_one_stack_per_fov_and_channel() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("sample");
    let report = convert(acquisition(), &ConvertOptions::new(&out)).unwrap();

    assert_eq!(report.written(), 6);
    assert_eq!(report.failed(), 0);
    assert_eq!(
        tif_files(&out),
        vec![
            "A488_001.tif",
            "A488_002.tif",
            "A647_001.tif",
            "A647_002.tif",
            "DAPI_001.tif",
            "DAPI_002.tif",
        ]
    );

    let pages = read_pages(&out.join("A647_002.tif"));
    assert_eq!(pages.len(), 5);
    for (plane, page) in pages.iter().enumerate() {
        assert_eq!(page.len(), 100);
        let expected = SyntheticAcquisition::sample(1, plane, 2);
        assert!(page.iter().all(|&v| v == expected));
    }

    let mut decoder = Decoder::new(File::open(out.join("DAPI_001.tif")).unwrap()).unwrap();
    assert_eq!(decoder.dimensions().unwrap(), (10, 10));
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
    assert!(description.contains("images=5\n"));
    assert!(description.contains("spacing=300.0\n"));
    let software = decoder.get_tag_ascii_string(Tag::Software).unwrap();
    assert!(software.contains("/data/sample.nd2"));
    assert_eq!(decoder.get_tag_u32_vec(page_number_tag()).unwrap(), vec![0, 5]);
    let (counts_tag, _) = imagej_metadata_tags();
    assert!(decoder.find_tag(counts_tag).unwrap().is_none());
}

#[test]
fn test_composite_interleaves_channels() {
    let dir = tempfile::tempdir().unwrap();
    let options = ConvertOptions::new(dir.path()).with_layout(Layout::Composite);
    let report = convert(acquisition(), &options).unwrap();

    assert_eq!(report.written(), 2);
    assert_eq!(tif_files(dir.path()), vec!["composite_001.tif", "composite_002.tif"]);

    let pages = read_pages(&dir.path().join("composite_002.tif"));
    assert_eq!(pages.len(), 15);
    for (k, page) in pages.iter().enumerate() {
        let expected = SyntheticAcquisition::sample(1, k / 3, k % 3);
        assert!(page.iter().all(|&v| v == expected), "page {k}");
    }

    let decoder = &mut Decoder::new(File::open(dir.path().join("composite_001.tif")).unwrap())
        .unwrap();
    let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
    assert!(description.contains("channels=3\n"));
    assert!(description.contains("slices=5\n"));
    assert!(description.contains("mode=composite\n"));

    let (counts_tag, data_tag) = imagej_metadata_tags();
    let counts = decoder.get_tag_u32_vec(counts_tag).unwrap();
    assert_eq!(counts, vec![20, 48, 768, 768, 768]);
    let data = decoder.get_tag_u8_vec(data_tag).unwrap();
    assert_eq!(data.len(), 20 + 48 + 3 * 768);
    let channels = u32::from_ne_bytes(data[16..20].try_into().unwrap());
    assert_eq!(channels, 3);
}

#[test]
fn test_second_run_skips_existing_files() {
    let dir = tempfile::tempdir().unwrap();
    let options = ConvertOptions::new(dir.path());
    assert_eq!(convert(acquisition(), &options).unwrap().written(), 6);

    let report = convert(acquisition(), &options).unwrap();
    assert_eq!(report.written(), 0);
    assert_eq!(report.skipped(), 6);
    assert!(report
        .units
        .iter()
        .all(|unit| unit.outcome == UnitOutcome::Skipped));

    let log = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
    assert!(log.contains("Skipping"));
    assert_eq!(log.matches("Input file: /data/sample.nd2").count(), 2);

    let report = convert(acquisition(), &options.clone().with_overwrite(true)).unwrap();
    assert_eq!(report.written(), 6);
}

#[test]
fn test_missing_pixel_data_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let acquisition = SyntheticAcquisition::new(8, 8, 4)
        .with_channel("DAPI", 455.0)
        .with_missing_frame(2);
    let report = convert(acquisition, &ConvertOptions::new(dir.path())).unwrap();

    assert_eq!(report.written(), 0);
    assert_eq!(report.failed(), 1);
    assert!(matches!(report.units[0].outcome, UnitOutcome::Failed(_)));
    // Neither the final file nor a temporary one remains.
    assert!(tif_files(dir.path()).is_empty());
}

#[test]
fn test_failing_frame_only_fails_its_units() {
    let dir = tempfile::tempdir().unwrap();
    // Frame 7 is fov 1, plane 2.
    let report = convert(
        acquisition().with_failing_frame(7),
        &ConvertOptions::new(dir.path()),
    )
    .unwrap();

    assert_eq!(report.written(), 3);
    assert_eq!(report.failed(), 3);
    assert_eq!(
        tif_files(dir.path()),
        vec!["A488_001.tif", "A647_001.tif", "DAPI_001.tif"]
    );
}

#[test]
fn test_split_by_plane_names() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("run");
    let options = ConvertOptions::new(&out)
        .with_layout(Layout::SplitByPlane)
        .with_fov(1)
        .with_planes(PlaneRange::new(2, 3));
    let report = convert(acquisition(), &options).unwrap();

    assert_eq!(report.written(), 6);
    let files = tif_files(&out);
    assert!(files.contains(&"run_f1-r0-c0-z1.tif".to_string()));
    assert!(files.contains(&"run_f1-r0-c2-z2.tif".to_string()));

    let pages = read_pages(&out.join("run_f1-r0-c2-z2.tif"));
    assert_eq!(pages.len(), 1);
    assert!(pages[0]
        .iter()
        .all(|&v| v == SyntheticAcquisition::sample(1, 2, 2)));
}

#[test]
fn test_plane_range_selects_planes() {
    let dir = tempfile::tempdir().unwrap();
    let options = ConvertOptions::new(dir.path())
        .with_fov(0)
        .with_planes(PlaneRange::new(2, 4));
    let report = convert(acquisition(), &options).unwrap();
    assert_eq!(report.written(), 3);

    let pages = read_pages(&dir.path().join("A488_001.tif"));
    assert_eq!(pages.len(), 3);
    for (k, page) in pages.iter().enumerate() {
        assert!(page
            .iter()
            .all(|&v| v == SyntheticAcquisition::sample(0, k + 1, 1)));
    }
}

#[test]
fn test_invalid_selection_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let options = ConvertOptions::new(dir.path()).with_planes(PlaneRange::new(4, 9));
    assert!(matches!(
        convert(acquisition(), &options),
        Err(Error::InvalidSliceRange { planes: 5, .. })
    ));

    let options = ConvertOptions::new(dir.path()).with_fov(2);
    assert!(matches!(
        convert(acquisition(), &options),
        Err(Error::InvalidFov { fov: 2, count: 2 })
    ));
    assert!(tif_files(dir.path()).is_empty());
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("dry");
    let options = ConvertOptions::new(&out).with_dry_run(true);
    let report = convert(acquisition(), &options).unwrap();

    assert_eq!(report.units.len(), 6);
    assert!(report
        .units
        .iter()
        .all(|unit| unit.outcome == UnitOutcome::DryRun));
    assert!(!out.exists());
}

#[test]
fn test_eight_bit_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let acquisition = acquisition().with_bits_per_sample(8);
    assert!(matches!(
        convert(acquisition, &ConvertOptions::new(dir.path())),
        Err(Error::CoreError(
            nd2tiff_core::Error::UnsupportedBitDepth(8)
        ))
    ));
}

#[test]
fn test_stage_check_reports_drift() {
    let dir = tempfile::tempdir().unwrap();
    let acquisition = SyntheticAcquisition::new(4, 4, 5)
        .with_channel("DAPI", 455.0)
        .with_channel("A488", 520.0)
        .with_stage_offset(2, 0.01);
    let options = ConvertOptions::new(dir.path()).with_stage_check(true);
    let report = convert(acquisition, &options).unwrap();

    assert_eq!(report.written(), 2);
    assert_eq!(report.stage_checks.len(), 2);
    assert_eq!(report.drifting().count(), 2);
    let log = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
    assert!(log.contains("stage drift"));
}

#[test]
fn test_per_frame_policy_matches_per_channel() {
    let per_channel = tempfile::tempdir().unwrap();
    let per_frame = tempfile::tempdir().unwrap();

    let mut source = acquisition();
    convert(&mut source, &ConvertOptions::new(per_channel.path())).unwrap();
    assert_eq!(source.frames_read(), 30);

    let mut source = acquisition();
    let options = ConvertOptions::new(per_frame.path()).with_read_policy(ReadPolicy::PerFrame);
    let report = convert(&mut source, &options).unwrap();
    assert_eq!(report.written(), 6);
    assert_eq!(source.frames_read(), 10);

    for name in tif_files(per_channel.path()) {
        assert_eq!(
            read_pages(&per_channel.path().join(&name)),
            read_pages(&per_frame.path().join(&name)),
            "{name}"
        );
    }
}

#[test]
fn test_volume_deeper_than_z_loop_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = acquisition().with_voxel_planes(7);
    let result = convert(&mut source, &ConvertOptions::new(dir.path()));

    assert!(matches!(
        result,
        Err(Error::CoreError(nd2tiff_core::Error::Metadata(_)))
    ));
    assert_eq!(source.frames_read(), 0);
    assert!(tif_files(dir.path()).is_empty());
}

#[test]
fn test_shared_channel_names_keep_both_stacks() {
    let dir = tempfile::tempdir().unwrap();
    let acquisition = SyntheticAcquisition::new(4, 4, 3)
        .with_channel("DAPI", 455.0)
        .with_channel("DAPI", 455.0);

    for policy in [ReadPolicy::PerChannel, ReadPolicy::PerFrame] {
        let options = ConvertOptions::new(dir.path())
            .with_overwrite(true)
            .with_read_policy(policy);
        let report = convert(acquisition.clone(), &options).unwrap();
        assert_eq!(report.written(), 2, "{policy:?}");
        assert_eq!(tif_files(dir.path()), vec!["DAPI_001.tif", "DAPI_ch2_001.tif"]);

        for (name, channel) in [("DAPI_001.tif", 0), ("DAPI_ch2_001.tif", 1)] {
            let pages = read_pages(&dir.path().join(name));
            assert_eq!(pages.len(), 3);
            for (plane, page) in pages.iter().enumerate() {
                let expected = SyntheticAcquisition::sample(0, plane, channel);
                assert!(page.iter().all(|&v| v == expected), "{name} plane {plane}");
            }
        }
    }
}

#[test]
fn test_unreadable_stage_positions_are_read_once() {
    let dir = tempfile::tempdir().unwrap();
    // 1 fov, 5 planes, 3 channels; metadata of frame 3 is unreadable.
    let mut source = SyntheticAcquisition::new(4, 4, 5)
        .with_channel("DAPI", 455.0)
        .with_channel("A488", 520.0)
        .with_channel("A647", 670.0)
        .with_failing_frame_metadata(3);
    let options = ConvertOptions::new(dir.path()).with_stage_check(true);
    let report = convert(&mut source, &options).unwrap();

    assert_eq!(report.written(), 3);
    assert!(report.stage_checks.is_empty());
    // Frames 0 to 3, once.
    assert_eq!(source.frame_metadata_reads(), 4);
}
