//! Acquisition to TIFF conversion.
//!
//! Each output file (a *unit*) is written to a temporary file in the output
//! folder and renamed into place once complete, so a final file name never
//! refers to a partial file. Existing files are skipped unless overwriting,
//! which makes an interrupted batch resumable.

use crate::options::{ConvertOptions, Layout, ReadPolicy};
use crate::session_log::SessionLog;
use crate::tags::ContainerTags;
use crate::writer::StreamingWriter;
use crate::{Error, Result};
use log::{debug, error, info, warn};
use nd2tiff_core::{
    check_stage_drift, deinterleave, AcquisitionInfo, AcquisitionSource, Frame, StageDrift,
    StagePositionTable,
};
use std::fs;
use std::io::{BufWriter, Seek, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// What happened to one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Written and published.
    Written,
    /// Left alone because it already existed.
    Skipped,
    /// Would have been written (dry run).
    DryRun,
    /// Writing failed; nothing was published.
    Failed(String),
}

/// Outcome for one output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub path: PathBuf,
    pub outcome: UnitOutcome,
}

/// Result of converting one acquisition.
#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    /// One entry per output file, in conversion order.
    pub units: Vec<UnitReport>,
    /// Stage drift checks that were run.
    pub stage_checks: Vec<StageDrift>,
}

impl ConversionReport {
    fn count(&self, outcome: fn(&UnitOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| outcome(&u.outcome)).count()
    }

    /// Number of files written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.count(|o| *o == UnitOutcome::Written)
    }

    /// Number of files skipped because they existed.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| *o == UnitOutcome::Skipped)
    }

    /// Number of files that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed(_)))
    }

    /// Stage checks that found drift.
    pub fn drifting(&self) -> impl Iterator<Item = &StageDrift> {
        self.stage_checks.iter().filter(|d| d.is_drifting())
    }

    /// True if no unit failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn push(&mut self, path: PathBuf, outcome: UnitOutcome) {
        self.units.push(UnitReport { path, outcome });
    }
}

/// One output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Channel { fov: usize, channel: usize },
    Composite { fov: usize },
    Plane { fov: usize, channel: usize, plane: usize },
}

impl Unit {
    fn fov(self) -> usize {
        match self {
            Self::Channel { fov, .. } | Self::Composite { fov } | Self::Plane { fov, .. } => fov,
        }
    }
}

struct Session {
    report: ConversionReport,
    log: SessionLog,
}

/// Converts one acquisition according to [`ConvertOptions`].
///
/// Holds one frame buffer and one plane buffer for the whole run, whatever
/// the layout or [`ReadPolicy`].
pub struct Converter<'a, S: AcquisitionSource> {
    source: S,
    options: &'a ConvertOptions,
    info: AcquisitionInfo,
    /// Split-layout file stem of each channel.
    stems: Vec<String>,
    stage_table: Option<StagePositionTable>,
    /// Why the stage table could not be read, once that has been tried.
    stage_unavailable: Option<String>,
    frame: Frame,
    plane: Vec<u16>,
}

/// Converts `source` with `options`.
///
/// # Errors
/// Returns an error if the acquisition cannot be converted at all. Failures
/// of single files are recorded in the report instead.
pub fn convert<S: AcquisitionSource>(
    source: S,
    options: &ConvertOptions,
) -> Result<ConversionReport> {
    Converter::new(source, options)?.run()
}

impl<'a, S: AcquisitionSource> Converter<'a, S> {
    /// Reads the acquisition metadata.
    ///
    /// # Errors
    /// Returns an error if the metadata cannot be read or has no z-stack.
    pub fn new(source: S, options: &'a ConvertOptions) -> Result<Self> {
        let info = AcquisitionInfo::read(&source)?;
        let names: Vec<&str> = info
            .metadata
            .channels()
            .iter()
            .map(|channel| channel.name.as_str())
            .collect();
        let stems = channel_file_stems(&names);
        Ok(Self {
            source,
            options,
            info,
            stems,
            stage_table: None,
            stage_unavailable: None,
            frame: Frame::default(),
            plane: Vec::new(),
        })
    }

    /// Returns the acquisition summary.
    #[must_use]
    pub fn info(&self) -> &AcquisitionInfo {
        &self.info
    }

    /// Checks the z-steps of the stack at `(fov, channel)`.
    ///
    /// The stage position table is read from the frame metadata on first use.
    /// If that fails, later calls fail with the same reason without reading
    /// the metadata again.
    ///
    /// # Errors
    /// Returns an error if `fov` or `channel` is out of range or the frame
    /// metadata carries no stage positions.
    pub fn check_stage_position(&mut self, fov: usize, channel: usize) -> Result<StageDrift> {
        let fovs = self.info.addressing.fov_count();
        if fov >= fovs {
            return Err(Error::InvalidFov { fov, count: fovs });
        }
        let table = match self.stage_table.take() {
            Some(table) => table,
            None => self.read_stage_table()?,
        };
        let drift = check_stage_drift(&table, &self.info.addressing, fov, channel);
        self.stage_table = Some(table);
        Ok(drift?)
    }

    fn read_stage_table(&mut self) -> Result<StagePositionTable> {
        if let Some(reason) = &self.stage_unavailable {
            return Err(nd2tiff_core::Error::Metadata(reason.clone()).into());
        }
        debug!("reading stage positions of {} frames", self.info.sequence_count);
        StagePositionTable::from_source(
            &self.source,
            self.info.sequence_count,
            self.info.channel_count(),
        )
        .map_err(|e| {
            self.stage_unavailable = Some(format!("no stage positions: {e}"));
            e.into()
        })
    }

    /// Runs the conversion.
    ///
    /// # Errors
    /// Returns an error for acquisition-level failures: unsupported bit depth,
    /// inconsistent metadata, invalid fov or plane selection, an output folder
    /// that cannot be created, or a temporary file that cannot be created.
    pub fn run(&mut self) -> Result<ConversionReport> {
        self.info.validate_for_conversion()?;

        let fovs = self.fovs()?;
        let planes = self.planes()?;
        self.ensure_output_folder()?;

        let log = if self.options.dry_run {
            SessionLog::disabled()
        } else {
            SessionLog::open(&self.options.output_folder)?
        };
        let mut session = Session {
            report: ConversionReport::default(),
            log,
        };
        session
            .log
            .start_session(format!("Input file: {}", self.info.path.display()));

        let channels = self.info.channel_count();
        self.plane = vec![0; self.info.volume().plane_len()];

        let layout = self.options.layout;
        for fov in fovs {
            match layout {
                Layout::Split if self.options.read_policy == ReadPolicy::PerFrame => {
                    self.convert_fov_per_frame(fov, planes.clone(), &mut session)?;
                }
                Layout::Split => {
                    let tags = self.tags(planes.len())?;
                    for channel in 0..channels {
                        self.stage_diagnostics(fov, &[channel], &mut session);
                        self.run_unit(Unit::Channel { fov, channel }, &tags, &planes, &mut session)?;
                    }
                }
                Layout::Composite => {
                    let stack = 0..self.info.addressing.plane_count();
                    let tags = self.tags(stack.len())?.with_composite(channels);
                    let all: Vec<usize> = (0..channels).collect();
                    self.stage_diagnostics(fov, &all, &mut session);
                    self.run_unit(Unit::Composite { fov }, &tags, &stack, &mut session)?;
                }
                Layout::SplitByPlane => {
                    let tags = self.tags(1)?;
                    for channel in 0..channels {
                        self.stage_diagnostics(fov, &[channel], &mut session);
                        for plane in planes.clone() {
                            let unit = Unit::Plane {
                                fov,
                                channel,
                                plane,
                            };
                            self.run_unit(unit, &tags, &(plane..plane + 1), &mut session)?;
                        }
                    }
                }
            }
        }

        let report = session.report;
        info!(
            "{}: {} written, {} skipped, {} failed",
            self.info.path.display(),
            report.written(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    fn fovs(&self) -> Result<Range<usize>> {
        let count = self.info.addressing.fov_count();
        match self.options.fov {
            Some(fov) if fov >= count => Err(Error::InvalidFov { fov, count }),
            Some(fov) => Ok(fov..fov + 1),
            None => Ok(0..count),
        }
    }

    fn planes(&self) -> Result<Range<usize>> {
        let stack = self.info.addressing.plane_count();
        match self.options.planes {
            Some(range) if self.options.layout == Layout::Composite => {
                warn!("plane range {range} is ignored for composite files");
                Ok(0..stack)
            }
            Some(range) => range.resolve(stack),
            None => Ok(0..stack),
        }
    }

    fn ensure_output_folder(&self) -> Result<()> {
        let folder = &self.options.output_folder;
        if self.options.dry_run || folder.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(folder).map_err(|source| Error::OutputFolder {
            path: folder.clone(),
            source,
        })?;
        debug!("created {}", folder.display());
        Ok(())
    }

    fn tags(&self, planes: usize) -> Result<ContainerTags> {
        let volume = self.info.volume();
        let size = self.info.pixel_size();
        let width = u32::try_from(volume.width).map_err(|_| too_large(volume.width))?;
        let height = u32::try_from(volume.height).map_err(|_| too_large(volume.height))?;
        let software = self.options.software.clone().unwrap_or_else(|| {
            format!(
                "nd2tiff {} source image: {}",
                env!("CARGO_PKG_VERSION"),
                self.info.path.display()
            )
        });
        Ok(ContainerTags::new(width, height, planes)
            .with_pixel_size_nm(size.dx_nm, size.dy_nm, size.dz_nm)?
            .with_software(software))
    }

    fn unit_path(&self, unit: Unit) -> PathBuf {
        let folder = &self.options.output_folder;
        match unit {
            Unit::Channel { fov, channel } => folder.join(split_file_name(&self.stems[channel], fov)),
            Unit::Composite { fov } => folder.join(format!("composite_{:03}.tif", fov + 1)),
            Unit::Plane {
                fov,
                channel,
                plane,
            } => {
                let prefix = folder
                    .file_name()
                    .map_or_else(|| "nd2tiff".into(), |name| name.to_string_lossy());
                folder.join(format!("{prefix}_f{fov}-r0-c{channel}-z{plane}.tif"))
            }
        }
    }

    /// Returns false if `path` should be left alone.
    fn should_write(&self, path: &Path, session: &mut Session) -> bool {
        if !self.options.overwrite && path.exists() {
            info!("Skipping {} (file exists)", path.display());
            session
                .log
                .line(format!("Skipping {} (file exists)", path.display()));
            session.report.push(path.to_path_buf(), UnitOutcome::Skipped);
            return false;
        }
        if self.options.dry_run {
            info!("Would write {}", path.display());
            session.report.push(path.to_path_buf(), UnitOutcome::DryRun);
            return false;
        }
        true
    }

    fn run_unit(
        &mut self,
        unit: Unit,
        tags: &ContainerTags,
        planes: &Range<usize>,
        session: &mut Session,
    ) -> Result<()> {
        let path = self.unit_path(unit);
        if !self.should_write(&path, session) {
            return Ok(());
        }

        debug!("writing {}", path.display());
        let temp = create_temp(&path)?;
        let file = temp.as_file().try_clone().map_err(|source| Error::TempFile {
            path: path.clone(),
            source,
        })?;

        let mut sink = BufWriter::new(file);
        let result = self
            .stream_unit(unit, &mut sink, tags.clone(), planes)
            .and_then(|()| {
                sink.flush()?;
                publish(temp, &path)
            });
        record(path, result, session)
    }

    fn stream_unit<W: Write + Seek>(
        &mut self,
        unit: Unit,
        sink: W,
        tags: ContainerTags,
        planes: &Range<usize>,
    ) -> Result<()> {
        let mut writer = StreamingWriter::new(sink, tags)?;
        let addressing = self.info.addressing;
        let channels = self.info.channel_count();

        for plane in planes.clone() {
            let sequence = addressing.sequence_index(unit.fov(), plane);
            self.source.read_frame(sequence, &mut self.frame)?;
            match unit {
                Unit::Channel { channel, .. } | Unit::Plane { channel, .. } => {
                    deinterleave(self.frame.samples(), channels, channel, &mut self.plane)?;
                    writer.write_plane(&self.plane)?;
                }
                Unit::Composite { .. } => {
                    for channel in 0..channels {
                        deinterleave(self.frame.samples(), channels, channel, &mut self.plane)?;
                        writer.write_plane(&self.plane)?;
                    }
                }
            }
        }

        let summary = writer.finish();
        if !summary.is_complete() {
            return Err(Error::IncompletePlanes {
                written: summary.written,
                expected: summary.expected,
            });
        }
        Ok(())
    }

    /// Split layout reading every frame once for all channels of `fov`.
    fn convert_fov_per_frame(
        &mut self,
        fov: usize,
        planes: Range<usize>,
        session: &mut Session,
    ) -> Result<()> {
        let channels = self.info.channel_count();
        let tags = self.tags(planes.len())?;

        let mut pending = Vec::new();
        for channel in 0..channels {
            self.stage_diagnostics(fov, &[channel], session);
            let path = self.unit_path(Unit::Channel { fov, channel });
            if self.should_write(&path, session) {
                pending.push((channel, path));
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let mut outputs = Vec::with_capacity(pending.len());
        for (channel, path) in pending {
            let temp = create_temp(&path)?;
            let file = temp.as_file().try_clone().map_err(|source| Error::TempFile {
                path: path.clone(),
                source,
            })?;
            outputs.push((channel, path, temp, BufWriter::new(file)));
        }

        let mut writers = Vec::with_capacity(outputs.len());
        let mut opened: Result<()> = Ok(());
        for (channel, _, _, sink) in &mut outputs {
            match StreamingWriter::new(sink, tags.clone()) {
                Ok(writer) => writers.push((*channel, writer)),
                Err(e) => opened = Err(e),
            }
        }

        let result = opened.and_then(|()| self.stream_channels(fov, &planes, &mut writers));
        let summaries: Vec<_> = writers.into_iter().map(|(_, w)| w.finish()).collect();

        // A failed read spoils every file of this fov.
        match result {
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let reason = e.to_string();
                for (_, path, _temp, _sink) in outputs {
                    fail(path, &reason, session);
                }
                Ok(())
            }
            Ok(()) => {
                for ((_, path, temp, mut sink), summary) in outputs.into_iter().zip(summaries) {
                    let outcome = if summary.is_complete() {
                        sink.flush()
                            .map_err(Error::from)
                            .and_then(|()| publish(temp, &path))
                    } else {
                        Err(Error::IncompletePlanes {
                            written: summary.written,
                            expected: summary.expected,
                        })
                    };
                    record(path, outcome, session)?;
                }
                Ok(())
            }
        }
    }

    fn stream_channels<W: Write + Seek>(
        &mut self,
        fov: usize,
        planes: &Range<usize>,
        writers: &mut [(usize, StreamingWriter<W>)],
    ) -> Result<()> {
        let channels = self.info.channel_count();
        for plane in planes.clone() {
            let sequence = self.info.addressing.sequence_index(fov, plane);
            self.source.read_frame(sequence, &mut self.frame)?;
            for (channel, writer) in writers.iter_mut() {
                deinterleave(self.frame.samples(), channels, *channel, &mut self.plane)?;
                writer.write_plane(&self.plane)?;
            }
        }
        Ok(())
    }

    fn stage_diagnostics(&mut self, fov: usize, channels: &[usize], session: &mut Session) {
        if !self.options.check_stage || self.stage_unavailable.is_some() {
            return;
        }
        for &channel in channels {
            match self.check_stage_position(fov, channel) {
                Ok(drift) => {
                    if drift.is_drifting() {
                        let name = &self.info.metadata.channels()[channel].name;
                        let message = format!(
                            "Warning: possible stage drift in fov {} channel {name}: z-step varies \
                             between {:.4} and {:.4} µm ({:.1} nm)",
                            fov + 1,
                            drift.min_step_um,
                            drift.max_step_um,
                            drift.variation_nm()
                        );
                        warn!("{message}");
                        session.log.line(message);
                    } else {
                        debug!(
                            "fov {} channel {channel}: z-step {:.4} µm",
                            fov + 1,
                            drift.max_step_um
                        );
                    }
                    session.report.stage_checks.push(drift);
                }
                Err(e) if self.stage_unavailable.is_some() => {
                    warn!("skipping stage checks of {}: {e}", self.info.path.display());
                    return;
                }
                Err(e) => warn!("stage check for fov {} channel {channel} unavailable: {e}", fov + 1),
            }
        }
    }
}

/// File name of the split-layout stack with `stem` in `fov` (0-based), e.g.
/// `DAPI_001.tif`. See [`channel_file_stems`].
#[must_use]
pub fn split_file_name(stem: &str, fov: usize) -> String {
    format!("{stem}_{:03}.tif", fov + 1)
}

/// File stems of the split-layout stacks, one per channel.
///
/// A stem is the channel name with path separators replaced. Channel names
/// need not be unique; a stem already taken by an earlier channel gets the
/// 1-based channel number appended, e.g. `DAPI_ch2`.
#[must_use]
pub fn channel_file_stems<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut stems: Vec<String> = Vec::with_capacity(names.len());
    for (channel, name) in names.iter().enumerate() {
        let safe = file_safe(name.as_ref());
        let mut stem = safe.clone();
        while stems.contains(&stem) {
            stem = format!("{stem}_ch{}", channel + 1);
        }
        if stem != safe {
            warn!("channel {} repeats the name {safe}, writing it as {stem}", channel + 1);
        }
        stems.push(stem);
    }
    stems
}

fn too_large(value: usize) -> Error {
    nd2tiff_core::Error::Metadata(format!("image dimension {value} does not fit a TIFF")).into()
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

/// Creates a uniquely named temporary file next to `path`.
fn create_temp(path: &Path) -> Result<NamedTempFile> {
    let folder = path.parent().unwrap_or_else(|| Path::new("."));
    let prefix = format!(
        "{}_tmp_",
        path.file_name().unwrap_or_default().to_string_lossy()
    );
    tempfile::Builder::new()
        .prefix(&prefix)
        .tempfile_in(folder)
        .map_err(|source| Error::TempFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Atomically moves a complete temporary file to `path`.
fn publish(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Records the outcome of a unit, passing fatal errors on.
fn record(path: PathBuf, result: Result<()>, session: &mut Session) -> Result<()> {
    match result {
        Ok(()) => {
            info!("Wrote {}", path.display());
            session.log.line(format!("Wrote {}", path.display()));
            session.report.push(path, UnitOutcome::Written);
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            fail(path, &e.to_string(), session);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn fail(path: PathBuf, reason: &str, session: &mut Session) {
    error!("Failed to write {}: {reason}", path.display());
    session
        .log
        .line(format!("Failed to write {}: {reason}", path.display()));
    session
        .report
        .push(path, UnitOutcome::Failed(reason.to_owned()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe() {
        assert_eq!(file_safe("DAPI"), "DAPI");
        assert_eq!(file_safe("Cy3/Cy5"), "Cy3_Cy5");
        assert_eq!(split_file_name("A488", 0), "A488_001.tif");
        assert_eq!(split_file_name("Cy3_Cy5", 11), "Cy3_Cy5_012.tif");
    }

    #[test]
    fn test_channel_file_stems_are_unique() {
        assert_eq!(
            channel_file_stems(&["DAPI", "A488", "Cy3/Cy5"]),
            vec!["DAPI", "A488", "Cy3_Cy5"]
        );
        assert_eq!(
            channel_file_stems(&["DAPI", "DAPI", "DAPI_ch2", "A488"]),
            vec!["DAPI", "DAPI_ch2", "DAPI_ch2_ch3", "A488"]
        );
    }

    #[test]
    fn test_create_temp_in_same_folder() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("DAPI_001.tif");
        let temp = create_temp(&target).unwrap();
        assert_eq!(temp.path().parent(), Some(dir.path()));
        let name = temp.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("DAPI_001.tif_tmp_"));

        publish(temp, &target).unwrap();
        assert!(target.exists());
    }

    #[test]
    fn test_report_counts() {
        let mut report = ConversionReport::default();
        report.push("a".into(), UnitOutcome::Written);
        report.push("b".into(), UnitOutcome::Skipped);
        report.push("c".into(), UnitOutcome::Failed("boom".into()));
        assert_eq!(report.written(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
    }
}
