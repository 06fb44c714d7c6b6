//! nd2tiff: convert Nikon ND2 acquisitions to ImageJ TIFF stacks.
//!
//! Each input file is handled on its own; a failure in one does not stop the
//! others, but makes the exit status non-zero.
#![allow(clippy::cast_precision_loss, clippy::struct_excessive_bools)]

mod deconwolf;
mod srgb;
mod summary;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use nd2tiff_core::{normalize_text_info, AcquisitionInfo, AcquisitionSource};
use nd2tiff_io::{
    ConversionReport, ConvertOptions, Converter, Layout, PlaneRange, ReadPolicy, SessionLog,
    UnitOutcome,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use sysinfo::System;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Nd2tiffIo(#[from] nd2tiff_io::Error),

    #[error("{0}")]
    Core(#[from] nd2tiff_core::Error),

    #[error("cannot read {0}: built without ND2 support (enable the nd2sdk feature)")]
    BackendUnavailable(PathBuf),

    #[error("{0} has no file name to name the output folder after")]
    NoFileName(PathBuf),
}

/// Output file layout.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayoutArg {
    /// One stack per field of view and channel
    Split,
    /// One multi-channel stack per field of view
    Composite,
    /// One file per field of view, channel and plane
    Planes,
}

impl From<LayoutArg> for Layout {
    fn from(layout: LayoutArg) -> Self {
        match layout {
            LayoutArg::Split => Self::Split,
            LayoutArg::Composite => Self::Composite,
            LayoutArg::Planes => Self::SplitByPlane,
        }
    }
}

/// Nikon ND2 to TIFF converter.
#[derive(Parser)]
#[command(name = "nd2tiff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug and memory usage, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert ND2 files to TIFF stacks
    Convert(ConvertArgs),

    /// Show a summary of ND2 files
    Info {
        /// Input ND2 file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,
    },

    /// Print raw metadata to stdout
    Meta(MetaArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Input ND2 file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Folder receiving one output folder per input (default: current folder)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Replace existing tif files
    #[arg(long)]
    overwrite: bool,

    /// Output layout
    #[arg(short, long, value_enum, default_value = "split")]
    layout: LayoutArg,

    /// Only convert this field of view (1-based)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    fov: Option<u64>,

    /// Only convert planes FROM:TO (1-based, inclusive)
    #[arg(long, value_name = "FROM:TO")]
    planes: Option<PlaneRange>,

    /// Show what would be written without writing
    #[arg(long)]
    dry_run: bool,

    /// Check the z-steps of every stack for stage drift
    #[arg(long)]
    check_stage: bool,

    /// Read each frame once for all channels (more open files, fewer reads)
    #[arg(long)]
    read_once: bool,

    /// Also write a deconwolf.sh script for the split stacks
    #[arg(long)]
    deconwolf: bool,
}

#[derive(Args)]
struct MetaArgs {
    /// Input ND2 file(s)
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// File attributes JSON
    #[arg(long)]
    attributes: bool,

    /// Channel and volume metadata JSON
    #[arg(long)]
    file: bool,

    /// Coordinate loops
    #[arg(long)]
    coord: bool,

    /// Per-frame metadata JSON
    #[arg(long)]
    frame: bool,

    /// Text info
    #[arg(long)]
    text: bool,

    /// Experiment JSON
    #[arg(long)]
    exp: bool,
}

impl MetaArgs {
    /// No selection means everything.
    fn select_all_if_none(&mut self) {
        if !(self.attributes || self.file || self.coord || self.frame || self.text || self.exp) {
            self.attributes = true;
            self.file = true;
            self.coord = true;
            self.frame = true;
            self.text = true;
            self.exp = true;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ok = match cli.command {
        Commands::Convert(args) => for_each_input(&args.input, |path| convert_file(path, &args)),
        Commands::Info { input } => for_each_input(&input, show_info),
        Commands::Meta(mut args) => {
            args.select_all_if_none();
            for_each_input(&args.input, |path| show_meta(path, &args))
        }
    };

    if cli.verbose >= 2 {
        report_memory();
    }
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Runs `run` on every input, returning false if any of them failed.
fn for_each_input<F>(inputs: &[PathBuf], mut run: F) -> bool
where
    F: FnMut(&Path) -> Result<bool>,
{
    let mut ok = true;
    for (k, path) in inputs.iter().enumerate() {
        if inputs.len() > 1 {
            println!(" -> {} ({}/{})", path.display(), k + 1, inputs.len());
        }
        match run(path) {
            Ok(success) => ok &= success,
            Err(e) => {
                error!("{}: {e}", path.display());
                ok = false;
            }
        }
    }
    ok
}

#[cfg(feature = "nd2sdk")]
fn open_source(path: &Path) -> Result<Box<dyn AcquisitionSource>> {
    Ok(Box::new(nd2tiff_io::Nd2File::open(path)?))
}

#[cfg(not(feature = "nd2sdk"))]
fn open_source(path: &Path) -> Result<Box<dyn AcquisitionSource>> {
    Err(CliError::BackendUnavailable(path.to_path_buf()))
}

/// Output folder of `input`: its file name without extension, inside
/// `parent` or the current folder.
fn output_folder(input: &Path, parent: Option<&Path>) -> Result<PathBuf> {
    let stem = input
        .file_stem()
        .ok_or_else(|| CliError::NoFileName(input.to_path_buf()))?;
    Ok(parent.map_or_else(|| PathBuf::from(stem), |parent| parent.join(stem)))
}

fn convert_options(folder: &Path, args: &ConvertArgs) -> ConvertOptions {
    let mut options = ConvertOptions::new(folder)
        .with_overwrite(args.overwrite)
        .with_layout(args.layout.into())
        .with_dry_run(args.dry_run)
        .with_stage_check(args.check_stage);
    if args.read_once {
        options = options.with_read_policy(ReadPolicy::PerFrame);
    }
    if let Some(fov) = args.fov.and_then(|fov| usize::try_from(fov).ok()) {
        options = options.with_fov(fov - 1);
    }
    if let Some(planes) = args.planes {
        options = options.with_planes(planes);
    }
    options
}

fn convert_file(path: &Path, args: &ConvertArgs) -> Result<bool> {
    let folder = output_folder(path, args.output_dir.as_deref())?;
    let options = convert_options(&folder, args);

    let mut source = open_source(path)?;
    let mut converter = Converter::new(&mut *source, &options)?;
    let info = converter.info().clone();
    print!("{}", summary::format_summary(&info, std::io::stdout().is_terminal()));

    let report = converter.run()?;
    print_report(&report);
    if options.dry_run {
        return Ok(report.is_success());
    }

    if args.deconwolf {
        if matches!(options.layout, Layout::Split) {
            let fovs: Vec<usize> = match options.fov {
                Some(fov) => vec![fov],
                None => (0..info.addressing.fov_count()).collect(),
            };
            let script = deconwolf::write_script(&folder, &info, &fovs)?;
            info!("wrote {}", script.display());
        } else {
            warn!("--deconwolf only supports the split layout, no script written");
        }
    }

    let mut log = SessionLog::open(&folder)?;
    log_footer(&mut log, &info);
    Ok(report.is_success())
}

/// Appends the tool, command line and acquisition summary to the session log.
fn log_footer(log: &mut SessionLog, info: &AcquisitionInfo) {
    log.line(format!("nd2tiff v.{}", env!("CARGO_PKG_VERSION")));
    log.line(format!(
        "CMD: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    ));
    if let Some(host) = System::host_name() {
        log.line(format!("HOSTNAME: '{host}'"));
    }
    if let Ok(user) = std::env::var("USER") {
        log.line(format!("USER: '{user}'"));
    }
    log.line(summary::format_summary(info, false).trim_end());
    log.line("done");
}

fn print_report(report: &ConversionReport) {
    for unit in &report.units {
        let path = unit.path.display();
        match &unit.outcome {
            UnitOutcome::Written => println!("Wrote {path}"),
            UnitOutcome::Skipped => println!("Skipped {path} (file exists)"),
            UnitOutcome::DryRun => println!("Would write {path}"),
            UnitOutcome::Failed(reason) => println!("Failed {path}: {reason}"),
        }
    }
    for drift in report.drifting() {
        println!(
            "Stage drift: fov {} channel {} z-step varies by {:.1} nm",
            drift.fov + 1,
            drift.channel + 1,
            drift.variation_nm()
        );
    }
    println!(
        "{} written, {} skipped, {} failed",
        report.written(),
        report.skipped(),
        report.failed()
    );
}

fn show_info(path: &Path) -> Result<bool> {
    let source = open_source(path)?;
    let info = AcquisitionInfo::read(&*source)?;
    print!(
        "{}",
        summary::format_summary(&info, std::io::stdout().is_terminal())
    );
    Ok(true)
}

fn print_document(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{text}"),
        },
        Err(_) => println!("{text}"),
    }
}

fn show_meta(path: &Path, args: &MetaArgs) -> Result<bool> {
    let source = open_source(path)?;
    if args.attributes {
        print_document(&source.attributes()?);
    }
    if args.file {
        print_document(&source.channel_metadata()?);
    }
    if args.coord {
        let loops = source.loop_descriptors()?;
        if loops.is_empty() {
            println!("{} contains only one frame (not an ND document).", path.display());
        }
        for descriptor in loops {
            println!("{} (loop size: {})", descriptor.name, descriptor.extent);
        }
    }
    if args.frame {
        for sequence in 0..source.sequence_count()? {
            print_document(&source.frame_metadata(sequence)?);
        }
    }
    if args.text {
        println!("{}", normalize_text_info(&source.text_info()?));
    }
    if args.exp {
        print_document(&source.experiment()?);
    }
    Ok(true)
}

/// Prints the resident memory of this process.
fn report_memory() {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return;
    };
    let mut system = System::new();
    if system.refresh_process(pid) {
        if let Some(process) = system.process(pid) {
            eprintln!(
                "Resident memory: {:.1} MB",
                process.memory() as f64 / 1_000_000.0
            );
        }
    }
}
