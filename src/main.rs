//! Convert comic book archives between CBZ, CBR and CB7, re-encoding their page images.

mod command;
mod convert;
mod error;
mod spawn;
mod stats;

use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::Context as _;
use clap::Parser;
use exn::{Exn, ResultExt as _};
use signal_hook::consts::SIGINT;
use tracing::{debug, error};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::command::MainJob;
use crate::convert::image::ImageTarget;
use crate::convert::{ArchiveFormat, ConversionConfig};
use crate::error::{ErrorMessage, FailureKind};

/// Convert comic book archives to another container and image format.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Descend into subdirectories of the input directory.
    #[arg(short, long)]
    recursive: bool,

    /// A comic archive, or a directory containing comic archives.
    #[arg(short, long)]
    input: PathBuf,

    /// Existing directory to write the converted archives to.
    #[arg(short, long)]
    output: PathBuf,

    /// The archive format to convert to.
    #[arg(long, value_enum, default_value_t)]
    convert_extension: ArchiveFormat,

    /// The image format to convert the pages to.
    #[arg(long, value_enum, default_value_t)]
    convert_image_file_type: ImageTarget,

    /// Use lossy compression for WebP images.
    #[arg(short, long)]
    compress: bool,

    /// Quality for lossy compression, from 0 to 100.
    #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(0..=100))]
    compress_rate: u8,

    /// Add an empty ComicInfo.xml to archives without one.
    #[arg(long)]
    comicinfo: bool,

    /// Number of images to convert in parallel.
    #[arg(long, default_value_t = ConversionConfig::DEFAULT_WORKERS)]
    workers: NonZeroUsize,

    /// Log more details, repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write the log to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Only show what would be converted.
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    /// Fold the arguments into the policy applied to every archive.
    fn config(&self) -> ConversionConfig {
        let quality = match self.compress {
            true => self.compress_rate,
            false => ConversionConfig::LOSSLESS_QUALITY,
        };
        ConversionConfig {
            archive: self.convert_extension,
            image: self.convert_image_file_type,
            quality,
            comicinfo: self.comicinfo,
            n_workers: self.workers,
        }
    }
}

/// Print a message for the user on stdout.
pub fn stdout(msg: impl AsRef<str>) {
    println!("{}", msg.as_ref());
}

/// Exit status for invalid arguments, as well as a missing input or output.
const EXIT_ARGUMENT: u8 = 1;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.use_stderr() {
                true => ExitCode::from(EXIT_ARGUMENT),
                false => ExitCode::SUCCESS,
            };
        }
    };

    let _guard = match init_logging(args.verbose, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:?}");
            return ExitCode::from(EXIT_ARGUMENT);
        }
    };
    debug!("{args:?}");

    let stop = match register_interrupt() {
        Ok(stop) => stop,
        Err(exn) => {
            error!("{exn:?}");
            return ExitCode::from(EXIT_ARGUMENT);
        }
    };

    let start = Instant::now();
    match run(&args, &stop) {
        Ok(report) => {
            report.print(start.elapsed());
            report.exit_code()
        }
        Err(exn) => {
            let kind = FailureKind::Argument;
            stdout(format!("Error [{} {kind}]: {exn:?}", kind.code()));
            ExitCode::from(EXIT_ARGUMENT)
        }
    }
}

/// Validate the paths given by the user and convert everything.
fn run(args: &Args, stop: &AtomicBool) -> Result<stats::BatchReport, Exn<ErrorMessage>> {
    let output = command::output_dir(args.output.clone())?;
    let job = MainJob::new(&args.input, &output, args.recursive, args.config())?;
    job.run(args.dry_run, stop)
}

/// Set up the global subscriber, writing to `log_file` or stderr.
///
/// The returned guard has to be held until the end of `main` to flush all logs.
fn init_logging(verbose: u8, log_file: Option<&Path>) -> anyhow::Result<WorkerGuard> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("comic_convert={level}"))?,
    };

    let (writer, guard) = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("could not create the log file {path:?}"))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("could not install the log subscriber")?;
    Ok(guard)
}

/// Listen for Ctrl-C.
///
/// The first one sets the returned flag, so no further archive is started. A second one
/// terminates the process right away.
fn register_interrupt() -> Result<Arc<AtomicBool>, Exn<ErrorMessage>> {
    let err = || ErrorMessage::new("Could not listen to process signals");

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register_conditional_shutdown(
        SIGINT,
        i32::from(stats::EXIT_INTERRUPTED),
        Arc::clone(&stop),
    )
    .or_raise(err)?;
    signal_hook::flag::register(SIGINT, Arc::clone(&stop)).or_raise(err)?;
    Ok(stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        let argv = ["comic-convert"].iter().chain(args);
        Args::try_parse_from(argv)
    }

    #[test]
    fn defaults() {
        let args = parse(&["-i", "in", "-o", "out"]).unwrap();
        let config = args.config();
        assert_eq!(config.archive, ArchiveFormat::Cbz);
        assert_eq!(config.image, ImageTarget::Webp);
        assert_eq!(config.quality, ConversionConfig::LOSSLESS_QUALITY);
        assert_eq!(config.n_workers.get(), 4);
        assert!(!config.comicinfo);
        assert!(!args.recursive);
    }

    #[test]
    fn compression_uses_the_rate() {
        let args = parse(&[
            "-r",
            "-c",
            "--compress-rate",
            "42",
            "--convert-extension",
            "cb7",
            "--convert-image-file-type",
            "jpg",
            "--comicinfo",
            "-i",
            "in",
            "-o",
            "out",
        ])
        .unwrap();
        let config = args.config();
        assert_eq!(config.quality, 42);
        assert_eq!(config.archive, ArchiveFormat::Cb7);
        assert_eq!(config.image, ImageTarget::Jpg);
        assert!(config.comicinfo);
        assert!(args.recursive);

        let args = parse(&["--compress-rate", "42", "-i", "in", "-o", "out"]).unwrap();
        assert_eq!(args.config().quality, 100);
    }

    #[test]
    fn invalid_arguments() {
        assert!(parse(&["-o", "out"]).is_err());
        assert!(parse(&["-i", "in"]).is_err());
        assert!(parse(&["-i", "in", "-o", "out", "--compress-rate", "101"]).is_err());
        assert!(parse(&["-i", "in", "-o", "out", "--convert-extension", "pdf"]).is_err());
        assert!(parse(&["-i", "in", "-o", "out", "--convert-image-file-type", "avif"]).is_err());
        assert!(parse(&["-i", "in", "-o", "out", "--workers", "0"]).is_err());
    }
}
