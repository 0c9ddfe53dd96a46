//! Contains the main, high-level job which performs the conversion chosen by the user.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use exn::{Exn, ResultExt as _};
use tracing::info;

use crate::convert::collections::ArchiveJobs;
use crate::convert::dir::Directory;
use crate::convert::pool::WorkerPool;
use crate::convert::{Bars, ConversionConfig};
use crate::error::ErrorMessage;
use crate::stats::BatchReport;
use crate::stdout;

/// The top-level task of the application, as determined by user arguments.
pub struct MainJob {
    /// All archives to convert.
    jobs: ArchiveJobs,
    /// How to convert them.
    config: ConversionConfig,
}

impl MainJob {
    /// Find everything to convert below `input`, or `input` itself if it is a file.
    ///
    /// Fails if `input` does not exist.
    pub fn new(
        input: &Path,
        output: &Directory,
        recursive: bool,
        config: ConversionConfig,
    ) -> Result<Self, Exn<ErrorMessage>> {
        let jobs = if input.is_dir() {
            let root = Directory::new(input.to_path_buf())?;
            stdout(format!("Looking for comic archives in \"{}\"...", root.display()));
            ArchiveJobs::collect(&root, output, recursive, config)
        } else if input.is_file() {
            ArchiveJobs::single(input.to_path_buf(), output, config)
        } else {
            let input = input.display();
            let msg = format!("Input is neither a file nor a directory: \"{input}\"");
            return Err(Exn::new(ErrorMessage::new(msg)));
        };
        Ok(Self { jobs, config })
    }

    /// Run this job.
    ///
    /// With `dry_run`, only the planned conversions are printed. Conversion stops early, between
    /// two archives, once `stop` is set.
    pub fn run(self, dry_run: bool, stop: &AtomicBool) -> Result<BatchReport, Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Failed to run the conversion job");

        let Self { jobs, config } = self;
        if dry_run {
            Self::print_plan(&jobs);
            return Ok(BatchReport::default());
        }
        if jobs.is_empty() {
            stdout("Nothing to convert");
        }

        let pool = WorkerPool::new(config.n_workers).or_raise(err)?;
        info!(
            "convert to {} with {:?} images at quality {}, {} workers",
            config.archive.ext(),
            config.image,
            config.quality,
            pool.n_workers()
        );

        let bars = Bars::new(jobs.len());
        let report = jobs.run(&pool, &bars, stop);
        bars.finish();
        Ok(report)
    }

    /// Print what would be done, without doing it.
    fn print_plan(jobs: &ArchiveJobs) {
        let count = jobs.len();
        stdout(format!("Found {count} archives to convert"));
        for job in jobs.jobs() {
            let from = job.archive().display();
            let to = job.output().display();
            stdout(format!("\"{from}\" -> \"{to}\""));
        }
        for (path, reason) in jobs.skipped() {
            let path = path.display();
            stdout(format!("skip \"{path}\": {reason}"));
        }
    }
}

/// Resolve the output directory, which has to exist already.
pub fn output_dir(path: PathBuf) -> Result<Directory, Exn<ErrorMessage>> {
    Directory::new(path).or_raise(|| ErrorMessage::new("The output directory must already exist"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::convert::archive::tests::config;

    #[test]
    fn missing_input_is_an_error() {
        let work = tempfile::tempdir().unwrap();
        let output = Directory::new(work.path().to_path_buf()).unwrap();
        let missing = work.path().join("missing");
        assert!(MainJob::new(&missing, &output, true, config()).is_err());
    }

    #[test]
    fn output_must_exist() {
        let work = tempfile::tempdir().unwrap();
        assert!(output_dir(work.path().join("nope")).is_err());
        let file = work.path().join("file");
        fs::write(&file, b"").unwrap();
        assert!(output_dir(file).is_err());
        assert!(output_dir(work.path().to_path_buf()).is_ok());
    }

    #[test]
    fn dry_run_touches_nothing() {
        let input = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(input.path().join("a.cbz"), b"PK\x03\x04").unwrap();
        fs::create_dir(input.path().join("sub")).unwrap();

        let output = Directory::new(out.path().to_path_buf()).unwrap();
        let job = MainJob::new(input.path(), &output, true, config()).unwrap();
        let report = job.run(true, &AtomicBool::new(false)).unwrap();

        assert!(report.converted().is_empty());
        assert!(report.failed().is_empty());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
