//! Collecting the archives of a run and converting them one after another.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use exn::Exn;
use tracing::{debug, info, warn};

use crate::convert::archive::{ArchiveJob, ArchivePath};
use crate::convert::dir::Directory;
use crate::convert::pool::WorkerPool;
use crate::convert::walk::Walk;
use crate::convert::{Bars, ConversionConfig, Outcome};
use crate::error::NothingToDo;
use crate::stats::BatchReport;

/// Represents a collection of [`ArchiveJob`]'s, which are all performed in one operation.
///
/// Archives are converted strictly one after another, each one using the whole worker pool.
pub struct ArchiveJobs {
    /// The jobs in the order they will run.
    jobs: Vec<ArchiveJob>,
    /// Archives that were found, but will not be converted.
    skipped: Vec<(PathBuf, Exn<NothingToDo>)>,
    /// Output directories to create before the first conversion.
    mirror: Vec<PathBuf>,
}

impl ArchiveJobs {
    /// The constructed [`ArchiveJobs`] will contain at most a single [`ArchiveJob`].
    ///
    /// The converted archive is placed directly into `output_root`.
    pub fn single(path: PathBuf, output_root: &Directory, config: ConversionConfig) -> Self {
        let mut jobs = Self::empty();
        let job = ArchivePath::new(path.clone())
            .and_then(|archive| ArchiveJob::flat(archive, output_root, config));
        match job {
            Ok(job) => jobs.jobs.push(job),
            Err(nothing_to_do) => jobs.skipped.push((path, nothing_to_do)),
        }
        jobs
    }

    /// Create an [`ArchiveJob`] for all archives found in the provided root directory.
    ///
    /// Each converted archive is placed at the same relative location below `output_root` as the
    /// source archive has below `root`. Files that are not comic archives are ignored, errors
    /// while walking are logged and skipped over.
    pub fn collect(
        root: &Directory,
        output_root: &Directory,
        recursive: bool,
        config: ConversionConfig,
    ) -> Self {
        let root = canonical(root);
        let output_root = canonical(output_root);
        // never walk into our own output
        let excluded = (output_root != root && output_root.starts_with(&root))
            .then(|| output_root.clone());

        let mut jobs = Self::empty();
        if recursive {
            for dir in Walk::with_exclusion(&root, recursive, excluded.clone()).directories() {
                match dir {
                    Ok(dir) => {
                        let relative = dir.strip_prefix(&root).expect("walk stays below its root");
                        jobs.mirror.push(output_root.join(relative));
                    }
                    Err(exn) => warn!("skip a directory: {exn:?}"),
                }
            }
        }

        for path in Walk::with_exclusion(&root, recursive, excluded) {
            let path = match path {
                Ok(path) => path,
                Err(exn) => {
                    warn!("skip an entry: {exn:?}");
                    continue;
                }
            };
            let Ok(archive) = ArchivePath::new(path.clone()) else {
                debug!("ignore {path:?}, not a comic archive");
                continue;
            };
            match ArchiveJob::mirrored(archive, &root, &output_root, config) {
                Ok(job) => jobs.jobs.push(job),
                Err(nothing_to_do) => jobs.skipped.push((path, nothing_to_do)),
            }
        }
        info!(
            "found {} archives to convert in {root:?}, {} skipped",
            jobs.jobs.len(),
            jobs.skipped.len()
        );
        jobs
    }

    /// A collection without any jobs.
    const fn empty() -> Self {
        Self {
            jobs: Vec::new(),
            skipped: Vec::new(),
            mirror: Vec::new(),
        }
    }

    /// Number of archives that will be converted.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if there is no archive to convert.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All jobs that will run, in order.
    pub fn jobs(&self) -> impl Iterator<Item = &ArchiveJob> {
        self.jobs.iter()
    }

    /// All archives that will not be converted, with the reason why.
    pub fn skipped(&self) -> impl Iterator<Item = (&Path, &Exn<NothingToDo>)> {
        self.skipped.iter().map(|(path, exn)| (path.as_path(), exn))
    }

    /// Convert all archives, one after another.
    ///
    /// Once `stop` is set, no further archive is started. The archive in flight is always finished
    /// and cleaned up.
    pub fn run(self, pool: &WorkerPool, bars: &Bars, stop: &AtomicBool) -> BatchReport {
        let Self {
            jobs,
            skipped,
            mirror,
        } = self;

        let mut report = BatchReport::default();
        for (path, nothing_to_do) in skipped {
            bars.println(format!("Skipping \"{}\": {nothing_to_do}", path.display()));
            report.record(Outcome::Skipped(path, nothing_to_do));
        }

        for dir in &mirror {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("could not create the output directory {dir:?}: {e}");
            }
        }

        let total = jobs.len();
        for (index, job) in jobs.into_iter().enumerate() {
            if stop.load(Ordering::Relaxed) {
                let remaining = total - index;
                bars.println(format!("Interrupted, {remaining} archives not converted"));
                report.interrupt(remaining);
                break;
            }

            let path = job.archive().to_path_buf();
            let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
            bars.println(format!(
                "Converting \"{}\" - {} of {total}",
                path.display(),
                index + 1
            ));
            bars.archives.set_message(name.into_owned());

            let outcome = match job.run(pool, &bars.images) {
                Ok(output) => Outcome::Converted(output),
                Err(failure) => {
                    let kind = failure.kind;
                    bars.println(format!(
                        "Failed \"{}\" ({kind}): {}",
                        path.display(),
                        failure.exn
                    ));
                    Outcome::Failed(failure)
                }
            };
            report.record(outcome);
            bars.archives.inc(1);
        }
        report
    }
}

/// The canonical form of a directory, so differently spelled paths to it compare equal.
///
/// Falls back to the absolute path, and then to the path as given.
fn canonical(dir: &Directory) -> PathBuf {
    fs::canonicalize(dir)
        .or_else(|_| std::path::absolute(dir))
        .unwrap_or_else(|_| dir.to_path_buf())
}
