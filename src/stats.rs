//! Contains items related to summarizing the outcome of a run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use exn::Exn;

use crate::convert::Outcome;
use crate::error::{ArchiveFailure, NothingToDo};
use crate::stdout;

/// Exit status when at least one archive failed.
pub const EXIT_ARCHIVE_FAILED: u8 = 3;
/// Exit status when the run was interrupted before all archives were converted.
pub const EXIT_INTERRUPTED: u8 = 130;

/// The collected outcomes of all archives of a run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Paths of all written archives.
    converted: Vec<PathBuf>,
    /// Archives left alone, with the reason.
    skipped: Vec<(PathBuf, Exn<NothingToDo>)>,
    /// Archives whose conversion failed.
    failed: Vec<ArchiveFailure>,
    /// Number of archives never started because of an interruption.
    interrupted: Option<usize>,
}

impl BatchReport {
    /// Add the outcome of one archive.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Converted(path) => self.converted.push(path),
            Outcome::Skipped(path, reason) => self.skipped.push((path, reason)),
            Outcome::Failed(failure) => self.failed.push(failure),
        }
    }

    /// Note that `remaining` archives were never started.
    pub fn interrupt(&mut self, remaining: usize) {
        self.interrupted = Some(remaining);
    }

    /// Output paths of all converted archives.
    pub fn converted(&self) -> &[PathBuf] {
        &self.converted
    }

    /// All failed archives.
    pub fn failed(&self) -> &[ArchiveFailure] {
        &self.failed
    }

    /// Paths of all skipped archives.
    pub fn skipped(&self) -> impl Iterator<Item = &Path> {
        self.skipped.iter().map(|(path, _)| path.as_path())
    }

    /// Number of archives never started, if the run was interrupted.
    pub const fn interrupted(&self) -> Option<usize> {
        self.interrupted
    }

    /// The lines of the summary, without the error details.
    pub fn summary(&self, elapsed: Duration) -> Vec<String> {
        let converted = self.converted().len();
        let skipped = self.skipped().count();
        let failed = self.failed().len();
        let secs = elapsed.as_secs_f32();

        let mut lines = vec![format!(
            "{converted} converted, {skipped} skipped, {failed} failed in {secs:.1}s"
        )];
        if let Some(remaining) = self.interrupted() {
            lines.push(format!("interrupted with {remaining} archives left"));
        }
        for ArchiveFailure { path, kind, .. } in &self.failed {
            let code = kind.code();
            let path = path.display();
            lines.push(format!("failed [{code} {kind}]: \"{path}\""));
        }
        lines
    }

    /// Print the summary, followed by the full error of every failed archive.
    pub fn print(&self, elapsed: Duration) {
        for line in self.summary(elapsed) {
            stdout(line);
        }
        for ArchiveFailure { path, exn, .. } in &self.failed {
            let path = path.display();
            stdout(format!("---\n\"{path}\":\n{exn:?}"));
        }
    }

    /// The exit status for this run.
    pub fn exit_status(&self) -> u8 {
        if self.interrupted.is_some() {
            EXIT_INTERRUPTED
        } else if !self.failed.is_empty() {
            EXIT_ARCHIVE_FAILED
        } else {
            0
        }
    }

    /// The exit status for this run, for returning from `main`.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.exit_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorMessage, FailureKind};

    fn failure(path: &str, kind: FailureKind) -> Outcome {
        let exn = Exn::new(ErrorMessage::new("broken"));
        Outcome::Failed(ArchiveFailure::new(Path::new(path), kind, exn))
    }

    #[test]
    fn counts_every_outcome() {
        let mut report = BatchReport::default();
        report.record(Outcome::Converted(PathBuf::from("out/a.cbz")));
        report.record(Outcome::Converted(PathBuf::from("out/b.cbz")));
        report.record(Outcome::Skipped(
            PathBuf::from("in/c.txt"),
            Exn::new(NothingToDo::new("not a comic")),
        ));
        report.record(failure("in/d.cbr", FailureKind::Extraction));

        assert_eq!(report.converted().len(), 2);
        assert_eq!(report.skipped().collect::<Vec<_>>(), [Path::new("in/c.txt")]);
        let lines = report.summary(Duration::from_secs(2));
        assert_eq!(lines[0], "2 converted, 1 skipped, 1 failed in 2.0s");
        assert_eq!(lines[1], "failed [11 extraction]: \"in/d.cbr\"");
    }

    #[test]
    fn exit_codes() {
        let mut report = BatchReport::default();
        report.record(Outcome::Converted(PathBuf::from("a.cbz")));
        assert_eq!(report.exit_status(), 0);

        report.record(failure("b.cbz", FailureKind::UnsupportedFormat));
        assert_eq!(report.exit_status(), EXIT_ARCHIVE_FAILED);

        report.interrupt(4);
        assert_eq!(report.exit_status(), EXIT_INTERRUPTED);
        assert_eq!(report.interrupted(), Some(4));
    }

    #[test]
    fn empty_run_succeeds() {
        let report = BatchReport::default();
        assert_eq!(report.exit_status(), 0);
        assert_eq!(
            report.summary(Duration::ZERO),
            ["0 converted, 0 skipped, 0 failed in 0.0s"]
        );
    }
}
