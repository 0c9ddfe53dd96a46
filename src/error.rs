//! Error types shared by all jobs.

use std::path::{Path, PathBuf};

use derive_more::Display;
use exn::Exn;
use tracing::debug;

/// Generic error carrying a human readable message.
///
/// Context is added by raising a new [`ErrorMessage`] on top of the lower level error.
#[derive(Debug, Display)]
pub struct ErrorMessage(String);

impl std::error::Error for ErrorMessage {}

impl ErrorMessage {
    /// Create a new error message. Every message is also logged on debug level.
    pub fn new(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        debug!("{msg}");
        Self(msg)
    }
}

/// Signals that a job decided not to do anything, which is not an error.
#[derive(Debug, Display)]
pub struct NothingToDo(String);

impl std::error::Error for NothingToDo {}

impl NothingToDo {
    /// Describe why there is nothing to do.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The class of failure that ended the conversion of an archive, or the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FailureKind {
    /// The archive signature is unknown, or a requested format is not supported.
    #[display("unsupported-format")]
    UnsupportedFormat,
    /// The archive could not be extracted.
    #[display("extraction")]
    Extraction,
    /// Dispatching image transcodes failed as a whole.
    #[display("transcode")]
    Transcode,
    /// The output archive could not be written.
    #[display("build")]
    Build,
    /// Invalid user input, detected before any conversion.
    #[display("argument")]
    Argument,
}

impl FailureKind {
    /// Stable numeric code reported alongside the label.
    pub const fn code(self) -> u8 {
        use FailureKind::*;

        match self {
            UnsupportedFormat => 10,
            Extraction => 11,
            Transcode => 12,
            Build => 13,
            Argument => 20,
        }
    }
}

/// The reason why the conversion of a single archive failed.
#[derive(Debug)]
pub struct ArchiveFailure {
    /// The archive that failed.
    pub path: PathBuf,
    /// The class of the failure.
    pub kind: FailureKind,
    /// The full error context.
    pub exn: Exn<ErrorMessage>,
}

impl ArchiveFailure {
    /// Tag an error with the failing archive and its failure class.
    pub fn new(path: &Path, kind: FailureKind, exn: Exn<ErrorMessage>) -> Self {
        let path = path.to_path_buf();
        Self { path, kind, exn }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_are_distinct() {
        use FailureKind::*;

        let kinds = [UnsupportedFormat, Extraction, Transcode, Build, Argument];
        let codes = kinds
            .iter()
            .map(|kind| kind.code())
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(codes.len(), kinds.len(), "every failure kind needs its own code");
    }

    #[test]
    fn failure_kind_labels() {
        assert_eq!(FailureKind::UnsupportedFormat.to_string(), "unsupported-format");
        assert_eq!(FailureKind::Build.to_string(), "build");
    }
}
