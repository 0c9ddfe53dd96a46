//! Enumerating the files below a root directory.

use std::path::{Path, PathBuf};

use exn::{Exn, ResultExt as _};
use tracing::trace;
use walkdir::{DirEntry, WalkDir};

use crate::error::ErrorMessage;

/// Lazy, single pass enumeration of the files below a root directory.
///
/// Hidden entries (name starting with `.`) are never yielded, and hidden directories are not
/// descended into. The order is whatever the file system reports.
pub struct Walk {
    /// The root all yielded paths live under.
    root: PathBuf,
    /// The remaining entries.
    inner: Box<dyn Iterator<Item = walkdir::Result<DirEntry>>>,
}

impl Walk {
    /// Walk the files below `root`.
    ///
    /// Without `recursive`, only the direct children of `root` are visited.
    pub fn new(root: &Path, recursive: bool) -> Self {
        Self::with_exclusion(root, recursive, None)
    }

    /// Like [`Walk::new`], but never enter `excluded` or anything below it.
    ///
    /// Used to keep an output directory nested in the input directory out of the walk.
    pub fn with_exclusion(root: &Path, recursive: bool, excluded: Option<PathBuf>) -> Self {
        let mut walker = WalkDir::new(root).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let inner = walker
            .into_iter()
            .filter_entry(move |entry| {
                let included = excluded
                    .as_deref()
                    .is_none_or(|excluded| !entry.path().starts_with(excluded));
                let keep = entry.depth() == 0 || (!is_hidden(entry) && included);
                if !keep {
                    trace!("prune {:?}", entry.path());
                }
                keep
            });
        let root = root.to_path_buf();
        let inner = Box::new(inner);
        Self { root, inner }
    }

    /// Keep only the directories instead of the files.
    ///
    /// The root itself is not part of the result.
    pub fn directories(self) -> impl Iterator<Item = Result<PathBuf, Exn<ErrorMessage>>> {
        let root = self.root;
        self.inner.filter_map(move |entry| match entry {
            Ok(entry) if entry.file_type().is_dir() => Some(Ok(entry.into_path())),
            Ok(_) => None,
            Err(e) => Some(walk_error(&root, e)),
        })
    }
}

impl Iterator for Walk {
    type Item = Result<PathBuf, Exn<ErrorMessage>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.file_type().is_file() => return Some(Ok(entry.into_path())),
                Ok(_) => continue,
                Err(e) => return Some(walk_error(&self.root, e)),
            }
        }
    }
}

/// Check for the dot prefix that marks hidden files and directories.
pub fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Attach the walk root as context to an error.
fn walk_error(root: &Path, e: walkdir::Error) -> Result<PathBuf, Exn<ErrorMessage>> {
    Err(e).or_raise(|| {
        let root = root.display();
        ErrorMessage::new(format!("Error while walking the directory \"{root}\""))
    })
}
