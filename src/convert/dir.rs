//! Directories we read from and the scratch space we work in.

use std::path::{Path, PathBuf};

use exn::{Exn, ResultExt as _};
use tempfile::TempDir;
use tracing::{debug, error};

use crate::error::ErrorMessage;

/// A filesystem path that was verified to point to an existing directory.
#[derive(Debug, Clone)]
pub struct Directory(PathBuf);

impl Directory {
    /// Checked constructor to verify the path points to a directory.
    ///
    /// This only checks that the directory exists at the time of creation.
    pub fn new(path: PathBuf) -> Result<Self, Exn<ErrorMessage>> {
        match path.is_dir() {
            true => Ok(Self(path)),
            false => {
                let path = path.display();
                let msg = format!("Provided path is not a directory: \"{path}\"");
                Err(Exn::new(ErrorMessage::new(msg)))
            }
        }
    }
}

impl std::ops::Deref for Directory {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::convert::AsRef<Path> for Directory {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Exclusive working directory for the conversion of one archive.
///
/// The directory is hidden and lives next to the output archive. It gets deleted recursively on
/// [`ScratchWorkspace::close`] or when dropped, whichever comes first.
pub struct ScratchWorkspace {
    /// The directory, `None` once it was removed.
    dir: Option<TempDir>,
}

impl ScratchWorkspace {
    /// Prefix for the names of all scratch directories.
    const PREFIX: &'static str = ".comic-convert-";

    /// Create a fresh, empty scratch directory inside `parent`.
    pub fn create_in(parent: &Path) -> Result<Self, Exn<ErrorMessage>> {
        let dir = tempfile::Builder::new()
            .prefix(Self::PREFIX)
            .tempdir_in(parent)
            .or_raise(|| {
                let parent = parent.display();
                ErrorMessage::new(format!("Could not create a scratch directory in \"{parent}\""))
            })?;
        debug!("created scratch directory {:?}", dir.path());
        Ok(Self { dir: Some(dir) })
    }

    /// The root of the scratch directory.
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .expect("directory only gets taken when closing")
            .path()
    }

    /// Delete the scratch directory and everything in it.
    pub fn close(mut self) {
        self.remove();
    }

    /// Remove the directory, logging instead of failing.
    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let root = dir.path().to_path_buf();
        debug!("drop scratch directory {root:?}");
        if let Err(e) = dir.close() {
            error!("error on deleting directory {root:?}: {e}");
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        self.remove();
    }
}
