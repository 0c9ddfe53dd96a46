//! Extracting archives into a directory, and packing a directory into an archive.
//!
//! Each compression family implements [`Container`], so callers never branch on format names.

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use exn::{Exn, ResultExt as _};
use sevenz_rust::{SevenZArchiveEntry, SevenZWriter};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::convert::ArchiveFormat;
use crate::convert::detect::Compression;
use crate::error::ErrorMessage;
use crate::spawn::{self, ManagedChild, Tool};

/// Reading and writing one archive container format.
pub trait Container {
    /// Extract every entry of `archive` into the existing, empty directory `dest`.
    ///
    /// Internal paths are preserved. On failure, `dest` may hold partial content and must be
    /// discarded by the caller.
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), Exn<ErrorMessage>>;

    /// Write every file below `source` into a new archive at `output`.
    ///
    /// Entry names are the file paths relative to `source`.
    fn build(&self, source: &Path, output: &Path) -> Result<(), Exn<ErrorMessage>>;
}

impl Compression {
    /// The container implementation for this compression family.
    pub fn container(self) -> Option<&'static dyn Container> {
        use Compression::*;

        match self {
            Zip => Some(&ZipContainer),
            Rar => Some(&RarContainer),
            SevenZip => Some(&SevenZipContainer),
            Unknown => None,
        }
    }
}

/// Extract `archive` of the given compression family into `dest`.
pub fn extract(
    archive: &Path,
    compression: Compression,
    dest: &Path,
) -> Result<(), Exn<ErrorMessage>> {
    let err = || {
        let archive = archive.display();
        ErrorMessage::new(format!("Failed to extract the archive \"{archive}\""))
    };

    let Some(container) = compression.container() else {
        let msg = format!("No extractor for compression {compression}");
        return Err(Exn::new(ErrorMessage::new(msg))).or_raise(err);
    };
    debug!("extract {archive:?} as {compression} into {dest:?}");
    container.extract(archive, dest).or_raise(err)
}

/// Pack `source` into a fresh archive at `output`, replacing any existing file.
///
/// The archive is written under a hidden temporary name next to `output` and only renamed into
/// place once complete, so a failure never leaves a truncated archive behind.
pub fn build(source: &Path, output: &Path, format: ArchiveFormat) -> Result<(), Exn<ErrorMessage>> {
    let err = || {
        let output = output.display();
        ErrorMessage::new(format!("Failed to create the archive \"{output}\""))
    };

    let compression = format.compression();
    let container = compression
        .container()
        .expect("every target format has a container");

    let partial = partial_path(output).or_raise(err)?;
    debug!("build {output:?} as {compression} from {source:?}");
    let built = container.build(source, &partial).and_then(|()| {
        fs::rename(&partial, output)
            .or_raise(|| ErrorMessage::new("Could not move the finished archive into place"))
    });
    if built.is_err() {
        discard_partial(&partial);
    }
    built.or_raise(err)
}

/// Remove what is left of a failed build.
fn discard_partial(partial: &Path) {
    if partial.exists()
        && let Err(e) = fs::remove_file(partial)
    {
        warn!("could not remove partial archive {partial:?}: {e}");
    }
}

/// The hidden sibling path an archive is written to before it is complete.
fn partial_path(output: &Path) -> Result<PathBuf, Exn<ErrorMessage>> {
    let name = output.file_name().ok_or_else(|| {
        let output = output.display();
        Exn::new(ErrorMessage::new(format!("Output path has no file name: \"{output}\"")))
    })?;
    let name = format!(".{}.partial", name.to_string_lossy());
    Ok(output.with_file_name(name))
}

/// All files below `source`, paired with their archive entry name.
///
/// Entry names always use `/` as separator. Files are listed in a stable, sorted order.
fn entries(source: &Path) -> Result<Vec<(PathBuf, String)>, Exn<ErrorMessage>> {
    let err = || {
        let source = source.display();
        ErrorMessage::new(format!("Could not list files to pack in \"{source}\""))
    };

    let mut entries = Vec::new();
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.or_raise(err)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let name = path
            .strip_prefix(source)
            .expect("all files have the source as prefix")
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((path, name));
    }
    Ok(entries)
}

/// Zip archives, as used by `.cbz`.
struct ZipContainer;

impl Container for ZipContainer {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Could not read the Zip archive");

        let file = File::open(archive).or_raise(err)?;
        let mut zip = ZipArchive::new(file).or_raise(err)?;
        zip.extract(dest).or_raise(err)
    }

    fn build(&self, source: &Path, output: &Path) -> Result<(), Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Could not write the Zip archive");

        let file = File::create(output).or_raise(err)?;
        let mut zipper = ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o644);

        for (path, name) in entries(source)? {
            trace!("add to zip: {name}");
            zipper.start_file(name, options).or_raise(err)?;
            let bytes = fs::read(&path).or_raise(err)?;
            zipper.write_all(&bytes).or_raise(err)?;
        }

        zipper.finish().or_raise(err)?;
        Ok(())
    }
}

/// RAR archives, as used by `.cbr`.
///
/// Reading goes through the unrar library. Writing RAR is only possible with the proprietary
/// `rar` tool, which is spawned as a child process.
struct RarContainer;

impl Container for RarContainer {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Could not read the RAR archive");

        let mut rar = unrar::Archive::new(archive)
            .open_for_processing()
            .or_raise(err)?;
        while let Some(header) = rar.read_header().or_raise(err)? {
            rar = if header.entry().is_file() {
                trace!("extract from rar: {:?}", header.entry().filename);
                header.extract_with_base(dest).or_raise(err)?
            } else {
                header.skip().or_raise(err)?
            };
        }
        Ok(())
    }

    fn build(&self, source: &Path, output: &Path) -> Result<(), Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Could not write the RAR archive");

        if !Tool::Rar.available() {
            let msg = format!("The tool '{}' is required to write RAR archives", Tool::Rar);
            return Err(Exn::new(ErrorMessage::new(msg))).or_raise(err);
        }
        if entries(source)?.is_empty() {
            return Err(Exn::new(ErrorMessage::new("Nothing to pack"))).or_raise(err);
        }

        // the tool runs inside `source`
        let output = std::path::absolute(output).or_raise(err)?;
        spawn::compress_rar(source, &output)
            .and_then(ManagedChild::wait)
            .or_raise(err)
    }
}

/// 7z archives, as used by `.cb7`.
struct SevenZipContainer;

impl Container for SevenZipContainer {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<(), Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Could not read the 7z archive");

        sevenz_rust::decompress_file(archive, dest).or_raise(err)
    }

    fn build(&self, source: &Path, output: &Path) -> Result<(), Exn<ErrorMessage>> {
        let err = || ErrorMessage::new("Could not write the 7z archive");

        let mut writer = SevenZWriter::create(output).or_raise(err)?;
        for (path, name) in entries(source)? {
            trace!("add to 7z: {name}");
            let entry = SevenZArchiveEntry::from_path(&path, name);
            let file = File::open(&path).or_raise(err)?;
            writer.push_archive_entry(entry, Some(file)).or_raise(err)?;
        }
        writer.finish().or_raise(err)?;
        Ok(())
    }
}
