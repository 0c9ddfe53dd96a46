//! Contains everything related to converting a single comic archive.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use exn::{Exn, ResultExt as _};
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::convert::detect::Compression;
use crate::convert::dir::ScratchWorkspace;
use crate::convert::image::TranscodeJobs;
use crate::convert::pool::WorkerPool;
use crate::convert::{ConversionConfig, container};
use crate::error::{ArchiveFailure, ErrorMessage, FailureKind, NothingToDo};

/// File extensions recognized as comic archives, compared case-insensitively.
pub const COMIC_EXTENSIONS: [&str; 6] = ["cbz", "cbr", "zip", "rar", "cb7", "7z"];

/// Name of the metadata file placed at the root of an archive.
const COMIC_INFO: &str = "ComicInfo.xml";

/// Content of the metadata file when none exists yet.
const EMPTY_COMIC_INFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<ComicInfo xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
</ComicInfo>
"#;

/// A path that was verified to name a comic archive.
#[derive(Debug, Clone)]
pub struct ArchivePath {
    /// The path to the archive.
    archive: PathBuf,
}

impl ArchivePath {
    /// Checked constructor to verify the path looks like a comic archive.
    ///
    /// Only the name is checked, the content is sniffed when converting. Hidden files and files
    /// with any other extension are not comic archives.
    pub fn new(archive: PathBuf) -> Result<Self, Exn<NothingToDo>> {
        if !Self::is_comic(&archive) {
            let path = archive.display();
            let msg = format!("Not a comic book archive: \"{path}\"");
            return Err(Exn::new(NothingToDo::new(msg)));
        }
        Ok(Self { archive })
    }

    /// Check if a file name marks a comic archive.
    pub fn is_comic(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(OsStr::to_str) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        Path::new(name)
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| COMIC_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(ext)))
    }

    /// Get the file name for this archive, without extension.
    pub fn name(&self) -> &OsStr {
        self.archive
            .file_stem()
            .expect("archive has name by construction")
    }
}

impl std::ops::Deref for ArchivePath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.archive
    }
}

/// Represents the job to convert one comic archive into a new one.
///
/// When run, the archive is extracted into a scratch directory next to the output, its images are
/// transcoded on the worker pool, and the result is packed into the output archive. The source
/// archive is never modified.
#[derive(Debug)]
pub struct ArchiveJob {
    /// The archive to convert.
    archive: ArchivePath,
    /// Where the converted archive is written to.
    output: PathBuf,
    /// How to convert.
    config: ConversionConfig,
}

impl ArchiveJob {
    /// Create a job writing the converted archive to `output_root`, ignoring where it came from.
    pub fn flat(
        archive: ArchivePath,
        output_root: &Path,
        config: ConversionConfig,
    ) -> Result<Self, Exn<NothingToDo>> {
        let output = output_root.join(Self::output_name(&archive, config));
        Self::new(archive, output, config)
    }

    /// Create a job mirroring the location of `archive` below `input_root` onto `output_root`.
    ///
    /// Archives outside of `input_root` are placed directly in `output_root`.
    pub fn mirrored(
        archive: ArchivePath,
        input_root: &Path,
        output_root: &Path,
        config: ConversionConfig,
    ) -> Result<Self, Exn<NothingToDo>> {
        let relative_dir = archive
            .strip_prefix(input_root)
            .ok()
            .and_then(Path::parent)
            .unwrap_or(Path::new(""));
        let output = output_root
            .join(relative_dir)
            .join(Self::output_name(&archive, config));
        Self::new(archive, output, config)
    }

    /// Create a job, unless it would overwrite its own source.
    fn new(
        archive: ArchivePath,
        output: PathBuf,
        config: ConversionConfig,
    ) -> Result<Self, Exn<NothingToDo>> {
        if same_path(&archive, &output) {
            let path = archive.display();
            let msg = format!("Converting would overwrite the source \"{path}\"");
            return Err(Exn::new(NothingToDo::new(msg)));
        }
        Ok(Self {
            archive,
            output,
            config,
        })
    }

    /// The file name of the converted archive.
    fn output_name(archive: &ArchivePath, config: ConversionConfig) -> String {
        let name = archive.name().to_string_lossy();
        let ext = config.archive.ext();
        format!("{name}.{ext}")
    }

    /// The archive this job converts.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// The path of the archive this job produces.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Run this job.
    ///
    /// The scratch directory is removed whether the conversion succeeds or not.
    pub fn run(self, pool: &WorkerPool, bar: &ProgressBar) -> Result<PathBuf, ArchiveFailure> {
        let Self {
            archive,
            output,
            config,
        } = self;
        let fail = |kind| failure(&archive, kind);
        let start = Instant::now();

        let compression = Compression::detect(&archive).map_err(fail(FailureKind::Extraction))?;
        if compression == Compression::Unknown {
            let path = archive.display();
            let msg = format!("Unknown compression signature in \"{path}\"");
            return Err(fail(FailureKind::UnsupportedFormat)(Exn::new(
                ErrorMessage::new(msg),
            )));
        }
        debug!("{archive:?} is compressed with {compression}");

        let output_dir = output.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(output_dir)
            .or_raise(|| {
                let dir = output_dir.display();
                ErrorMessage::new(format!("Could not create the output directory \"{dir}\""))
            })
            .map_err(fail(FailureKind::Build))?;

        let workspace =
            ScratchWorkspace::create_in(output_dir).map_err(fail(FailureKind::Extraction))?;
        container::extract(&archive, compression, workspace.path())
            .map_err(fail(FailureKind::Extraction))?;

        let jobs = TranscodeJobs::collect(workspace.path(), config.image, config.quality)
            .map_err(fail(FailureKind::Transcode))?;
        if jobs.is_empty() {
            debug!("no images to convert in {archive:?}");
        }
        let n_images = jobs.len();
        let tally = jobs.run(pool, bar);
        debug!("images of {archive:?}: {tally}");

        if config.comicinfo {
            add_comic_info(workspace.path()).map_err(fail(FailureKind::Build))?;
        }

        container::build(workspace.path(), &output, config.archive)
            .map_err(fail(FailureKind::Build))?;
        workspace.close();

        let elapsed = start.elapsed().as_secs_f32();
        info!("converted {archive:?} to {output:?} in {elapsed:.1}s ({n_images} images: {tally})");
        Ok(output)
    }
}

/// Wrap an error into the failure of `archive`, to be used with [`Result::map_err`].
fn failure(
    archive: &Path,
    kind: FailureKind,
) -> impl FnOnce(Exn<ErrorMessage>) -> ArchiveFailure + '_ {
    move |exn| {
        let path = archive.display();
        let msg = format!("Failed to convert the archive \"{path}\"");
        ArchiveFailure::new(archive, kind, exn.raise(ErrorMessage::new(msg)))
    }
}

/// Compare two paths after making them absolute.
fn same_path(a: &Path, b: &Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Write an empty metadata file at `root`, unless one exists already.
fn add_comic_info(root: &Path) -> Result<(), Exn<ErrorMessage>> {
    let err = || {
        let root = root.display();
        ErrorMessage::new(format!("Could not add {COMIC_INFO} to \"{root}\""))
    };

    for entry in fs::read_dir(root).or_raise(err)? {
        let name = entry.or_raise(err)?.file_name();
        if name.to_string_lossy().eq_ignore_ascii_case(COMIC_INFO) {
            debug!("keep existing {name:?}");
            return Ok(());
        }
    }
    fs::write(root.join(COMIC_INFO), EMPTY_COMIC_INFO).or_raise(err)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs::File;
    use std::num::NonZeroUsize;

    use ::image::{Rgb, RgbImage};
    use zip::ZipArchive;

    use super::*;
    use crate::convert::ArchiveFormat;
    use crate::convert::image::ImageTarget;
    use crate::spawn::Tool;

    /// Default config as the command line gives it.
    pub(crate) fn config() -> ConversionConfig {
        ConversionConfig {
            archive: ArchiveFormat::Cbz,
            image: ImageTarget::Webp,
            quality: ConversionConfig::LOSSLESS_QUALITY,
            comicinfo: false,
            n_workers: NonZeroUsize::new(2).unwrap(),
        }
    }

    /// Pack the given images, named by their path inside the archive, into a Zip file at `path`.
    pub(crate) fn comic(path: &Path, pages: &[(&str, RgbImage)]) {
        let source = tempfile::tempdir().unwrap();
        for (name, image) in pages {
            let page = source.path().join(name);
            fs::create_dir_all(page.parent().unwrap()).unwrap();
            image.save(page).unwrap();
        }
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        // Zip content, whatever the extension of `path` says
        container::build(source.path(), path, ArchiveFormat::Cbz).unwrap();
    }

    /// Names of all entries in the Zip archive at `path`, sorted.
    pub(crate) fn entry_names(path: &Path) -> Vec<String> {
        let zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names = zip.file_names().map(String::from).collect::<Vec<_>>();
        names.sort();
        names
    }

    pub(crate) fn pool() -> WorkerPool {
        WorkerPool::new(NonZeroUsize::new(2).unwrap()).unwrap()
    }

    fn page(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 77]))
    }

    #[test]
    fn comic_extensions() {
        for name in ["a.cbz", "b.CBR", "c.zip", "d.rar", "e.cb7", "f.7Z", "dir/g.cbz"] {
            assert!(ArchivePath::is_comic(Path::new(name)), "{name}");
        }
        for name in [".hidden.cbz", "a.pdf", "cbz", "a.cbz.txt", "archive"] {
            assert!(!ArchivePath::is_comic(Path::new(name)), "{name}");
        }
        assert!(ArchivePath::new(PathBuf::from("notes.txt")).is_err());
    }

    #[test]
    fn output_paths() {
        let archive = ArchivePath::new(PathBuf::from("/in/A/B/vol 1.cbr")).unwrap();
        let mut config = config();
        config.archive = ArchiveFormat::Cb7;

        let job = ArchiveJob::mirrored(archive.clone(), Path::new("/in"), Path::new("/out"), config)
            .unwrap();
        assert_eq!(job.output(), Path::new("/out/A/B/vol 1.cb7"));

        let job = ArchiveJob::flat(archive.clone(), Path::new("/out"), config).unwrap();
        assert_eq!(job.output(), Path::new("/out/vol 1.cb7"));

        let job = ArchiveJob::mirrored(archive, Path::new("/else"), Path::new("/out"), config)
            .unwrap();
        assert_eq!(job.output(), Path::new("/out/vol 1.cb7"));
    }

    #[test]
    fn never_overwrite_the_source() {
        let archive = ArchivePath::new(PathBuf::from("/comics/issue.cbz")).unwrap();
        assert!(ArchiveJob::flat(archive, Path::new("/comics"), config()).is_err());
    }

    #[test]
    fn converts_a_single_archive() {
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("in/book.cbr");
        comic(
            &input,
            &[("001.bmp", page(60, 40)), ("extras/002.bmp", page(30, 30))],
        );
        let out = work.path().join("out");
        fs::create_dir(&out).unwrap();

        let mut config = config();
        config.comicinfo = true;
        let archive = ArchivePath::new(input.clone()).unwrap();
        let job = ArchiveJob::flat(archive, &out, config).unwrap();
        let output = job.run(&pool(), &ProgressBar::hidden()).unwrap();

        assert_eq!(output, out.join("book.cbz"));
        assert_eq!(
            entry_names(&output),
            ["001.webp", "ComicInfo.xml", "extras/002.webp"]
        );
        assert!(input.is_file(), "the source is left alone");
        let leftovers = fs::read_dir(&out).unwrap().count();
        assert_eq!(leftovers, 1, "only the output archive remains");
    }

    #[test]
    fn existing_comic_info_is_kept() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("comicinfo.XML"), b"<ComicInfo><Volume>1999</Volume></ComicInfo>")
            .unwrap();
        add_comic_info(root.path()).unwrap();
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);

        let empty = tempfile::tempdir().unwrap();
        add_comic_info(empty.path()).unwrap();
        let content = fs::read_to_string(empty.path().join(COMIC_INFO)).unwrap();
        assert!(content.contains("<ComicInfo"));
    }

    #[test]
    fn unknown_signature_is_unsupported() {
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("fake.cbz");
        fs::write(&input, b"this is a plain text file").unwrap();
        let out = work.path().join("out");
        fs::create_dir(&out).unwrap();

        let archive = ArchivePath::new(input).unwrap();
        let job = ArchiveJob::flat(archive, &out, config()).unwrap();
        let failure = job.run(&pool(), &ProgressBar::hidden()).unwrap_err();

        assert_eq!(failure.kind, FailureKind::UnsupportedFormat);
        assert!(failure.path.ends_with("fake.cbz"));
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_archive_fails_extraction() {
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("broken.cbz");
        fs::write(&input, b"PK\x03\x04 and then garbage").unwrap();
        let out = work.path().join("out");
        fs::create_dir(&out).unwrap();

        let archive = ArchivePath::new(input).unwrap();
        let job = ArchiveJob::flat(archive, &out, config()).unwrap();
        let failure = job.run(&pool(), &ProgressBar::hidden()).unwrap_err();

        assert_eq!(failure.kind, FailureKind::Extraction);
        assert_eq!(
            fs::read_dir(&out).unwrap().count(),
            0,
            "scratch directory is removed"
        );
    }

    #[test]
    fn failed_build_still_removes_the_scratch_directory() {
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("in/book.cbz");
        comic(&input, &[("001.bmp", page(20, 20))]);
        let out = work.path().join("out");
        // a non-empty directory where the output archive has to go
        let blocker = out.join("book.cbz");
        fs::create_dir_all(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"").unwrap();

        let archive = ArchivePath::new(input).unwrap();
        let job = ArchiveJob::flat(archive, &out, config()).unwrap();
        let failure = job.run(&pool(), &ProgressBar::hidden()).unwrap_err();

        assert_eq!(failure.kind, FailureKind::Build);
        let names = fs::read_dir(&out)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, ["book.cbz"], "no scratch or partial files remain");
        assert!(blocker.join("keep").is_file());
    }

    #[test]
    fn rar_output_without_the_tool_is_a_build_failure() {
        if Tool::Rar.available() {
            eprintln!("skipping, '{}' is installed", Tool::Rar);
            return;
        }
        let work = tempfile::tempdir().unwrap();
        let input = work.path().join("in/book.cbz");
        comic(&input, &[("001.bmp", page(20, 20))]);
        let out = work.path().join("out");
        fs::create_dir(&out).unwrap();

        let mut config = config();
        config.archive = ArchiveFormat::Cbr;
        let archive = ArchivePath::new(input).unwrap();
        let job = ArchiveJob::flat(archive, &out, config).unwrap();
        let failure = job.run(&pool(), &ProgressBar::hidden()).unwrap_err();

        assert_eq!(failure.kind, FailureKind::Build);
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }
}
