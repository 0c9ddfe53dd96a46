//! Everything needed to convert comic book archives.

pub mod archive;
pub mod collections;
pub mod container;
pub mod detect;
pub mod dir;
pub mod image;
pub mod pool;
pub mod walk;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use exn::Exn;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::convert::detect::Compression;
use crate::convert::image::ImageTarget;
use crate::error::{ArchiveFailure, NothingToDo};

/// The archive container to produce.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// A Zip container with the `.cbz` extension.
    #[default]
    Cbz,
    /// A RAR container with the `.cbr` extension.
    Cbr,
    /// A 7z container with the `.cb7` extension.
    Cb7,
}

impl ArchiveFormat {
    /// Get the file extension as string.
    pub const fn ext(self) -> &'static str {
        use ArchiveFormat::*;

        match self {
            Cbz => "cbz",
            Cbr => "cbr",
            Cb7 => "cb7",
        }
    }

    /// The compression family written for this format.
    pub const fn compression(self) -> Compression {
        use ArchiveFormat::*;

        match self {
            Cbz => Compression::Zip,
            Cbr => Compression::Rar,
            Cb7 => Compression::SevenZip,
        }
    }
}

/// The conversion policy, shared unchanged by every archive of a run.
#[derive(Debug, Clone, Copy)]
pub struct ConversionConfig {
    /// Container format of the produced archives.
    pub archive: ArchiveFormat,
    /// Codec the page images are re-encoded to.
    pub image: ImageTarget,
    /// Lossy quality for WebP encoding, 0 to 100.
    pub quality: u8,
    /// Add an empty `ComicInfo.xml` when an archive has none.
    pub comicinfo: bool,
    /// Number of threads transcoding images concurrently.
    pub n_workers: NonZeroUsize,
}

impl ConversionConfig {
    /// Quality used when no compression was requested.
    pub const LOSSLESS_QUALITY: u8 = 100;
    /// Default number of transcode workers.
    pub const DEFAULT_WORKERS: NonZeroUsize = NonZeroUsize::new(4).expect("4 is not zero");
}

/// How the conversion of one archive ended.
#[derive(Debug)]
pub enum Outcome {
    /// The converted archive was written to this path.
    Converted(PathBuf),
    /// The archive was deliberately left alone.
    Skipped(PathBuf, Exn<NothingToDo>),
    /// The conversion failed, the batch continues.
    Failed(ArchiveFailure),
}

/// Progress bars shown while converting.
pub struct Bars {
    /// Container to draw all bars together.
    pub multi: MultiProgress,
    /// Progress over all archives of the run.
    pub archives: ProgressBar,
    /// Progress over the images of the current archive.
    pub images: ProgressBar,
}

impl Bars {
    /// Set up bars for a run over `n_archives` archives.
    pub fn new(n_archives: usize) -> Self {
        Self::with_multi(MultiProgress::new(), n_archives)
    }

    /// Bars that never draw anything.
    #[cfg(test)]
    pub fn hidden() -> Self {
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        Self::with_multi(multi, 0)
    }

    /// Add both bars to `multi`.
    fn with_multi(multi: MultiProgress, n_archives: usize) -> Self {
        let style = ProgressStyle::with_template("{prefix:>8} [{bar:40}] {pos}/{len} {msg}")
            .expect("template is valid")
            .progress_chars("=> ");

        let archives = multi.add(ProgressBar::new(n_archives as u64));
        archives.set_style(style.clone());
        archives.set_prefix("archives");
        archives.enable_steady_tick(Duration::from_millis(200));

        let images = multi.add(ProgressBar::new(0));
        images.set_style(style);
        images.set_prefix("images");

        Self {
            multi,
            archives,
            images,
        }
    }

    /// Print a line above the bars.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            println!("{}", msg.as_ref());
        }
    }

    /// Remove all bars from the terminal.
    pub fn finish(&self) {
        self.images.finish_and_clear();
        self.archives.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_formats_map_to_containers() {
        assert_eq!(ArchiveFormat::Cbz.compression(), Compression::Zip);
        assert_eq!(ArchiveFormat::Cbr.compression(), Compression::Rar);
        assert_eq!(ArchiveFormat::Cb7.compression(), Compression::SevenZip);
        assert_eq!(ArchiveFormat::Cb7.ext(), "cb7");
    }
}
