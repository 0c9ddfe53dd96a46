//! Contains everything related to dealing with individual images.

use std::fs::{self, File};
use std::io::{Cursor, Write as _};
use std::path::{Path, PathBuf};

use exn::{Exn, ResultExt as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use indicatif::ProgressBar;
use tracing::{debug, trace, warn};

use crate::convert::pool::WorkerPool;
use crate::convert::walk::Walk;
use crate::error::ErrorMessage;

/// The codec page images get re-encoded to.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImageTarget {
    /// Lossy WebP, kept only when smaller than the source.
    #[default]
    Webp,
    /// Lossless PNG, written next to the source.
    Png,
    /// Heavily compressed JPEG, always replacing the source.
    Jpg,
    /// Leave all images as they are.
    Original,
}

impl ImageTarget {
    /// Largest width or height an image may have before it gets halved for WebP.
    pub const MAX_DIMENSION: u32 = 3500;

    /// Fixed JPEG quality, the lowest possible.
    const JPEG_QUALITY: u8 = 1;

    /// Get the file extension of produced images, `None` if nothing is produced.
    pub const fn ext(self) -> Option<&'static str> {
        use ImageTarget::*;

        match self {
            Webp => Some("webp"),
            Png => Some("png"),
            Jpg => Some("jpeg"),
            Original => None,
        }
    }

    /// Extensions of the images this target converts from.
    pub const fn sources(self) -> &'static [&'static str] {
        use ImageTarget::*;

        match self {
            Webp => &["png", "jpg", "jpeg", "bmp", "gif"],
            Png => &["jpg", "jpeg", "bmp", "gif", "webp"],
            Jpg => &["png", "bmp", "gif", "webp"],
            Original => &[],
        }
    }

    /// Check if the file at `path` is an image this target converts.
    ///
    /// The extension is compared case-insensitively.
    pub fn accepts(self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.sources()
                    .iter()
                    .any(|source| source.eq_ignore_ascii_case(ext))
            })
    }

    /// Re-encode the image at `path` and decide which files remain.
    ///
    /// | target   | produced | original        |
    /// |----------|----------|-----------------|
    /// | webp     | `.webp`  | kept if smaller |
    /// | png      | `.png`   | always kept     |
    /// | jpg      | `.jpeg`  | always removed  |
    /// | original | nothing  | untouched       |
    ///
    /// On error the original is untouched and no new file remains.
    pub fn transcode(self, path: &Path, quality: u8) -> Result<ImageOutcome, Exn<ErrorMessage>> {
        use ImageTarget::*;

        let err = || {
            let path = path.display();
            ErrorMessage::new(format!("Failed to convert the image \"{path}\" to {self:?}"))
        };

        let Some(ext) = self.ext() else {
            return Ok(ImageOutcome::KeptOriginal);
        };
        let target = path.with_extension(ext);
        let image = load(path).or_raise(err)?;

        match self {
            Webp => {
                let original_len = fs::metadata(path).or_raise(err)?.len();
                let encoded = encode_webp(shrink_oversized(image), quality).or_raise(err)?;
                if !keep_encoded(original_len, encoded.len() as u64) {
                    trace!("webp not smaller than {path:?}, keep the original");
                    return Ok(ImageOutcome::KeptOriginal);
                }
                write_new(&target, &encoded).or_raise(err)?;
                replace(path, &target).or_raise(err)?;
                Ok(ImageOutcome::Replaced)
            }
            Png => {
                let encoded = encode_png(&image).or_raise(err)?;
                write_new(&target, &encoded).or_raise(err)?;
                Ok(ImageOutcome::KeptBoth)
            }
            Jpg => {
                let encoded = encode_jpeg(&image).or_raise(err)?;
                write_new(&target, &encoded).or_raise(err)?;
                replace(path, &target).or_raise(err)?;
                Ok(ImageOutcome::Replaced)
            }
            Original => unreachable!("handled above as it has no extension"),
        }
    }
}

/// Which files remain after an image was transcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOutcome {
    /// The new file took the place of the original.
    Replaced,
    /// No new file was kept.
    KeptOriginal,
    /// The new file was written next to the original.
    KeptBoth,
    /// The conversion failed, the original is untouched.
    Failed,
}

/// Decode an image, trusting its content over its extension.
fn load(path: &Path) -> Result<DynamicImage, Exn<ErrorMessage>> {
    let err = || ErrorMessage::new("Could not decode the image");

    let image = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .or_raise(err)?
        .decode()
        .or_raise(err)?;
    trace!(
        "decoded {path:?} with {}x{} pixels",
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Halve both dimensions of an image when either exceeds [`ImageTarget::MAX_DIMENSION`].
fn shrink_oversized(image: DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= ImageTarget::MAX_DIMENSION && height <= ImageTarget::MAX_DIMENSION {
        return image;
    }
    debug!("halving oversized image of {width}x{height} pixels");
    image.resize_exact(width / 2, height / 2, FilterType::Lanczos3)
}

/// The encoded file is only worth keeping when strictly smaller.
const fn keep_encoded(original_len: u64, encoded_len: u64) -> bool {
    encoded_len < original_len
}

/// Encode as lossy WebP without alpha channel.
fn encode_webp(image: DynamicImage, quality: u8) -> Result<Vec<u8>, Exn<ErrorMessage>> {
    let rgb = image.into_rgb8();
    let memory = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
        .encode_simple(false, f32::from(quality.min(100)))
        .map_err(|e| Exn::new(ErrorMessage::new(format!("Could not encode WebP: {e:?}"))))?;
    Ok(memory.to_vec())
}

/// Encode as lossless PNG.
fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, Exn<ErrorMessage>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .or_raise(|| ErrorMessage::new("Could not encode PNG"))?;
    Ok(bytes)
}

/// Encode as RGB JPEG with the lowest quality.
fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, Exn<ErrorMessage>> {
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, ImageTarget::JPEG_QUALITY)
        .encode_image(&rgb)
        .or_raise(|| ErrorMessage::new("Could not encode JPEG"))?;
    Ok(bytes)
}

/// Write `bytes` to `path`, failing if the file already exists.
fn write_new(path: &Path, bytes: &[u8]) -> Result<(), Exn<ErrorMessage>> {
    let err = || {
        let path = path.display();
        ErrorMessage::new(format!("Could not write the new image \"{path}\""))
    };

    let mut file = File::create_new(path).or_raise(err)?;
    if let Err(e) = file.write_all(bytes) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(e).or_raise(err);
    }
    Ok(())
}

/// Remove `original` now that `new` holds its content.
///
/// If the original cannot be removed, `new` is removed instead so only one of them remains.
fn replace(original: &Path, new: &Path) -> Result<(), Exn<ErrorMessage>> {
    if let Err(e) = fs::remove_file(original) {
        if let Err(e) = fs::remove_file(new) {
            warn!("could not remove {new:?} after failed replacement: {e}");
        }
        return Err(e).or_raise(|| {
            let original = original.display();
            ErrorMessage::new(format!("Could not remove the original image \"{original}\""))
        });
    }
    Ok(())
}

/// The task to transcode a single image.
#[derive(Debug)]
pub struct TranscodeJob {
    /// The image to transcode.
    path: PathBuf,
    /// The codec to transcode to.
    target: ImageTarget,
    /// Lossy quality for codecs that have one.
    quality: u8,
}

impl TranscodeJob {
    /// Run this job, logging instead of returning an error.
    pub fn run(self) -> ImageOutcome {
        let Self {
            path,
            target,
            quality,
        } = self;
        match target.transcode(&path, quality) {
            Ok(outcome) => {
                trace!("{path:?}: {outcome:?}");
                outcome
            }
            Err(exn) => {
                warn!("keep the original image {path:?}: {exn:?}");
                ImageOutcome::Failed
            }
        }
    }
}

/// All image transcode jobs for one extracted archive.
pub struct TranscodeJobs {
    /// The jobs, one per candidate image.
    jobs: Vec<TranscodeJob>,
}

impl TranscodeJobs {
    /// Find all candidate images below `root`, at any depth.
    ///
    /// Hidden files are ignored and hidden directories are not entered, so thumbnails and other
    /// tool metadata bundled in an archive pass through unchanged.
    pub fn collect(root: &Path, target: ImageTarget, quality: u8) -> Result<Self, Exn<ErrorMessage>> {
        let err = || {
            let root = root.display();
            ErrorMessage::new(format!("Could not collect the images in \"{root}\""))
        };

        let mut jobs = Vec::new();
        if target == ImageTarget::Original {
            return Ok(Self { jobs });
        }
        for path in Walk::new(root, true) {
            let path = path.or_raise(err)?;
            if target.accepts(&path) {
                jobs.push(TranscodeJob {
                    path,
                    target,
                    quality,
                });
            }
        }
        Ok(Self { jobs })
    }

    /// Number of collected jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if there is nothing to transcode.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run all jobs on `pool` and wait for every one of them to finish.
    pub fn run(self, pool: &WorkerPool, bar: &ProgressBar) -> ImageTally {
        bar.reset();
        bar.set_length(self.jobs.len() as u64);

        let handles = self
            .jobs
            .into_iter()
            .map(|job| {
                let bar = bar.clone();
                pool.submit(move || {
                    let outcome = job.run();
                    bar.inc(1);
                    outcome
                })
            })
            .collect::<Vec<_>>();

        let mut tally = ImageTally::default();
        for outcome in pool.join_all(handles) {
            tally.record(outcome.unwrap_or(ImageOutcome::Failed));
        }
        tally
    }
}

/// Count of image outcomes for one archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display)]
#[display("{replaced} replaced, {kept_both} added, {kept_original} unchanged, {failed} failed")]
pub struct ImageTally {
    /// Images replaced by their transcoded version.
    pub replaced: usize,
    /// Images left as they were.
    pub kept_original: usize,
    /// Images that got a transcoded sibling.
    pub kept_both: usize,
    /// Images that could not be transcoded.
    pub failed: usize,
}

impl ImageTally {
    /// Count one more outcome.
    pub fn record(&mut self, outcome: ImageOutcome) {
        use ImageOutcome::*;

        let count = match outcome {
            Replaced => &mut self.replaced,
            KeptOriginal => &mut self.kept_original,
            KeptBoth => &mut self.kept_both,
            Failed => &mut self.failed,
        };
        *count += 1;
    }
}
