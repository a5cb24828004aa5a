//! Frame sources backed by image files.
//!
//! Directory mode reads every decodable image of a directory in file name
//! order. Stream mode reads a numbered image sequence such as
//! `frames/img_%03d.png`; the sequence ends at the first missing index.
//! Capture devices and network streams have no backend here and are
//! reported as an unopenable source.

use camera_calib_core::{FrameError, FrameSource, GrayImage};
use image::ImageFormat;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("unable to open image source \"{locator}\": {reason}")]
    Open { locator: String, reason: String },
    #[error("unable to list image directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn to_gray(frame: &Path, img: image::DynamicImage) -> Result<GrayImage, FrameError> {
    let luma = img.to_luma8();
    let (w, h) = luma.dimensions();
    GrayImage::new(w as usize, h as usize, luma.into_raw()).ok_or_else(|| FrameError::Decode {
        frame: frame.display().to_string(),
        source: "decoded buffer does not match image dimensions".into(),
    })
}

/// Every image file of one directory, sorted by file name.
#[derive(Clone, Debug)]
pub struct DirectorySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let io_err = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                files.push(path);
            }
        }
        files.sort();
        info!("{} image files found in {}", files.len(), dir.display());
        Ok(Self { files, next: 0 })
    }

    /// Image files found when the directory was opened, undecodable ones
    /// included.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameError> {
        while let Some(path) = self.files.get(self.next) {
            self.next += 1;
            match image::open(path) {
                Ok(img) => {
                    debug!("read {}", path.display());
                    return to_gray(path, img).map(Some);
                }
                Err(e) => warn!("skipping {}: {e}", path.display()),
            }
        }
        Ok(None)
    }
}

/// `prefix%0Nd suffix` split around its single integer conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
struct SequencePattern {
    prefix: String,
    width: usize,
    suffix: String,
}

impl SequencePattern {
    fn parse(locator: &str) -> Option<Self> {
        let start = locator.find('%')?;
        let rest = &locator[start + 1..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if !rest[digits..].starts_with('d') {
            return None;
        }
        let width = if digits == 0 { 0 } else { rest[..digits].parse().ok()? };
        let suffix = &rest[digits + 1..];
        if suffix.contains('%') {
            return None;
        }
        Some(Self {
            prefix: locator[..start].to_string(),
            width,
            suffix: suffix.to_string(),
        })
    }

    fn path(&self, index: u64) -> PathBuf {
        PathBuf::from(format!(
            "{}{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.width
        ))
    }
}

/// Numbered image files read in index order, starting at 0 or 1.
#[derive(Clone, Debug)]
pub struct ImageSequenceSource {
    pattern: SequencePattern,
    next: u64,
}

impl ImageSequenceSource {
    pub fn open(locator: &str) -> Result<Self, SourceError> {
        let open_err = |reason: &str| SourceError::Open {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };
        let pattern = SequencePattern::parse(locator)
            .ok_or_else(|| open_err("expected an image sequence such as frames/img_%03d.png"))?;
        let first = (0..=1)
            .find(|&i| pattern.path(i).is_file())
            .ok_or_else(|| open_err("no frame numbered 0 or 1"))?;
        info!("reading image sequence {locator} from index {first}");
        Ok(Self {
            pattern,
            next: first,
        })
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<GrayImage>, FrameError> {
        let path = self.pattern.path(self.next);
        if !path.is_file() {
            debug!("image sequence ends before {}", path.display());
            return Ok(None);
        }
        self.next += 1;
        let img = image::open(&path).map_err(|e| FrameError::Decode {
            frame: path.display().to_string(),
            source: Box::new(e),
        })?;
        to_gray(&path, img).map(Some)
    }
}

/// Open the locator of a `stream` image source.
pub fn open_stream(locator: &str) -> Result<ImageSequenceSource, SourceError> {
    let locator = locator.trim();
    let unsupported = |reason: &str| SourceError::Open {
        locator: locator.to_string(),
        reason: reason.to_string(),
    };
    if locator.parse::<u32>().is_ok() {
        return Err(unsupported(
            "capture devices are not supported, record an image sequence instead",
        ));
    }
    if locator.contains("://") {
        return Err(unsupported(
            "network streams are not supported, record an image sequence instead",
        ));
    }
    ImageSequenceSource::open(locator)
}
