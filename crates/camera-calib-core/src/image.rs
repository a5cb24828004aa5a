use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel dimensions of a frame.
///
/// `ImageSize::UNSPECIFIED` (0x0) is the sentinel used by callers that have no
/// target size in mind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const UNSPECIFIED: ImageSize = ImageSize {
        width: 0,
        height: 0,
    };

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_unspecified(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

/// Owned 8-bit grayscale frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Wrap a row-major buffer; `None` when the buffer length does not match.
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width as u32, self.height as u32)
    }
}

impl GrayImageView<'_> {
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width as u32, self.height as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(GrayImage::new(4, 4, vec![0; 15]).is_none());
        assert!(GrayImage::new(4, 4, vec![0; 16]).is_some());
    }

    #[test]
    fn zero_size_is_unspecified() {
        assert!(ImageSize::UNSPECIFIED.is_unspecified());
        assert!(ImageSize::new(640, 0).is_unspecified());
        assert!(!ImageSize::new(640, 480).is_unspecified());
    }
}
