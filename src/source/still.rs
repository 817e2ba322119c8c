//! Still-image frame source.
//!
//! This module owns upload validation and decoding. Validation happens
//! *before* anything enters the capture loop:
//! - Only JPEG, PNG, GIF, and WebP payloads are accepted.
//! - Payloads over the configured size limit are rejected.
//! - Decode failures are rejected with a user-facing message.
//!
//! Once an image is decoded, frame acquisition is synchronous and cannot
//! fail.

use std::fmt;
use std::path::Path;

use image::{ImageFormat, RgbImage};

use crate::frame::Frame;

const DEFAULT_MAX_UPLOAD_MB: u64 = 10;

/// Upload validation limits.
#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    /// Maximum accepted payload size in bytes.
    pub max_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl UploadLimits {
    pub fn from_max_mb(max_mb: u64) -> Self {
        Self {
            max_bytes: max_mb * 1024 * 1024,
        }
    }
}

/// Rejection reasons for uploaded images. These never enter the capture
/// loop; the upload surface reports them directly.
#[derive(Debug)]
pub enum StillError {
    /// Payload is not one of the accepted image formats.
    UnsupportedFormat,
    /// Payload exceeds the configured size limit.
    TooLarge { size: u64, limit: u64 },
    /// Payload claimed a supported format but failed to decode.
    Decode(String),
    /// Payload could not be read at all.
    Io(std::io::Error),
}

impl fmt::Display for StillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StillError::UnsupportedFormat => {
                write!(f, "please select a valid image file (JPEG, PNG, GIF, or WebP)")
            }
            StillError::TooLarge { size, limit } => write!(
                f,
                "image size {} bytes exceeds the {} byte limit",
                size, limit
            ),
            StillError::Decode(cause) => {
                write!(f, "failed to load image ({}), please try another file", cause)
            }
            StillError::Io(err) => write!(f, "failed to read the image file: {}", err),
        }
    }
}

impl std::error::Error for StillError {}

/// A decoded, validated still image ready for frame acquisition.
#[derive(Debug)]
pub struct StillImage {
    rgb: RgbImage,
}

impl StillImage {
    /// Validate and decode an image file from disk.
    pub fn open(path: &Path, limits: &UploadLimits) -> Result<Self, StillError> {
        let metadata = std::fs::metadata(path).map_err(StillError::Io)?;
        if metadata.len() > limits.max_bytes {
            return Err(StillError::TooLarge {
                size: metadata.len(),
                limit: limits.max_bytes,
            });
        }
        let bytes = std::fs::read(path).map_err(StillError::Io)?;
        Self::from_bytes(&bytes, limits)
    }

    /// Validate and decode an in-memory image payload.
    pub fn from_bytes(bytes: &[u8], limits: &UploadLimits) -> Result<Self, StillError> {
        if bytes.len() as u64 > limits.max_bytes {
            return Err(StillError::TooLarge {
                size: bytes.len() as u64,
                limit: limits.max_bytes,
            });
        }
        let format = image::guess_format(bytes).map_err(|_| StillError::UnsupportedFormat)?;
        if !matches!(
            format,
            ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP
        ) {
            return Err(StillError::UnsupportedFormat);
        }
        let decoded = image::load_from_memory_with_format(bytes, format)
            .map_err(|err| StillError::Decode(err.to_string()))?;
        Ok(Self {
            rgb: decoded.to_rgb8(),
        })
    }

    /// Wrap an image the host already decoded. No validation: the host owns
    /// the payload at this point.
    pub fn from_rgb(rgb: RgbImage) -> Self {
        Self { rgb }
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    /// Acquire a frame from the decoded image.
    ///
    /// Synchronous and infallible: the pixels are already in memory.
    pub fn acquire(&self) -> Frame {
        Frame::new(self.rgb.as_raw().clone(), self.rgb.width(), self.rgb.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, ImageFormat::Png)
            .expect("encode png");
        bytes.into_inner()
    }

    #[test]
    fn accepts_png_and_acquires_frames() {
        let still =
            StillImage::from_bytes(&png_bytes(4, 3), &UploadLimits::default()).expect("decode");
        assert_eq!(still.width(), 4);
        assert_eq!(still.height(), 3);

        let frame = still.acquire();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 3);
        assert_eq!(frame.pixels().len(), 4 * 3 * 3);

        // Acquisition is repeatable; the decoded image is not consumed.
        let again = still.acquire();
        assert_eq!(again.pixels(), frame.pixels());
    }

    #[test]
    fn rejects_unknown_payloads() {
        let err = StillImage::from_bytes(b"definitely not an image", &UploadLimits::default())
            .unwrap_err();
        assert!(matches!(err, StillError::UnsupportedFormat));
        assert!(err.to_string().contains("JPEG, PNG, GIF, or WebP"));
    }

    #[test]
    fn rejects_oversized_payloads() {
        let limits = UploadLimits { max_bytes: 16 };
        let err = StillImage::from_bytes(&png_bytes(8, 8), &limits).unwrap_err();
        assert!(matches!(err, StillError::TooLarge { .. }));
    }

    #[test]
    fn rejects_truncated_payloads_as_decode_failures() {
        let mut bytes = png_bytes(8, 8);
        bytes.truncate(bytes.len() / 2);
        let err = StillImage::from_bytes(&bytes, &UploadLimits::default()).unwrap_err();
        assert!(matches!(err, StillError::Decode(_)));
    }
}
