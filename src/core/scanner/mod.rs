//! # Scanner Module
//!
//! Discovers candidate images among the direct children of one directory.
//!
//! ## Format detection
//! Formats come from magic bytes, never from the file name. The extension
//! only decides whether an unrecognizable file is worth reporting as a
//! corrupt image or is silently ignored as "not a photo".
//!
//! ## Ordering
//! Results are sorted by path. Duplicate resolution is first-seen-wins, so
//! this order is what makes repeated runs pick the same canonical files.
//!
//! ## Example
//! ```rust,ignore
//! use photo_sanitizer::core::scanner::{DirectoryScanner, ScanConfig};
//!
//! let scanner = DirectoryScanner::new(ScanConfig::default());
//! let files = scanner.scan(Path::new("/Users/me/Exports"))?;
//! ```

mod sniff;
mod walker;

pub use sniff::{sniff_file, Sniffed};
pub use walker::{DirectoryScanner, ScanConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A directory entry that looks like an image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// What the leading bytes say the file is
    pub sniffed: Sniffed,
}

/// Image formats the sanitizer can process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// Map an `image` crate format onto a supported format
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::WebP => Some(ImageFormat::WebP),
            image::ImageFormat::Gif => Some(ImageFormat::Gif),
            image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
            image::ImageFormat::Tiff => Some(ImageFormat::Tiff),
            _ => None,
        }
    }

    /// The equivalent `image` crate format
    pub fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::WebP => image::ImageFormat::WebP,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
            ImageFormat::Tiff => image::ImageFormat::Tiff,
        }
    }

    /// Canonical file extension used when naming committed files
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tif",
        }
    }

    /// Whether the format carries lossy compression
    pub fn is_lossy(self) -> bool {
        matches!(self, ImageFormat::Jpeg | ImageFormat::WebP)
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Jpeg => write!(f, "JPEG"),
            ImageFormat::Png => write!(f, "PNG"),
            ImageFormat::WebP => write!(f, "WebP"),
            ImageFormat::Gif => write!(f, "GIF"),
            ImageFormat::Bmp => write!(f, "BMP"),
            ImageFormat::Tiff => write!(f, "TIFF"),
        }
    }
}
