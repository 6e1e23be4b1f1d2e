//! Content sniffing.

use super::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Extensions that make an unrecognizable file worth reporting
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "jpe", "png", "webp", "gif", "bmp", "tif", "tiff", "heic", "heif",
];

/// Bytes read from the head of each file
const SNIFF_LEN: usize = 64;

/// Result of inspecting a file's leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sniffed {
    /// A supported image format
    Image(ImageFormat),
    /// A recognizable image format this tool does not process
    UnsupportedImage,
    /// Zero-length file
    Empty,
    /// Content matches no known image signature
    Unrecognized,
    /// The file could not be opened or read
    Unreadable,
}

impl Sniffed {
    /// Classify a byte prefix
    pub fn from_bytes(head: &[u8]) -> Self {
        if head.is_empty() {
            return Sniffed::Empty;
        }
        match image::guess_format(head) {
            Ok(format) => match ImageFormat::from_image_format(format) {
                Some(format) => Sniffed::Image(format),
                None => Sniffed::UnsupportedImage,
            },
            Err(_) => Sniffed::Unrecognized,
        }
    }
}

/// Read the first bytes of a file and classify them
pub fn sniff_file(path: &Path) -> io::Result<Sniffed> {
    let mut file = File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(Sniffed::from_bytes(&head))
}

/// Whether the file name claims to be an image
pub(super) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    #[test]
    fn detects_png_regardless_of_name() {
        assert_eq!(Sniffed::from_bytes(PNG_MAGIC), Sniffed::Image(ImageFormat::Png));
    }

    #[test]
    fn detects_jpeg() {
        assert_eq!(Sniffed::from_bytes(JPEG_MAGIC), Sniffed::Image(ImageFormat::Jpeg));
    }

    #[test]
    fn empty_is_reported_as_empty() {
        assert_eq!(Sniffed::from_bytes(&[]), Sniffed::Empty);
    }

    #[test]
    fn text_is_unrecognized() {
        assert_eq!(Sniffed::from_bytes(b"hello world"), Sniffed::Unrecognized);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        assert!(has_image_extension(Path::new("/photos/IMG_0001.JPG")));
        assert!(has_image_extension(Path::new("/photos/scan.tiff")));
        assert!(!has_image_extension(Path::new("/photos/notes.txt")));
        assert!(!has_image_extension(Path::new("/photos/no_extension")));
    }
}
