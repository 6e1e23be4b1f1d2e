//! # Integrity Verifier
//!
//! Decides whether a candidate may stand in for its original. A candidate
//! must be non-empty, decodable, the same format and the same pixel size.
//! Byte equality with the original is fine: it only means there was nothing
//! to remove.

use crate::core::fingerprint::ImageRecord;
use crate::core::tools::{ImageInfo, ImageTool};
use crate::error::VerifyError;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Checks pipeline output against the original record
#[derive(Clone)]
pub struct IntegrityVerifier {
    inspector: Arc<dyn ImageTool>,
}

impl IntegrityVerifier {
    pub fn new(inspector: Arc<dyn ImageTool>) -> Self {
        Self { inspector }
    }

    /// Accept or reject `candidate` as a replacement for `original`
    pub fn verify(&self, original: &ImageRecord, candidate: &Path) -> Result<ImageInfo, VerifyError> {
        let size = fs::metadata(candidate)
            .map_err(|e| VerifyError::Unreadable {
                path: candidate.to_path_buf(),
                reason: e.to_string(),
            })?
            .len();
        if size == 0 {
            return Err(VerifyError::ZeroByte {
                path: candidate.to_path_buf(),
            });
        }

        let info = self
            .inspector
            .inspect(candidate)
            .map_err(|e| VerifyError::Unreadable {
                path: candidate.to_path_buf(),
                reason: e.to_string(),
            })?;

        if info.format != original.format {
            return Err(VerifyError::FormatMismatch {
                expected: original.format.to_string(),
                actual: info.format.to_string(),
            });
        }

        let actual = (info.width, info.height);
        if actual != original.dimensions {
            return Err(VerifyError::DimensionMismatch {
                expected: original.dimensions,
                actual,
            });
        }

        debug!(
            "Verified {} ({} bytes, {}x{} {})",
            candidate.display(),
            size,
            info.width,
            info.height,
            info.format
        );
        Ok(info)
    }
}

impl std::fmt::Debug for IntegrityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityVerifier")
            .field("inspector", &self.inspector.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::ContentHash;
    use crate::core::scanner::ImageFormat;
    use crate::core::tools::NativeImageTool;
    use crate::error::{Classify, FailureReason};
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn record(path: &Path, format: ImageFormat, dimensions: (u32, u32)) -> ImageRecord {
        ImageRecord {
            path: path.to_path_buf(),
            format,
            size: 1,
            dimensions,
            content_hash: ContentHash::of_bytes(b"original"),
        }
    }

    fn verifier() -> IntegrityVerifier {
        IntegrityVerifier::new(Arc::new(NativeImageTool::new()))
    }

    fn png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb([1, 2, 3]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn matching_candidate_is_valid() {
        let temp = TempDir::new().unwrap();
        let candidate = png(temp.path(), "out.png", 16, 9);
        let original = record(Path::new("/p/in.png"), ImageFormat::Png, (16, 9));

        let info = verifier().verify(&original, &candidate).unwrap();
        assert_eq!((info.width, info.height), (16, 9));
    }

    #[test]
    fn identical_bytes_are_not_an_error() {
        let temp = TempDir::new().unwrap();
        let original_path = png(temp.path(), "in.png", 8, 8);
        let candidate = temp.path().join("copy.png");
        fs::copy(&original_path, &candidate).unwrap();

        let original = ImageRecord {
            content_hash: ContentHash::of_file(&original_path).unwrap(),
            ..record(&original_path, ImageFormat::Png, (8, 8))
        };
        assert!(verifier().verify(&original, &candidate).is_ok());
    }

    #[test]
    fn resized_candidate_is_rejected() {
        let temp = TempDir::new().unwrap();
        let candidate = png(temp.path(), "out.png", 8, 8);
        let original = record(Path::new("/p/in.png"), ImageFormat::Png, (16, 16));

        let error = verifier().verify(&original, &candidate).unwrap_err();
        assert_eq!(error.reason(), FailureReason::DimensionMismatch);
    }

    #[test]
    fn converted_candidate_is_rejected() {
        let temp = TempDir::new().unwrap();
        let candidate = png(temp.path(), "out.png", 8, 8);
        let original = record(Path::new("/p/in.jpg"), ImageFormat::Jpeg, (8, 8));

        let error = verifier().verify(&original, &candidate).unwrap_err();
        assert_eq!(error.reason(), FailureReason::FormatMismatch);
    }

    #[test]
    fn empty_candidate_is_rejected() {
        let temp = TempDir::new().unwrap();
        let candidate = temp.path().join("empty.png");
        fs::write(&candidate, b"").unwrap();
        let original = record(Path::new("/p/in.png"), ImageFormat::Png, (8, 8));

        let error = verifier().verify(&original, &candidate).unwrap_err();
        assert_eq!(error.reason(), FailureReason::ZeroByte);
    }

    #[test]
    fn garbage_candidate_is_unreadable() {
        let temp = TempDir::new().unwrap();
        let candidate = temp.path().join("junk.png");
        fs::write(&candidate, b"definitely not an image").unwrap();
        let original = record(Path::new("/p/in.png"), ImageFormat::Png, (8, 8));

        let error = verifier().verify(&original, &candidate).unwrap_err();
        assert_eq!(error.reason(), FailureReason::Unreadable);
        assert!(!error.is_transient());
    }
}
