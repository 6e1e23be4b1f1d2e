//! # Fingerprint Module
//!
//! Composite similarity signatures for deduplication.
//!
//! ## Components
//! | Component | Source | Survives |
//! |-----------|--------|----------|
//! | structural | 8x8 block average, 4 levels per channel | re-encoding, resizing |
//! | histogram | colour buckets of the same 8x8 grid, by count | re-encoding, rearranged layout |
//! | provenance | Make, Model, DateTimeOriginal, LensModel | any pixel change |
//!
//! Two images are duplicates only when all three components agree. The
//! composite signature is the three hashes concatenated in that order.
//!
//! ## Determinism
//! Every step is integer arithmetic over decoded pixels and sorted text, so
//! the same bytes always give the same [`Fingerprint`], whatever the path or
//! the order files are processed in.

mod grid;
mod histogram;
mod provenance;
mod structural;

pub use histogram::histogram_hash;
pub use provenance::{canonical_provenance, provenance_hash, PROVENANCE_FIELDS};
pub use structural::structural_hash;

use crate::core::hasher::{decode_image, read_file_bytes, ContentHash};
use crate::core::scanner::{ImageFormat, Sniffed};
use crate::core::tools::{FieldMap, MetadataTool};
use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One discovered image, as known after fingerprinting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Format from content sniffing
    pub format: ImageFormat,
    /// File size in bytes
    pub size: u64,
    /// Pixel dimensions (width, height)
    pub dimensions: (u32, u32),
    /// BLAKE3 of the file bytes
    pub content_hash: ContentHash,
}

/// Composite similarity signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub structural: u64,
    pub histogram: u64,
    pub provenance: u64,
}

impl Fingerprint {
    /// The three components concatenated as 48 hex digits
    pub fn signature(&self) -> String {
        format!(
            "{:016x}{:016x}{:016x}",
            self.structural, self.histogram, self.provenance
        )
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

/// Builds fingerprints from file content and capture metadata
#[derive(Clone)]
pub struct FingerprintBuilder {
    metadata: Option<Arc<dyn MetadataTool>>,
}

impl FingerprintBuilder {
    /// Read provenance fields with `metadata`.
    ///
    /// Only one tool is ever consulted, since two tools may render the
    /// same field differently and that would split equal images apart.
    pub fn new(metadata: Arc<dyn MetadataTool>) -> Self {
        Self {
            metadata: Some(metadata),
        }
    }

    /// Fingerprint pixels only; every provenance component hashes the empty string
    pub fn without_metadata() -> Self {
        Self { metadata: None }
    }

    /// Compute the fingerprint of `path`
    pub fn build(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let bytes = read_file_bytes(path).map_err(|e| unreadable(path, e))?;
        let content_hash = ContentHash::of_bytes(&bytes);
        self.analyze_bytes(path, bytes.as_ref(), content_hash)
            .map(|(_, fingerprint)| fingerprint)
    }

    /// Build the [`ImageRecord`] and [`Fingerprint`] for `path`.
    ///
    /// `content_hash` is the hash already computed for the exact-duplicate
    /// pre-filter; it is recorded as given.
    pub fn analyze(
        &self,
        path: &Path,
        content_hash: ContentHash,
    ) -> Result<(ImageRecord, Fingerprint), FingerprintError> {
        let bytes = read_file_bytes(path).map_err(|e| unreadable(path, e))?;
        self.analyze_bytes(path, bytes.as_ref(), content_hash)
    }

    fn analyze_bytes(
        &self,
        path: &Path,
        bytes: &[u8],
        content_hash: ContentHash,
    ) -> Result<(ImageRecord, Fingerprint), FingerprintError> {
        let format = match Sniffed::from_bytes(&bytes[..bytes.len().min(64)]) {
            Sniffed::Image(format) => format,
            Sniffed::Empty => {
                return Err(FingerprintError::ZeroByte {
                    path: path.to_path_buf(),
                })
            }
            Sniffed::UnsupportedImage => {
                return Err(FingerprintError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
            Sniffed::Unrecognized | Sniffed::Unreadable => {
                return Err(FingerprintError::Corrupt {
                    path: path.to_path_buf(),
                    reason: "content is not a recognizable image".to_string(),
                })
            }
        };

        let image = decode_image(bytes, format).map_err(|reason| FingerprintError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })?;
        let rgb = image.to_rgb8();

        let fields = self.provenance_fields(path)?;
        let fingerprint = Fingerprint {
            structural: structural_hash(&rgb),
            histogram: histogram_hash(&rgb),
            provenance: provenance_hash(&fields),
        };

        debug!(
            "Fingerprinted {} as {} ({} provenance fields)",
            path.display(),
            fingerprint,
            fields.len()
        );

        let record = ImageRecord {
            path: path.to_path_buf(),
            format,
            size: bytes.len() as u64,
            dimensions: rgb.dimensions(),
            content_hash,
        };

        Ok((record, fingerprint))
    }

    fn provenance_fields(&self, path: &Path) -> Result<FieldMap, FingerprintError> {
        match &self.metadata {
            Some(tool) => Ok(tool.read_fields(path, PROVENANCE_FIELDS)?),
            None => Ok(FieldMap::new()),
        }
    }
}

impl fmt::Debug for FingerprintBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintBuilder")
            .field("metadata", &self.metadata.as_ref().map(|t| t.name().to_string()))
            .finish()
    }
}

fn unreadable(path: &Path, source: io::Error) -> FingerprintError {
    FingerprintError::Unreadable {
        path: path.to_path_buf(),
        source,
    }
}
