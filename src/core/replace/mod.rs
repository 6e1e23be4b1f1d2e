//! # Atomic Replacer
//!
//! Commits a verified candidate and only then destroys the original.
//!
//! ## Protocol
//! 1. **Place** - hard-link the candidate to its content-derived name. The
//!    link fails if the name exists, so nothing is ever overwritten. Retryable.
//! 2. **Check** - the placed file must have the candidate's size.
//! 3. **Destroy** - shred the original, falling back to unlink. Never retried.
//!
//! At every point the directory holds the original, the replacement, or
//! both. A failure before step 3 leaves the original untouched.

mod naming;

pub use naming::{committed_path, is_already_sanitized, split_token};

use crate::core::tools::Shredder;
use crate::error::ReplaceError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Places replacements and destroys originals
#[derive(Clone)]
pub struct AtomicReplacer {
    shredder: Arc<dyn Shredder>,
}

impl AtomicReplacer {
    pub fn new(shredder: Arc<dyn Shredder>) -> Self {
        Self { shredder }
    }

    /// Put `candidate` at `destination` without ever replacing an existing file.
    ///
    /// On error nothing is left at `destination`.
    pub fn place(&self, candidate: &Path, destination: &Path) -> Result<(), ReplaceError> {
        if fs::symlink_metadata(destination).is_ok() {
            return Err(ReplaceError::Collision {
                path: destination.to_path_buf(),
            });
        }

        match fs::hard_link(candidate, destination) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ReplaceError::Collision {
                    path: destination.to_path_buf(),
                })
            }
            Err(e) => {
                debug!(
                    "Hard link to {} failed ({}); copying instead",
                    destination.display(),
                    e
                );
                copy_new(candidate, destination).map_err(|source| {
                    if source.kind() == ErrorKind::AlreadyExists {
                        ReplaceError::Collision {
                            path: destination.to_path_buf(),
                        }
                    } else {
                        ReplaceError::Place {
                            path: destination.to_path_buf(),
                            source,
                        }
                    }
                })?;
            }
        }

        let expected = file_len(candidate);
        let placed = file_len(destination);
        if expected.is_none() || expected != placed {
            let _ = fs::remove_file(destination);
            return Err(ReplaceError::PlacedMismatch {
                path: destination.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Destroy `original` now that `replacement` is in place.
    ///
    /// Runs once. If both shredding and unlinking fail, the replacement stays
    /// and the error says both files exist.
    pub fn destroy_original(&self, original: &Path, replacement: &Path) -> Result<(), ReplaceError> {
        match self.shredder.shred(original) {
            Ok(()) if !original.exists() => return Ok(()),
            Ok(()) => warn!(
                "{} reported success but {} still exists",
                self.shredder.name(),
                original.display()
            ),
            Err(e) => warn!(
                "Secure deletion of {} failed ({}); unlinking",
                original.display(),
                e
            ),
        }

        match fs::remove_file(original) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ReplaceError::OriginalNotRemoved {
                original: original.to_path_buf(),
                replacement: replacement.to_path_buf(),
                source,
            }),
        }
    }

    /// Remove a file classified as a duplicate
    pub fn discard_duplicate(&self, path: &Path) -> Result<(), ReplaceError> {
        self.destroy_original(path, path)
    }
}

impl std::fmt::Debug for AtomicReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicReplacer")
            .field("shredder", &self.shredder.name())
            .finish()
    }
}

fn file_len(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}

/// Copy into a file that must not exist yet, removing it again on failure
fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut output = OpenOptions::new().write(true).create_new(true).open(to)?;
    let result = File::open(from)
        .and_then(|mut input| io::copy(&mut input, &mut output))
        .and_then(|_| output.sync_all());
    if result.is_err() {
        drop(output);
        let _ = fs::remove_file(to);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tools::OverwriteShredder;
    use crate::error::{Classify, FailureReason, ToolError};
    use tempfile::TempDir;

    struct BrokenShredder;

    impl Shredder for BrokenShredder {
        fn name(&self) -> &str {
            "broken"
        }

        fn shred(&self, path: &Path) -> Result<(), ToolError> {
            Err(ToolError::Failed {
                tool: "broken".to_string(),
                status: 1,
                stderr: format!("cannot shred {}", path.display()),
            })
        }
    }

    fn replacer() -> AtomicReplacer {
        AtomicReplacer::new(Arc::new(OverwriteShredder))
    }

    #[test]
    fn place_links_candidate_to_destination() {
        let temp = TempDir::new().unwrap();
        let candidate = temp.path().join("candidate.jpg");
        let destination = temp.path().join("a.0123456789abcdef.jpg");
        fs::write(&candidate, b"clean bytes").unwrap();

        replacer().place(&candidate, &destination).unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"clean bytes");
    }

    #[test]
    fn existing_destination_is_never_overwritten() {
        let temp = TempDir::new().unwrap();
        let candidate = temp.path().join("candidate.jpg");
        let destination = temp.path().join("taken.jpg");
        fs::write(&candidate, b"new").unwrap();
        fs::write(&destination, b"someone else's output").unwrap();

        let error = replacer().place(&candidate, &destination).unwrap_err();

        assert_eq!(error.reason(), FailureReason::NameCollision);
        assert_eq!(fs::read(&destination).unwrap(), b"someone else's output");
    }

    #[test]
    fn missing_candidate_fails_to_place() {
        let temp = TempDir::new().unwrap();
        let error = replacer()
            .place(&temp.path().join("gone.jpg"), &temp.path().join("dest.jpg"))
            .unwrap_err();

        assert_eq!(error.reason(), FailureReason::Io);
        assert!(!temp.path().join("dest.jpg").exists());
    }

    #[test]
    fn original_is_destroyed_after_placement() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.jpg");
        let replacement = temp.path().join("a.0123456789abcdef.jpg");
        fs::write(&original, b"with gps").unwrap();
        fs::write(&replacement, b"clean").unwrap();

        replacer().destroy_original(&original, &replacement).unwrap();

        assert!(!original.exists());
        assert!(replacement.exists());
    }

    #[test]
    fn failed_shred_falls_back_to_unlink() {
        let temp = TempDir::new().unwrap();
        let original = temp.path().join("a.jpg");
        fs::write(&original, b"with gps").unwrap();

        AtomicReplacer::new(Arc::new(BrokenShredder))
            .discard_duplicate(&original)
            .unwrap();

        assert!(!original.exists());
    }
}
