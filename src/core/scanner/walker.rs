//! Directory listing using walkdir.

use super::sniff::{has_image_extension, sniff_file, Sniffed};
use super::ScannedFile;
use crate::error::ScanError;
use crate::events::{null_sender, Event, EventSender, ScanEvent};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Configuration for the directory scanner
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to include hidden files
    pub include_hidden: bool,
}

/// Lists the direct children of a directory, never descending.
pub struct DirectoryScanner {
    config: ScanConfig,
}

impl DirectoryScanner {
    /// Create a new scanner with the given configuration
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Scan without progress reporting
    pub fn scan(&self, root: &Path) -> Result<Vec<ScannedFile>, ScanError> {
        self.scan_with_events(root, &null_sender())
    }

    /// Scan a directory, returning candidates sorted by path.
    ///
    /// An invalid or unreadable root is an error; problems with individual
    /// entries are not, they surface later as per-file failures.
    pub fn scan_with_events(
        &self,
        root: &Path,
        events: &EventSender,
    ) -> Result<Vec<ScannedFile>, ScanError> {
        if !root.exists() {
            return Err(ScanError::DirectoryNotFound {
                path: root.to_path_buf(),
            });
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        // Fail fast on an unreadable root rather than reporting an empty scan
        std::fs::read_dir(root).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ScanError::PermissionDenied {
                    path: root.to_path_buf(),
                }
            } else {
                ScanError::ReadDirectory {
                    path: root.to_path_buf(),
                    source: e,
                }
            }
        })?;

        events.send(Event::Scan(ScanEvent::Started {
            root: root.to_path_buf(),
        }));

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        let mut files = Vec::new();

        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.to_path_buf()).unwrap_or_default();
                    warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    events.send(Event::Scan(ScanEvent::Skipped {
                        path,
                        reason: e.to_string(),
                    }));
                    continue;
                }
            };

            // Directories (including scratch areas) and symlinks are never touched
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !self.config.include_hidden && is_hidden(path) {
                continue;
            }

            let sniffed = sniff_file(path).unwrap_or(Sniffed::Unreadable);
            let keep = match sniffed {
                Sniffed::Image(_) | Sniffed::UnsupportedImage => true,
                Sniffed::Empty | Sniffed::Unrecognized | Sniffed::Unreadable => {
                    has_image_extension(path)
                }
            };

            if !keep {
                debug!(path = %path.display(), "Not an image, ignoring");
                events.send(Event::Scan(ScanEvent::Skipped {
                    path: path.to_path_buf(),
                    reason: "not an image".to_string(),
                }));
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

            events.send(Event::Scan(ScanEvent::FileFound {
                path: path.to_path_buf(),
            }));

            files.push(ScannedFile {
                path: path.to_path_buf(),
                size,
                sniffed,
            });
        }

        // sort_by_file_name already orders siblings; sort again on the full
        // path so the guarantee does not depend on walkdir internals
        files.sort_by(|a, b| a.path.cmp(&b.path));

        events.send(Event::Scan(ScanEvent::Completed {
            total_files: files.len(),
        }));

        Ok(files)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
