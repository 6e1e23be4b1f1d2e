//! # Scratch Module
//!
//! Worker-private working directories for intermediate files.
//!
//! A run owns one hidden [`ScratchRoot`] inside the processed directory, so
//! every working file is on the same filesystem as its destination and a
//! hard link can place it. Each file being sanitized gets its own
//! [`ScratchArea`] below that root. Both are `TempDir`s: success, failure,
//! panic and cancellation all end with the directory removed on drop.
//! A process killed outright cannot run that drop, so the next run sweeps
//! whatever such a run left behind before creating its own root.

use crate::error::SanitizerError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Name prefix of the run's scratch directory; the leading dot keeps it out of scans
pub const SCRATCH_PREFIX: &str = ".scrub-";

/// The run-wide scratch directory
#[derive(Debug)]
pub struct ScratchRoot {
    dir: TempDir,
}

impl ScratchRoot {
    /// Create a fresh hidden directory inside `root`, after removing any
    /// left by an earlier run that never got to clean up
    pub fn create_in(root: &Path) -> Result<Self, SanitizerError> {
        sweep_stale(root);
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)
            .map_err(|source| SanitizerError::Scratch {
                path: root.to_path_buf(),
                source,
            })?;
        debug!("Scratch root at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A new private area for one file
    pub fn area(&self) -> io::Result<ScratchArea> {
        let dir = tempfile::Builder::new()
            .prefix("file-")
            .tempdir_in(self.dir.path())?;
        Ok(ScratchArea { dir, next: 0 })
    }
}

/// Remove scratch directories directly under `root`; returns how many went.
///
/// Only real directories carrying [`SCRATCH_PREFIX`] are touched, never a
/// symlink or a file with that name.
pub fn sweep_stale(root: &Path) -> usize {
    let Ok(entries) = fs::read_dir(root) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }
        let path = entry.path();
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            _ => continue,
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                warn!("Removed stale scratch directory {}", path.display());
                removed += 1;
            }
            Err(e) => warn!(
                "Could not remove stale scratch directory {}: {}",
                path.display(),
                e
            ),
        }
    }
    removed
}

/// One file's working directory
#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
    next: u32,
}

impl ScratchArea {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A path nothing has been written to yet, e.g. `02-reencode.jpg`
    pub fn next_path(&mut self, label: &str, extension: &str) -> PathBuf {
        self.next += 1;
        self.dir
            .path()
            .join(format!("{:02}-{}.{}", self.next, label, extension))
    }
}

/// Fail the run up front when the scratch filesystem is nearly full.
///
/// Each worker holds one file's working copies at a time, bounded by
/// `factor` times that file's size, so the run needs at most `workers`
/// times `factor` times the largest input. When the disk holding `root`
/// cannot be identified the check is skipped.
pub fn ensure_free_space(
    root: &Path,
    largest_file: u64,
    factor: f64,
    workers: usize,
) -> Result<(), SanitizerError> {
    let required = required_space(largest_file, factor, workers);
    match available_space(root) {
        Some(available) => check_free_space(root, available, required),
        None => {
            warn!(
                "Could not determine free space for {}; skipping the check",
                root.display()
            );
            Ok(())
        }
    }
}

fn required_space(largest_file: u64, factor: f64, workers: usize) -> u64 {
    let per_worker = (largest_file as f64 * factor.max(1.0)).ceil() as u64;
    per_worker.saturating_mul(workers.max(1) as u64)
}

fn check_free_space(root: &Path, available: u64, required: u64) -> Result<(), SanitizerError> {
    if available < required {
        return Err(SanitizerError::InsufficientSpace {
            path: root.to_path_buf(),
            available,
            required,
        });
    }
    debug!(
        "{} bytes free for scratch, {} required",
        available, required
    );
    Ok(())
}

/// Free bytes on the disk whose mount point is the longest prefix of `root`
fn available_space(root: &Path) -> Option<u64> {
    let root = root.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| root.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scratch_root_is_hidden_and_removed_on_drop() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchRoot::create_in(temp.path()).unwrap();
        let path = scratch.path().to_path_buf();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(SCRATCH_PREFIX));
        assert!(path.is_dir());

        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn areas_are_private_and_cleaned_up() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchRoot::create_in(temp.path()).unwrap();

        let mut a = scratch.area().unwrap();
        let b = scratch.area().unwrap();
        assert_ne!(a.path(), b.path());

        let working = a.next_path("strip", "jpg");
        fs::write(&working, b"x").unwrap();
        let area_path = a.path().to_path_buf();

        drop(a);
        assert!(!area_path.exists());
        assert!(b.path().exists());
    }

    #[test]
    fn next_path_never_repeats() {
        let temp = TempDir::new().unwrap();
        let scratch = ScratchRoot::create_in(temp.path()).unwrap();
        let mut area = scratch.area().unwrap();

        let first = area.next_path("optimize", "png");
        let second = area.next_path("optimize", "png");

        assert_ne!(first, second);
        assert!(first.file_name().unwrap().to_string_lossy().starts_with("01-optimize"));
    }

    #[test]
    fn missing_root_is_a_scratch_error() {
        let temp = TempDir::new().unwrap();
        let error = ScratchRoot::create_in(&temp.path().join("missing")).unwrap_err();
        assert!(matches!(error, SanitizerError::Scratch { .. }));
    }

    #[test]
    fn too_little_space_is_fatal() {
        let error = check_free_space(Path::new("/photos"), 10, required_space(100, 2.0, 1)).unwrap_err();
        match error {
            SanitizerError::InsufficientSpace {
                available,
                required,
                ..
            } => {
                assert_eq!(available, 10);
                assert_eq!(required, 200);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn every_worker_needs_room() {
        assert_eq!(required_space(100, 2.0, 4), 800);
        assert!(check_free_space(Path::new("/photos"), 500, required_space(100, 2.0, 4)).is_err());
    }

    #[test]
    fn stale_scratch_is_swept_on_create() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join(".scrub-x").join("file-y");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("01-strip.jpg"), b"leftover").unwrap();
        fs::write(temp.path().join(".scrub-note"), b"not a directory").unwrap();

        let scratch = ScratchRoot::create_in(temp.path()).unwrap();

        assert!(!temp.path().join(".scrub-x").exists());
        assert!(temp.path().join(".scrub-note").is_file());
        assert!(scratch.path().is_dir());
    }

    #[test]
    fn sweep_ignores_other_entries() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("album")).unwrap();
        fs::create_dir(temp.path().join(".scrub-old")).unwrap();

        assert_eq!(sweep_stale(temp.path()), 1);
        assert!(temp.path().join("album").is_dir());
    }

    #[test]
    fn enough_space_passes() {
        assert!(check_free_space(Path::new("/photos"), 500, required_space(100, 2.0, 1)).is_ok());
    }
}
