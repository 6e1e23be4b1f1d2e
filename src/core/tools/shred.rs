//! Secure deletion.

use super::command::{find_in_path, run_command};
use super::Shredder;
use crate::error::ToolError;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// GNU coreutils `shred -u`
pub struct ShredCommand {
    program: PathBuf,
    timeout: Duration,
}

impl ShredCommand {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Find `shred` on `PATH`
    pub fn locate(timeout: Duration) -> Option<Self> {
        find_in_path("shred").map(|program| Self::new(program, timeout))
    }
}

impl Shredder for ShredCommand {
    fn name(&self) -> &str {
        "shred"
    }

    fn shred(&self, path: &Path) -> Result<(), ToolError> {
        run_command(
            self.name(),
            &self.program,
            [
                OsStr::new("-u"),
                OsStr::new("-z"),
                OsStr::new("-n"),
                OsStr::new("1"),
                path.as_os_str(),
            ],
            self.timeout,
        )?;
        Ok(())
    }
}

/// Overwrite with zeros, flush to disk, then unlink
#[derive(Debug, Default)]
pub struct OverwriteShredder;

const CHUNK: usize = 64 * 1024;

impl Shredder for OverwriteShredder {
    fn name(&self) -> &str {
        "overwrite"
    }

    fn shred(&self, path: &Path) -> Result<(), ToolError> {
        let io_error = |source: std::io::Error| ToolError::Io {
            tool: "overwrite".to_string(),
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new().write(true).open(path).map_err(io_error)?;
        let len = file.metadata().map_err(io_error)?.len();
        let zeros = [0u8; CHUNK];

        file.seek(SeekFrom::Start(0)).map_err(io_error)?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(CHUNK as u64) as usize;
            file.write_all(&zeros[..n]).map_err(io_error)?;
            remaining -= n as u64;
        }
        file.sync_all().map_err(io_error)?;
        drop(file);

        fs::remove_file(path).map_err(io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn overwrite_shredder_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret.jpg");
        fs::write(&path, vec![0xAB; CHUNK * 2 + 17]).unwrap();

        OverwriteShredder.shred(&path).unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn overwrite_shredder_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = OverwriteShredder.shred(&dir.path().join("missing.jpg"));

        assert!(matches!(result, Err(ToolError::Io { .. })));
    }
}
