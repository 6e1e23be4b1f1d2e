//! Memory-mapped file I/O for hashing and decoding.
//!
//! Uses OS-level memory mapping to avoid the kernel copy when reading
//! large images.

use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Minimum file size to use memory-mapped I/O (1MB)
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Read file bytes, memory-mapping files of 1MB or more.
pub fn read_file_bytes(path: &Path) -> io::Result<FileBytes> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    if len >= MMAP_THRESHOLD {
        // SAFETY: the map is read-only and owns its file handle. Files under
        // a worker are not modified by anyone else for the duration of a run.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(FileBytes::Mmap(mmap))
    } else {
        Ok(FileBytes::Vec(std::fs::read(path)?))
    }
}

/// File bytes that may be either owned or memory-mapped.
pub enum FileBytes {
    /// Standard heap-allocated bytes
    Vec(Vec<u8>),
    /// Memory-mapped bytes (zero-copy from disk)
    Mmap(Mmap),
}

impl AsRef<[u8]> for FileBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileBytes::Vec(v) => v,
            FileBytes::Mmap(m) => m,
        }
    }
}

impl std::ops::Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn small_files_are_read_into_memory() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"small").unwrap();

        let bytes = read_file_bytes(file.path()).unwrap();

        assert!(matches!(bytes, FileBytes::Vec(_)));
        assert_eq!(&*bytes, b"small");
    }

    #[test]
    fn large_files_are_mapped() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; MMAP_THRESHOLD as usize + 1]).unwrap();

        let bytes = read_file_bytes(file.path()).unwrap();

        assert!(matches!(bytes, FileBytes::Mmap(_)));
        assert_eq!(bytes.len(), MMAP_THRESHOLD as usize + 1);
    }
}
