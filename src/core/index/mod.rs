//! # Duplicate Index
//!
//! First-seen-wins registry of canonical images for one run.
//!
//! ## Two keys
//! - Content hash: byte-identical files, checked before fingerprinting
//! - Fingerprint: perceptual duplicates, checked after
//!
//! The content-hash map is only a shortcut. A byte-identical file is
//! always a duplicate of whatever its twin turned out to be, and the
//! fingerprint map alone decides between perceptually different files.
//!
//! ## Concurrency
//! All state sits behind one mutex. Each call is a single check-and-insert
//! over in-memory maps; no I/O ever happens while the lock is held.

use crate::core::fingerprint::Fingerprint;
use crate::core::hasher::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// How a duplicate was recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateKind {
    /// Same bytes as the canonical file
    Exact,
    /// Same fingerprint, different bytes
    Perceptual,
}

/// Outcome of offering a file to the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Admission {
    /// The file is canonical for its key
    Admitted,
    /// An earlier file already holds the key
    DuplicateOf {
        canonical: PathBuf,
        kind: DuplicateKind,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

#[derive(Default)]
struct IndexState {
    by_content: HashMap<ContentHash, PathBuf>,
    by_fingerprint: HashMap<Fingerprint, PathBuf>,
}

/// The only state shared between workers
#[derive(Default)]
pub struct DuplicateIndex {
    state: Mutex<IndexState>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-duplicate pre-filter.
    ///
    /// Claims `content_hash` for `path` if nobody holds it yet. A file that
    /// passes here must still go through [`DuplicateIndex::admit`].
    pub fn admit_exact(&self, path: &Path, content_hash: &ContentHash) -> Admission {
        let mut state = self.lock();
        match state.by_content.get(content_hash) {
            Some(canonical) if canonical != path => Admission::DuplicateOf {
                canonical: canonical.clone(),
                kind: DuplicateKind::Exact,
            },
            Some(_) => Admission::Admitted,
            None => {
                state.by_content.insert(*content_hash, path.to_path_buf());
                Admission::Admitted
            }
        }
    }

    /// Atomic check-and-insert on the fingerprint.
    ///
    /// Exactly one caller per fingerprint ever receives
    /// [`Admission::Admitted`]; every other caller learns who won.
    pub fn admit(
        &self,
        path: &Path,
        content_hash: &ContentHash,
        fingerprint: &Fingerprint,
    ) -> Admission {
        let mut state = self.lock();
        if let Some(canonical) = state.by_fingerprint.get(fingerprint) {
            if canonical != path {
                return Admission::DuplicateOf {
                    canonical: canonical.clone(),
                    kind: DuplicateKind::Perceptual,
                };
            }
            return Admission::Admitted;
        }
        state
            .by_fingerprint
            .insert(*fingerprint, path.to_path_buf());
        state
            .by_content
            .entry(*content_hash)
            .or_insert_with(|| path.to_path_buf());
        Admission::Admitted
    }

    /// Number of canonical images admitted so far
    pub fn canonical_count(&self) -> usize {
        self.lock().by_fingerprint.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexState> {
        // A panic elsewhere cannot leave the maps half-updated: every
        // mutation is a single insert.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for DuplicateIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DuplicateIndex")
            .field("contents", &state.by_content.len())
            .field("fingerprints", &state.by_fingerprint.len())
            .finish()
    }
}
