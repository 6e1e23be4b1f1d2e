//! # Pipeline Module
//!
//! Orchestrates a full run over one directory.
//!
//! ## Phases
//! 1. **Scan** - direct children, sniffed, sorted by path
//! 2. **Hash** - BLAKE3 of every image, in parallel
//! 3. **Exact dedup** - byte-identical files resolved in path order
//! 4. **Fingerprint** - remaining files, in parallel
//! 5. **Perceptual dedup** - fingerprints admitted in path order
//! 6. **Sanitize** - Strip, Re-encode, Optimize, verify, commit; one file
//!    per worker, each in its own scratch area
//!
//! Admission is sequential so the canonical file of every duplicate set is
//! the lexicographically first one, however the parallel phases interleave.
//!
//! ## Terminal states
//! Every discovered file ends in exactly one [`TerminalState`]. A `failed`
//! file is always left byte-for-byte as it was found.

mod config;
mod executor;
mod stages;

pub use config::{SanitizeConfig, SanitizerBuilder};
pub use executor::Sanitizer;
pub use stages::{SanitizedCandidate, StageRunner};

use crate::core::index::DuplicateKind;
use crate::core::report::FailureEntry;
use crate::error::FailureReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The three sanitization stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Strip,
    Reencode,
    Optimize,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Strip => "strip",
            StageKind::Reencode => "re-encode",
            StageKind::Optimize => "optimize",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StageStatus {
    /// The stage produced the working file passed on
    Done { tool: String, attempts: u32 },
    /// The stage ran nothing, or nothing it produced was kept
    Skipped { reason: String },
    /// The stage gave up; no later stage ran
    Failed { reason: FailureReason, attempts: u32 },
}

/// Status of one stage for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageKind,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// How a file left the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalState {
    /// A verified sanitized copy replaced the original
    Committed,
    /// The file is the output of an earlier run and was left alone
    AlreadySanitized,
    /// The file duplicated a canonical file and was removed
    SkippedDuplicate,
    /// Something went wrong; the original is untouched
    Failed,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminalState::Committed => "committed",
            TerminalState::AlreadySanitized => "already-sanitized",
            TerminalState::SkippedDuplicate => "skipped-duplicate",
            TerminalState::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Per-file outcome, streamed to observers and kept in the batch report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The file as discovered
    pub input: PathBuf,
    pub state: TerminalState,
    /// Last working copy produced in scratch, gone once the file finishes
    pub working_path: Option<PathBuf>,
    /// Where the verified replacement lives (or would, on a dry run)
    pub final_path: Option<PathBuf>,
    pub stages: Vec<StageReport>,
    /// Attempts beyond the first, summed over every retried operation
    pub retries: u32,
    /// The canonical file, for duplicates
    pub duplicate_of: Option<PathBuf>,
    pub duplicate_kind: Option<DuplicateKind>,
    pub bytes_before: u64,
    pub bytes_after: u64,
    /// Present exactly when `state` is `failed`
    pub failure: Option<FailureEntry>,
}

impl PipelineResult {
    fn new(input: PathBuf, state: TerminalState, bytes_before: u64) -> Self {
        Self {
            input,
            state,
            working_path: None,
            final_path: None,
            stages: Vec::new(),
            retries: 0,
            duplicate_of: None,
            duplicate_kind: None,
            bytes_before,
            bytes_after: bytes_before,
            failure: None,
        }
    }

    /// A file left untouched because of `failure`
    pub fn failed(
        input: PathBuf,
        stages: Vec<StageReport>,
        retries: u32,
        failure: FailureEntry,
    ) -> Self {
        Self {
            stages,
            retries,
            failure: Some(failure),
            ..Self::new(input, TerminalState::Failed, 0)
        }
    }

    /// A file removed in favour of `canonical`
    pub fn duplicate(input: PathBuf, canonical: PathBuf, kind: DuplicateKind, size: u64) -> Self {
        Self {
            duplicate_of: Some(canonical),
            duplicate_kind: Some(kind),
            bytes_after: 0,
            ..Self::new(input, TerminalState::SkippedDuplicate, size)
        }
    }

    /// A file an earlier run already produced
    pub fn already_sanitized(input: PathBuf, size: u64) -> Self {
        Self {
            final_path: Some(input.clone()),
            ..Self::new(input, TerminalState::AlreadySanitized, size)
        }
    }

    /// Bytes this file no longer occupies
    pub fn bytes_saved(&self) -> u64 {
        match self.state {
            TerminalState::Failed => 0,
            _ => self.bytes_before.saturating_sub(self.bytes_after),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_use_kebab_case() {
        assert_eq!(TerminalState::SkippedDuplicate.to_string(), "skipped-duplicate");
        assert_eq!(
            serde_json::to_string(&TerminalState::AlreadySanitized).unwrap(),
            "\"already-sanitized\""
        );
    }

    #[test]
    fn stage_report_flattens_status() {
        let report = StageReport {
            stage: StageKind::Reencode,
            status: StageStatus::Done {
                tool: "native".to_string(),
                attempts: 2,
            },
        };
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["stage"], "reencode");
        assert_eq!(json["status"], "done");
        assert_eq!(json["attempts"], 2);
    }

    #[test]
    fn duplicates_save_their_whole_size() {
        let result = PipelineResult::duplicate(
            PathBuf::from("/p/b.jpg"),
            PathBuf::from("/p/a.jpg"),
            DuplicateKind::Exact,
            1200,
        );
        assert_eq!(result.bytes_saved(), 1200);
    }

    #[test]
    fn failed_files_save_nothing() {
        let result = PipelineResult::failed(
            PathBuf::from("/p/d.jpg"),
            Vec::new(),
            2,
            FailureEntry {
                path: PathBuf::from("/p/d.jpg"),
                reason: FailureReason::ZeroByte,
                attempts: 1,
                detail: String::new(),
            },
        );
        assert_eq!(result.bytes_saved(), 0);
        assert_eq!(result.state, TerminalState::Failed);
    }
}
