//! Event type definitions for progress reporting.

use crate::core::pipeline::{PipelineResult, StageKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the sanitizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Directory scan events
    Scan(ScanEvent),
    /// Per-file events
    File(FileEvent),
    /// Run-level events
    Pipeline(PipelineEvent),
}

/// Events during the scanning phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Scanning has started
    Started { root: PathBuf },
    /// A candidate image was found
    FileFound { path: PathBuf },
    /// A directory entry was ignored
    Skipped { path: PathBuf, reason: String },
    /// Scanning completed
    Completed { total_files: usize },
}

/// Events about a single file moving through the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FileEvent {
    /// Content hash computed
    Hashed { path: PathBuf },
    /// Similarity fingerprint computed
    Fingerprinted { path: PathBuf },
    /// File became the canonical copy of its content
    Admitted { path: PathBuf },
    /// File was classified as a duplicate
    Duplicate { path: PathBuf, canonical: PathBuf },
    /// A sanitization stage started
    StageStarted { path: PathBuf, stage: StageKind },
    /// An operation failed and will be attempted again
    Retrying {
        path: PathBuf,
        operation: String,
        attempt: u32,
        message: String,
    },
    /// The file reached a terminal state
    Finished(PipelineResult),
}

/// Run-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Run has started
    Started,
    /// Moving to a new phase
    PhaseChanged { phase: PipelinePhase, total: usize },
    /// Run completed
    Completed { summary: PipelineSummary },
    /// Run was cancelled
    Cancelled,
    /// Run hit a fatal error
    Error { message: String },
}

/// Phases of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    Scanning,
    Hashing,
    Fingerprinting,
    Deduplicating,
    Sanitizing,
}

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Image files discovered
    pub total_files: usize,
    /// Files replaced by a sanitized copy
    pub committed: usize,
    /// Files that were already sanitized by an earlier run
    pub already_sanitized: usize,
    /// Files removed as duplicates
    pub duplicates: usize,
    /// Files left untouched because of an error
    pub failed: usize,
    /// Bytes reclaimed by deduplication and optimization
    pub bytes_saved: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Scanning => write!(f, "Scanning"),
            PipelinePhase::Hashing => write!(f, "Hashing"),
            PipelinePhase::Fingerprinting => write!(f, "Fingerprinting"),
            PipelinePhase::Deduplicating => write!(f, "Deduplicating"),
            PipelinePhase::Sanitizing => write!(f, "Sanitizing"),
        }
    }
}
