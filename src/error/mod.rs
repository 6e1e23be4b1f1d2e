//! # Error Module
//!
//! Error types for the photo sanitizer.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, tool names, what went wrong
//! - **Classify** - every per-file error maps to a stable [`FailureReason`]
//!   and knows whether another attempt could succeed

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors that abort the whole run
#[derive(Error, Debug)]
pub enum SanitizerError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Missing required tool capability: {capability}. Install {hint} and try again.")]
    MissingTool {
        capability: &'static str,
        hint: &'static str,
    },

    #[error(
        "Not enough free space for scratch files in {path}: {available} bytes available, {required} required"
    )]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("Failed to create scratch area in {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run was cancelled")]
    Cancelled,
}

/// Errors that occur while discovering files
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by external (or in-process) tool invocations
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{tool} is not installed")]
    NotInstalled { tool: String },

    #[error("{tool} timed out after {}s", timeout.as_secs())]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} exited with status {status}: {stderr}")]
    Failed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("{tool} produced no output file at {path}")]
    NoOutput { tool: String, path: PathBuf },

    #[error("{tool} does not support {format}")]
    Unsupported { tool: String, format: String },

    #[error("{tool} could not decode {path}: {reason}")]
    Decode {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    #[error("{tool} I/O error on {path}: {source}")]
    Io {
        tool: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while building a fingerprint
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File is empty: {path}")]
    ZeroByte { path: PathBuf },

    #[error("Unsupported image format in {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Image is corrupted: {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Metadata read failed: {0}")]
    Metadata(#[from] ToolError),
}

/// A sanitization stage failure
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} stage failed: {source}")]
    Tool {
        stage: &'static str,
        #[source]
        source: ToolError,
    },

    #[error("{stage} stage: every tool failed (last error: {last})")]
    Exhausted {
        stage: &'static str,
        #[source]
        last: ToolError,
    },

    #[error("{stage} stage cancelled")]
    Cancelled { stage: &'static str },
}

/// Integrity verification rejections
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Candidate is empty: {path}")]
    ZeroByte { path: PathBuf },

    #[error("Candidate is unreadable: {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Dimensions changed from {expected:?} to {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Format changed from {expected} to {actual}")]
    FormatMismatch { expected: String, actual: String },
}

/// Atomic replacement failures
#[derive(Error, Debug)]
pub enum ReplaceError {
    #[error("Destination already exists: {path}")]
    Collision { path: PathBuf },

    #[error("Failed to place {path}: {source}")]
    Place {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Placed file {path} does not match the verified candidate")]
    PlacedMismatch { path: PathBuf },

    #[error("Replacement committed at {replacement} but original {original} could not be removed: {source}")]
    OriginalNotRemoved {
        original: PathBuf,
        replacement: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stable, user-facing reason attached to each failed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Unreadable,
    UnsupportedFormat,
    Corrupt,
    ZeroByte,
    DimensionMismatch,
    FormatMismatch,
    Timeout,
    ToolFailed,
    NameCollision,
    Cancelled,
    Io,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::Unreadable => "unreadable",
            FailureReason::UnsupportedFormat => "unsupported-format",
            FailureReason::Corrupt => "corrupt",
            FailureReason::ZeroByte => "zero-byte",
            FailureReason::DimensionMismatch => "dimension-mismatch",
            FailureReason::FormatMismatch => "format-mismatch",
            FailureReason::Timeout => "timeout",
            FailureReason::ToolFailed => "tool-failed",
            FailureReason::NameCollision => "name-collision",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Io => "io",
        };
        f.write_str(text)
    }
}

/// Classification shared by every per-file error.
///
/// The retry combinator only re-attempts errors that report themselves as
/// transient; deterministic content problems fail on the first attempt.
pub trait Classify {
    /// The stable reason recorded in the failure report
    fn reason(&self) -> FailureReason;

    /// Whether another attempt could plausibly succeed
    fn is_transient(&self) -> bool;
}

impl Classify for ToolError {
    fn reason(&self) -> FailureReason {
        match self {
            ToolError::Timeout { .. } => FailureReason::Timeout,
            ToolError::Decode { .. } => FailureReason::Corrupt,
            ToolError::Unsupported { .. } => FailureReason::UnsupportedFormat,
            ToolError::Io { .. } => FailureReason::Io,
            ToolError::NotInstalled { .. }
            | ToolError::Failed { .. }
            | ToolError::NoOutput { .. } => FailureReason::ToolFailed,
        }
    }

    fn is_transient(&self) -> bool {
        !matches!(
            self,
            ToolError::NotInstalled { .. } | ToolError::Unsupported { .. }
        )
    }
}

impl Classify for FingerprintError {
    fn reason(&self) -> FailureReason {
        match self {
            FingerprintError::Unreadable { .. } => FailureReason::Unreadable,
            FingerprintError::ZeroByte { .. } => FailureReason::ZeroByte,
            FingerprintError::UnsupportedFormat { .. } => FailureReason::UnsupportedFormat,
            FingerprintError::Corrupt { .. } => FailureReason::Corrupt,
            FingerprintError::Metadata(e) => e.reason(),
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            FingerprintError::Unreadable { .. } => true,
            FingerprintError::Metadata(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl Classify for StageError {
    fn reason(&self) -> FailureReason {
        match self {
            StageError::Tool { source, .. } => source.reason(),
            StageError::Exhausted { last, .. } => last.reason(),
            StageError::Cancelled { .. } => FailureReason::Cancelled,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            StageError::Tool { source, .. } => source.is_transient(),
            StageError::Exhausted { last, .. } => last.is_transient(),
            StageError::Cancelled { .. } => false,
        }
    }
}

impl Classify for VerifyError {
    fn reason(&self) -> FailureReason {
        match self {
            VerifyError::ZeroByte { .. } => FailureReason::ZeroByte,
            VerifyError::Unreadable { .. } => FailureReason::Unreadable,
            VerifyError::DimensionMismatch { .. } => FailureReason::DimensionMismatch,
            VerifyError::FormatMismatch { .. } => FailureReason::FormatMismatch,
        }
    }

    fn is_transient(&self) -> bool {
        false
    }
}

impl Classify for ReplaceError {
    fn reason(&self) -> FailureReason {
        match self {
            ReplaceError::Collision { .. } => FailureReason::NameCollision,
            ReplaceError::Place { .. }
            | ReplaceError::PlacedMismatch { .. }
            | ReplaceError::OriginalNotRemoved { .. } => FailureReason::Io,
        }
    }

    fn is_transient(&self) -> bool {
        matches!(self, ReplaceError::Place { .. })
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, SanitizerError>;
