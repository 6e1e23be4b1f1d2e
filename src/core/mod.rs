//! # Core Module
//!
//! The GUI-agnostic dedup and sanitization engine.
//!
//! ## Modules
//! - `scanner` - Discovers images among a directory's direct children
//! - `hasher` - Content hashes, file reading and pixel decoding
//! - `fingerprint` - Composite similarity signatures
//! - `index` - First-seen-wins duplicate registry
//! - `tools` - Metadata, image, optimizer and shredder adapters
//! - `scratch` - Worker-private working directories
//! - `retry` - Bounded retries and cancellation
//! - `pipeline` - Orchestrates the full workflow
//! - `verify` - Integrity checks on sanitized candidates
//! - `replace` - Atomic commit of replacements
//! - `report` - Failure report, counts and exit codes

pub mod fingerprint;
pub mod hasher;
pub mod index;
pub mod pipeline;
pub mod replace;
pub mod report;
pub mod retry;
pub mod scanner;
pub mod scratch;
pub mod tools;
pub mod verify;

// Re-export commonly used types
pub use fingerprint::{Fingerprint, FingerprintBuilder, ImageRecord};
pub use hasher::ContentHash;
pub use index::{Admission, DuplicateIndex, DuplicateKind};
pub use pipeline::{PipelineResult, SanitizeConfig, Sanitizer, SanitizerBuilder, TerminalState};
pub use report::{BatchReport, FailureEntry, FailureReport};
pub use retry::{CancellationToken, DelayPolicy, RetryPolicy};
pub use scanner::{ImageFormat, ScannedFile};
pub use tools::Toolbox;
