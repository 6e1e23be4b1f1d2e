//! # Photo Sanitizer
//!
//! Deduplicates a folder of images and strips their embedded metadata
//! without ever losing an original.
//!
//! ## Core Philosophy
//! - **Never lose a photo** - an original is destroyed only after its
//!   sanitized replacement is verified and in place
//! - **Deterministic** - the same directory always yields the same
//!   canonical files and the same names
//! - **Contain failures** - one bad file never stops the batch; every
//!   failure is reported once, at the end
//!
//! ## Architecture
//! The library is split into a core engine (GUI-agnostic) and presentation layers:
//! - `core` - The dedup and sanitization engine
//! - `events` - Event-driven progress reporting
//! - `error` - User-friendly error types
//! - `cli` - Command-line interface

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, SanitizerError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. `RUST_LOG`
/// overrides `default_filter` when set.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
