//! # photo-sanitize CLI
//!
//! Command-line interface for the photo sanitizer.
//!
//! ## Usage
//! ```bash
//! photo-sanitize run ~/Exports
//! photo-sanitize run ~/Exports --dry-run --verbose --output json
//! ```

mod cli;

fn main() {
    std::process::exit(cli::run());
}
