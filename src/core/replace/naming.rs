//! Content-derived names for committed files.
//!
//! A committed file is called `<stem>.<token>.<ext>`, where the token is the
//! first 16 hex digits of the BLAKE3 hash of the committed bytes. The name
//! can never collide with another in-flight file, and a file whose name
//! already carries its own token is recognisably finished.

use crate::core::hasher::ContentHash;
use crate::core::scanner::ImageFormat;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.+)\.([0-9a-f]{16})$").expect("token pattern is valid"))
}

/// Split `stem` into the base name and a trailing content token, if any
pub fn split_token(stem: &str) -> (&str, Option<&str>) {
    match token_pattern().captures(stem) {
        Some(caps) => match (caps.get(1), caps.get(2)) {
            (Some(base), Some(token)) => (base.as_str(), Some(token.as_str())),
            _ => (stem, None),
        },
        None => (stem, None),
    }
}

/// Where the sanitized version of `original` goes, given its new content
pub fn committed_path(original: &Path, content: &ContentHash, format: ImageFormat) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (base, _) = split_token(&stem);
    let extension = original
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| format.extension().to_string());

    let name = format!("{}.{}.{}", base, content.short_token(), extension);
    match original.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Whether `path` is already named after `content`
pub fn is_already_sanitized(path: &Path, content: &ContentHash) -> bool {
    let Some(stem) = path.file_stem().map(|s| s.to_string_lossy()) else {
        return false;
    };
    matches!(split_token(&stem), (_, Some(token)) if token == content.short_token())
}
