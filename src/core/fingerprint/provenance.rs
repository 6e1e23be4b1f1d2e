//! Provenance component: who captured the picture, and when.

use crate::core::tools::FieldMap;
use xxhash_rust::xxh3::xxh3_64;

/// Capture fields that identify a shot independently of its encoding
pub const PROVENANCE_FIELDS: &[&str] = &["Make", "Model", "DateTimeOriginal", "LensModel"];

/// Canonical `key=value` lines for whitelisted fields, sorted by key.
///
/// Key order and surrounding whitespace never affect the result; an image
/// with none of the fields canonicalizes to the empty string.
pub fn canonical_provenance(fields: &FieldMap) -> String {
    let mut lines: Vec<String> = fields
        .iter()
        .filter(|(key, _)| PROVENANCE_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Hash of [`canonical_provenance`]
pub fn provenance_hash(fields: &FieldMap) -> u64 {
    xxh3_64(canonical_provenance(fields).as_bytes())
}
