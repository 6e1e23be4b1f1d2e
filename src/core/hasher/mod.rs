//! # Hasher Module
//!
//! Byte-level hashing and pixel decoding shared by the fingerprint
//! builder, the duplicate index and the integrity verifier.
//!
//! ## Content hash
//! BLAKE3 over the raw file bytes. Two files with equal content hashes are
//! byte-identical for every practical purpose, which is what lets exact
//! duplicates skip fingerprinting entirely.
//!
//! ## Performance Optimizations
//! - Files over 1MB are memory-mapped instead of copied into the heap
//! - JPEGs decode through `zune-jpeg`, everything else through `image`

mod content;
mod decode;
mod file_bytes;

pub use content::ContentHash;
pub use decode::decode_image;
pub use file_bytes::{read_file_bytes, FileBytes};
