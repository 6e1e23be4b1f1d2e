//! Shared fixtures for integration tests.

#![allow(dead_code)]

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use photo_sanitizer::core::pipeline::{Sanitizer, SanitizerBuilder};
use photo_sanitizer::core::retry::RetryPolicy;
use photo_sanitizer::core::tools::Toolbox;
use std::fs;
use std::path::{Path, PathBuf};

/// Four flat grey quadrants
pub fn quadrants() -> RgbImage {
    RgbImage::from_fn(128, 128, |x, y| {
        let level = match (x < 64, y < 64) {
            (true, true) => 32,
            (false, true) => 96,
            (true, false) => 160,
            (false, false) => 224,
        };
        Rgb([level, level, level])
    })
}

/// A picture that fingerprints differently from [`quadrants`]
pub fn stripes() -> RgbImage {
    RgbImage::from_fn(128, 128, |x, _| {
        if (x / 16) % 2 == 0 {
            Rgb([224, 32, 32])
        } else {
            Rgb([32, 32, 224])
        }
    })
}

/// Two-axis colour gradient with seeded grain, like a softly lit photo
pub fn photo_like(seed: u32) -> RgbImage {
    RgbImage::from_fn(320, 240, |x, y| {
        let grain =
            x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663) ^ seed.wrapping_mul(83_492_791);
        let grain = (grain.wrapping_mul(2_654_435_761) >> 24) as i32 % 13 - 6;
        let channel = |base: i32| (base + grain).clamp(0, 255) as u8;
        Rgb([
            channel((x * 255 / 319) as i32),
            channel((y * 255 / 239) as i32),
            channel(100 + grain),
        ])
    })
}

pub fn jpeg_bytes(image: &RgbImage, quality: u8) -> Vec<u8> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .unwrap();
    bytes
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Insert an APP1 Exif segment and a comment right after SOI
pub fn with_private_metadata(jpeg: &[u8], secret: &str) -> Vec<u8> {
    let mut exif = b"Exif\0\0".to_vec();
    exif.extend_from_slice(secret.as_bytes());
    let mut comment = b"owner: ".to_vec();
    comment.extend_from_slice(secret.as_bytes());

    let mut out = jpeg[..2].to_vec();
    for (marker, payload) in [(0xE1u8, &exif), (0xFEu8, &comment)] {
        let len = (payload.len() + 2) as u16;
        out.extend_from_slice(&[0xFF, marker]);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(payload);
    }
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Sanitizer over `root` with only in-process tools and no retry delay
pub fn builder(root: &Path) -> SanitizerBuilder {
    Sanitizer::builder()
        .root(root)
        .workers(2)
        .retry(RetryPolicy::immediate(3))
        .toolbox(Toolbox::native())
}

/// Visible file names directly inside `root`, sorted
pub fn listing(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Every entry directly inside `root`, hidden ones included
pub fn all_entries(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    paths.sort();
    paths
}
