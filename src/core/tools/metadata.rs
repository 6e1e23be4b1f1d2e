//! Metadata readers and strippers.
//!
//! `ExifTool` is the primary external tool and `Exiv2` the secondary.
//! `NativeMetadata` reads EXIF with kamadak-exif and strips by dropping
//! metadata-bearing JPEG segments and PNG chunks, so a run still works on a
//! machine with neither tool installed.

use super::command::{find_in_path, run_command};
use super::image_tool::reencode_pixels;
use super::{FieldMap, MetadataTool};
use crate::core::scanner::ImageFormat;
use crate::error::ToolError;
use exif::{In, Reader, Tag, Value};
use std::ffi::OsStr;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ExifTool, the primary metadata tool
pub struct ExifTool {
    program: PathBuf,
    timeout: Duration,
}

impl ExifTool {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Find `exiftool` on `PATH`
    pub fn locate(timeout: Duration) -> Option<Self> {
        find_in_path("exiftool").map(|program| Self::new(program, timeout))
    }
}

impl MetadataTool for ExifTool {
    fn name(&self) -> &str {
        "exiftool"
    }

    fn strip(&self, input: &Path, output: &Path, _format: ImageFormat) -> Result<(), ToolError> {
        // -o refuses to overwrite, so the output must be a fresh path
        run_command(
            self.name(),
            &self.program,
            [
                OsStr::new("-q"),
                OsStr::new("-all="),
                OsStr::new("-o"),
                output.as_os_str(),
                input.as_os_str(),
            ],
            self.timeout,
        )?;
        ensure_output(self.name(), output)
    }

    fn read_fields(&self, path: &Path, fields: &[&str]) -> Result<FieldMap, ToolError> {
        let mut args: Vec<String> = vec!["-j".to_string()];
        args.extend(fields.iter().map(|f| format!("-{}", f)));
        args.push(path.display().to_string());

        let output = run_command(self.name(), &self.program, &args, self.timeout)?;
        let parsed: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| ToolError::Failed {
                tool: self.name().to_string(),
                status: 0,
                stderr: format!("unparseable JSON output: {}", e),
            })?;

        let mut map = FieldMap::new();
        if let Some(object) = parsed.get(0).and_then(|v| v.as_object()) {
            for field in fields {
                let value = match object.get(*field) {
                    Some(serde_json::Value::String(s)) => s.trim().to_string(),
                    Some(serde_json::Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                if !value.is_empty() {
                    map.insert((*field).to_string(), value);
                }
            }
        }
        Ok(map)
    }
}

/// exiv2, the secondary metadata tool
pub struct Exiv2 {
    program: PathBuf,
    timeout: Duration,
}

/// Canonical field name to exiv2 key
const EXIV2_KEYS: &[(&str, &str)] = &[
    ("Make", "Exif.Image.Make"),
    ("Model", "Exif.Image.Model"),
    ("DateTimeOriginal", "Exif.Photo.DateTimeOriginal"),
    ("LensModel", "Exif.Photo.LensModel"),
];

impl Exiv2 {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Find `exiv2` on `PATH`
    pub fn locate(timeout: Duration) -> Option<Self> {
        find_in_path("exiv2").map(|program| Self::new(program, timeout))
    }
}

impl MetadataTool for Exiv2 {
    fn name(&self) -> &str {
        "exiv2"
    }

    fn strip(&self, input: &Path, output: &Path, _format: ImageFormat) -> Result<(), ToolError> {
        // exiv2 only edits in place, so it works on a private copy
        fs::copy(input, output).map_err(|e| ToolError::Io {
            tool: self.name().to_string(),
            path: output.to_path_buf(),
            source: e,
        })?;
        run_command(
            self.name(),
            &self.program,
            [OsStr::new("-q"), OsStr::new("rm"), output.as_os_str()],
            self.timeout,
        )?;
        ensure_output(self.name(), output)
    }

    fn read_fields(&self, path: &Path, fields: &[&str]) -> Result<FieldMap, ToolError> {
        let mut args = vec!["-q".to_string(), "-Pkv".to_string()];
        for field in fields {
            if let Some((_, key)) = EXIV2_KEYS.iter().find(|(name, _)| name == field) {
                args.push("-K".to_string());
                args.push((*key).to_string());
            }
        }
        args.push(path.display().to_string());

        // exiv2 exits non-zero when a file has no metadata at all
        let output = match run_command(self.name(), &self.program, &args, self.timeout) {
            Ok(output) => output,
            Err(ToolError::Failed { ref stderr, .. })
                if stderr.is_empty() || stderr.contains("No Exif data") =>
            {
                return Ok(FieldMap::new())
            }
            Err(e) => return Err(e),
        };

        let mut map = FieldMap::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let mut parts = line.splitn(2, char::is_whitespace);
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if let Some((name, _)) = EXIV2_KEYS.iter().find(|(_, k)| *k == key) {
                map.insert((*name).to_string(), value.to_string());
            }
        }
        Ok(map)
    }
}

/// In-process metadata handling
#[derive(Debug, Default)]
pub struct NativeMetadata;

impl NativeMetadata {
    pub fn new() -> Self {
        Self
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> ToolError {
        ToolError::Io {
            tool: self.name().to_string(),
            path: path.to_path_buf(),
            source,
        }
    }

    fn decode_error(&self, path: &Path, reason: String) -> ToolError {
        ToolError::Decode {
            tool: self.name().to_string(),
            path: path.to_path_buf(),
            reason,
        }
    }
}

impl MetadataTool for NativeMetadata {
    fn name(&self) -> &str {
        "native-metadata"
    }

    fn strip(&self, input: &Path, output: &Path, format: ImageFormat) -> Result<(), ToolError> {
        let data = fs::read(input).map_err(|e| self.io_error(input, e))?;
        let cleaned = match format {
            ImageFormat::Jpeg => scrub_jpeg(&data).map_err(|r| self.decode_error(input, r))?,
            ImageFormat::Png => scrub_png(&data).map_err(|r| self.decode_error(input, r))?,
            // BMP has no metadata container; the rest are rebuilt from pixels
            ImageFormat::Bmp => data,
            ImageFormat::WebP | ImageFormat::Gif | ImageFormat::Tiff => {
                return reencode_pixels(self.name(), &data, input, output, format, 100)
            }
        };
        write_new(output, &cleaned).map_err(|e| self.io_error(output, e))
    }

    fn read_fields(&self, path: &Path, fields: &[&str]) -> Result<FieldMap, ToolError> {
        let file = fs::File::open(path).map_err(|e| self.io_error(path, e))?;
        let mut reader = BufReader::new(file);

        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(exif::Error::Io(e)) => return Err(self.io_error(path, e)),
            // No EXIF block, or one too broken to trust: no provenance
            Err(_) => return Ok(FieldMap::new()),
        };

        let mut map = FieldMap::new();
        for field in fields {
            let tag = match *field {
                "Make" => Tag::Make,
                "Model" => Tag::Model,
                "DateTimeOriginal" => Tag::DateTimeOriginal,
                "LensModel" => Tag::LensModel,
                _ => continue,
            };
            if let Some(value) = exif
                .get_field(tag, In::PRIMARY)
                .and_then(|f| get_string_value(&f.value))
            {
                map.insert((*field).to_string(), value);
            }
        }
        Ok(map)
    }
}

/// Helper to extract a string from an EXIF ASCII value
fn get_string_value(value: &Value) -> Option<String> {
    if let Value::Ascii(ref vec) = value {
        if let Some(bytes) = vec.first() {
            if let Ok(s) = std::str::from_utf8(bytes) {
                let trimmed = s.trim_end_matches('\0').trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

fn ensure_output(tool: &str, output: &Path) -> Result<(), ToolError> {
    if output.is_file() {
        Ok(())
    } else {
        Err(ToolError::NoOutput {
            tool: tool.to_string(),
            path: output.to_path_buf(),
        })
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Drop APP1-APP13, APP15 and COM segments from a JPEG.
///
/// APP0 (JFIF) and APP14 (Adobe colour transform) are kept because
/// decoders need them to interpret the pixels. Entropy-coded data after
/// SOS is copied verbatim.
fn scrub_jpeg(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return Err("missing JPEG start-of-image marker".to_string());
    }

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&[0xFF, 0xD8]);
    let mut pos = 2;

    loop {
        if pos >= data.len() || data[pos] != 0xFF {
            return Err(format!("expected marker at offset {}", pos));
        }
        while pos < data.len() && data[pos] == 0xFF {
            pos += 1;
        }
        let Some(&marker) = data.get(pos) else {
            return Err("truncated marker".to_string());
        };
        pos += 1;

        match marker {
            0xD9 => {
                out.extend_from_slice(&[0xFF, 0xD9]);
                return Ok(out);
            }
            0x01 | 0xD0..=0xD7 => out.extend_from_slice(&[0xFF, marker]),
            0xDA => {
                out.extend_from_slice(&[0xFF, 0xDA]);
                out.extend_from_slice(&data[pos..]);
                return Ok(out);
            }
            _ => {
                if pos + 2 > data.len() {
                    return Err("truncated segment length".to_string());
                }
                let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
                if len < 2 || pos + len > data.len() {
                    return Err(format!("segment 0x{:02X} overruns file", marker));
                }
                let is_metadata = matches!(marker, 0xE1..=0xED | 0xEF | 0xFE);
                if !is_metadata {
                    out.extend_from_slice(&[0xFF, marker]);
                    out.extend_from_slice(&data[pos..pos + len]);
                }
                pos += len;
            }
        }
    }
}

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_METADATA_CHUNKS: [&[u8; 4]; 5] = [b"tEXt", b"zTXt", b"iTXt", b"eXIf", b"tIME"];

/// Drop textual, EXIF and timestamp chunks from a PNG
fn scrub_png(data: &[u8]) -> Result<Vec<u8>, String> {
    if data.len() < 8 || data[..8] != PNG_SIGNATURE {
        return Err("missing PNG signature".to_string());
    }

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&PNG_SIGNATURE);
    let mut pos = 8;

    while pos + 8 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
            as usize;
        let kind = &data[pos + 4..pos + 8];
        let end = pos
            .checked_add(12)
            .and_then(|v| v.checked_add(len))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| "chunk overruns file".to_string())?;

        if !PNG_METADATA_CHUNKS.iter().any(|c| c.as_slice() == kind) {
            out.extend_from_slice(&data[pos..end]);
        }
        if kind == b"IEND" {
            return Ok(out);
        }
        pos = end;
    }

    Err("missing IEND chunk".to_string())
}
