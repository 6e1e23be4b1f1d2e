//! Image re-encoders and inspectors.

use super::command::{find_in_path, run_command};
use super::{ImageInfo, ImageTool, ReencodeOptions};
use crate::core::hasher::decode_image;
use crate::core::scanner::ImageFormat;
use crate::error::ToolError;
use image::codecs::gif::GifDecoder;
use image::codecs::jpeg::JpegEncoder;
use image::{AnimationDecoder, DynamicImage};
use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Re-encoder built on the `image` crate.
///
/// Encoders in the `image` crate write pixels only, so a round trip drops
/// every metadata block. Colour is normalised to 8-bit RGB (RGBA when the
/// source has alpha and the format can carry it).
#[derive(Debug, Default)]
pub struct NativeImageTool;

impl NativeImageTool {
    pub fn new() -> Self {
        Self
    }
}

impl ImageTool for NativeImageTool {
    fn name(&self) -> &str {
        "native-image"
    }

    fn reencode(
        &self,
        input: &Path,
        output: &Path,
        options: &ReencodeOptions,
    ) -> Result<(), ToolError> {
        let data = fs::read(input).map_err(|e| ToolError::Io {
            tool: self.name().to_string(),
            path: input.to_path_buf(),
            source: e,
        })?;
        reencode_pixels(self.name(), &data, input, output, options.format, options.quality)
    }

    fn inspect(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        let data = fs::read(path).map_err(|e| ToolError::Io {
            tool: self.name().to_string(),
            path: path.to_path_buf(),
            source: e,
        })?;
        let decode_error = |reason: String| ToolError::Decode {
            tool: self.name().to_string(),
            path: path.to_path_buf(),
            reason,
        };

        let guessed = image::guess_format(&data).map_err(|e| decode_error(e.to_string()))?;
        let format = ImageFormat::from_image_format(guessed).ok_or_else(|| {
            ToolError::Unsupported {
                tool: self.name().to_string(),
                format: format!("{:?}", guessed),
            }
        })?;
        let image = decode_image(&data, format).map_err(decode_error)?;

        Ok(ImageInfo {
            format,
            width: image.width(),
            height: image.height(),
        })
    }
}

/// Decode `data` and write it back out as `format` to a new file.
pub(super) fn reencode_pixels(
    tool: &str,
    data: &[u8],
    input: &Path,
    output: &Path,
    format: ImageFormat,
    quality: u8,
) -> Result<(), ToolError> {
    let decode_error = |reason: String| ToolError::Decode {
        tool: tool.to_string(),
        path: input.to_path_buf(),
        reason,
    };
    let io_error = |source: std::io::Error| ToolError::Io {
        tool: tool.to_string(),
        path: output.to_path_buf(),
        source,
    };

    if format == ImageFormat::Gif && is_animated_gif(data) {
        return Err(ToolError::Unsupported {
            tool: tool.to_string(),
            format: "animated GIF".to_string(),
        });
    }

    let image = decode_image(data, format).map_err(decode_error)?;
    let canonical = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ if image.color().has_alpha() => DynamicImage::ImageRgba8(image.to_rgba8()),
        _ => DynamicImage::ImageRgb8(image.to_rgb8()),
    };

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output)
        .map_err(io_error)?;
    let mut writer = BufWriter::new(file);

    let encoded = match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            canonical.write_with_encoder(encoder)
        }
        _ => canonical.write_to(&mut writer, format.to_image_format()),
    };
    encoded.map_err(|e| ToolError::Failed {
        tool: tool.to_string(),
        status: 0,
        stderr: e.to_string(),
    })?;

    let file = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
    file.sync_all().map_err(io_error)
}

fn is_animated_gif(data: &[u8]) -> bool {
    GifDecoder::new(Cursor::new(data))
        .map(|decoder| decoder.into_frames().take(2).count() > 1)
        .unwrap_or(false)
}

/// ImageMagick 7 (`magick`) or 6 (`convert` + `identify`)
pub struct ImageMagick {
    convert: (PathBuf, Option<&'static str>),
    identify: (PathBuf, Option<&'static str>),
    timeout: Duration,
}

impl ImageMagick {
    /// Find ImageMagick on `PATH`, preferring version 7
    pub fn locate(timeout: Duration) -> Option<Self> {
        if let Some(magick) = find_in_path("magick") {
            return Some(Self {
                convert: (magick.clone(), None),
                identify: (magick, Some("identify")),
                timeout,
            });
        }
        let convert = find_in_path("convert")?;
        let identify = find_in_path("identify")?;
        Some(Self {
            convert: (convert, None),
            identify: (identify, None),
            timeout,
        })
    }

    fn args(prefix: Option<&'static str>, rest: Vec<OsString>) -> Vec<OsString> {
        prefix.map(OsString::from).into_iter().chain(rest).collect()
    }
}

fn magick_format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Gif => "GIF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Tiff => "TIFF",
    }
}

/// Parse `identify -format "%m %w %h"` output
fn parse_identify(text: &str) -> Option<ImageInfo> {
    let mut parts = text.split_whitespace();
    let format = match parts.next()? {
        "JPEG" | "JPG" => ImageFormat::Jpeg,
        "PNG" | "PNG8" | "PNG24" | "PNG32" => ImageFormat::Png,
        "WEBP" => ImageFormat::WebP,
        "GIF" | "GIF87" => ImageFormat::Gif,
        "BMP" | "BMP2" | "BMP3" => ImageFormat::Bmp,
        "TIFF" | "TIF" | "TIFF64" => ImageFormat::Tiff,
        _ => return None,
    };
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some(ImageInfo {
        format,
        width,
        height,
    })
}

impl ImageTool for ImageMagick {
    fn name(&self) -> &str {
        "imagemagick"
    }

    fn reencode(
        &self,
        input: &Path,
        output: &Path,
        options: &ReencodeOptions,
    ) -> Result<(), ToolError> {
        let mut target = OsString::from(magick_format_name(options.format));
        target.push(":");
        target.push(output.as_os_str());

        let args = Self::args(
            self.convert.1,
            vec![
                input.as_os_str().to_owned(),
                "-strip".into(),
                "-colorspace".into(),
                "sRGB".into(),
                "-quality".into(),
                options.quality.to_string().into(),
                target,
            ],
        );
        run_command(self.name(), &self.convert.0, &args, self.timeout)?;

        if output.is_file() {
            Ok(())
        } else {
            Err(ToolError::NoOutput {
                tool: self.name().to_string(),
                path: output.to_path_buf(),
            })
        }
    }

    fn inspect(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        // [0] limits identify to the first frame of multi-frame files
        let mut first_frame = path.as_os_str().to_owned();
        first_frame.push("[0]");

        let args = Self::args(
            self.identify.1,
            vec!["-format".into(), OsStr::new("%m %w %h").to_owned(), first_frame],
        );
        let output = run_command(self.name(), &self.identify.0, &args, self.timeout)?;
        let text = String::from_utf8_lossy(&output.stdout);

        parse_identify(&text).ok_or_else(|| ToolError::Decode {
            tool: self.name().to_string(),
            path: path.to_path_buf(),
            reason: format!("unexpected identify output: {}", text.trim()),
        })
    }
}
