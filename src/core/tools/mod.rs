//! # Tools Module
//!
//! Capability contracts for everything that touches pixels or metadata,
//! plus the adapters that fulfil them.
//!
//! ## Capabilities
//! - [`MetadataTool`] - read whitelisted fields, strip everything
//! - [`ImageTool`] - re-encode through a canonical path, inspect format and size
//! - [`Optimizer`] - shrink a file of one format, optional and pluggable
//! - [`Shredder`] - overwrite-then-unlink
//!
//! Every operation reads one path and writes a different one. Nothing here
//! ever modifies its input.

mod command;
mod image_tool;
mod metadata;
mod optimizer;
mod shred;

pub use command::{find_in_path, run_command, CommandOutput};
pub use image_tool::{ImageMagick, NativeImageTool};
pub use metadata::{ExifTool, Exiv2, NativeMetadata};
pub use optimizer::{Jpegoptim, Oxipng, Pngquant};
pub use shred::{OverwriteShredder, ShredCommand};

use crate::core::scanner::ImageFormat;
use crate::error::{SanitizerError, ToolError};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Metadata field values keyed by canonical field name
pub type FieldMap = BTreeMap<String, String>;

/// What an image tool reports about a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Options for the re-encode stage
#[derive(Debug, Clone, Copy)]
pub struct ReencodeOptions {
    /// Output format, always the sniffed input format
    pub format: ImageFormat,
    /// Encoder quality for lossy formats (1-100)
    pub quality: u8,
}

/// Reads and removes embedded metadata
pub trait MetadataTool: Send + Sync {
    /// Tool name used in logs and errors
    fn name(&self) -> &str;

    /// Write a copy of `input` to `output` with all metadata removed
    fn strip(&self, input: &Path, output: &Path, format: ImageFormat) -> Result<(), ToolError>;

    /// Read the requested fields; absent fields are simply missing from the map
    fn read_fields(&self, path: &Path, fields: &[&str]) -> Result<FieldMap, ToolError>;
}

/// Decodes and re-encodes images
pub trait ImageTool: Send + Sync {
    /// Tool name used in logs and errors
    fn name(&self) -> &str;

    /// Re-save `input` to `output` in the same format with nothing but pixels
    fn reencode(
        &self,
        input: &Path,
        output: &Path,
        options: &ReencodeOptions,
    ) -> Result<(), ToolError>;

    /// Report the true format and pixel dimensions of a file
    fn inspect(&self, path: &Path) -> Result<ImageInfo, ToolError>;
}

/// Shrinks files of particular formats
pub trait Optimizer: Send + Sync {
    /// Tool name used in logs and errors
    fn name(&self) -> &str;

    /// Whether this optimizer handles `format`
    fn supports(&self, format: ImageFormat) -> bool;

    /// Whether the optimizer may discard image information
    fn is_lossy(&self) -> bool;

    /// Write an optimized copy of `input` to `output`
    fn optimize(&self, input: &Path, output: &Path, target_quality: u8)
        -> Result<(), ToolError>;
}

/// Securely destroys a file
pub trait Shredder: Send + Sync {
    /// Tool name used in logs and errors
    fn name(&self) -> &str;

    /// Overwrite and unlink `path`
    fn shred(&self, path: &Path) -> Result<(), ToolError>;
}

/// The set of collaborators a run uses
#[derive(Clone)]
pub struct Toolbox {
    /// Metadata tools in preference order; the first is primary
    pub metadata: Vec<Arc<dyn MetadataTool>>,
    /// Image re-encoder and inspector
    pub image: Arc<dyn ImageTool>,
    /// Optional optimizers, tried in order
    pub optimizers: Vec<Arc<dyn Optimizer>>,
    /// Secure deletion
    pub shredder: Arc<dyn Shredder>,
}

impl Toolbox {
    /// Only in-process implementations; needs nothing installed
    pub fn native() -> Self {
        Self {
            metadata: vec![Arc::new(NativeMetadata::new())],
            image: Arc::new(NativeImageTool::new()),
            optimizers: Vec::new(),
            shredder: Arc::new(OverwriteShredder),
        }
    }

    /// Probe `PATH` for external tools.
    ///
    /// ExifTool is the primary metadata tool and exiv2 the secondary; unless
    /// `external_only` is set the native scrubber closes the list and the
    /// native encoder stands in for a missing ImageMagick. With
    /// `external_only`, a missing stripper or image tool is fatal.
    pub fn discover(
        timeout: Duration,
        allow_lossy: bool,
        external_only: bool,
    ) -> Result<Self, SanitizerError> {
        let mut metadata: Vec<Arc<dyn MetadataTool>> = Vec::new();
        if let Some(tool) = ExifTool::locate(timeout) {
            metadata.push(Arc::new(tool));
        }
        if let Some(tool) = Exiv2::locate(timeout) {
            metadata.push(Arc::new(tool));
        }
        if !external_only {
            metadata.push(Arc::new(NativeMetadata::new()));
        }

        let image: Arc<dyn ImageTool> = match ImageMagick::locate(timeout) {
            Some(tool) => Arc::new(tool),
            None if external_only => {
                return Err(SanitizerError::MissingTool {
                    capability: "image re-encoding",
                    hint: "ImageMagick",
                })
            }
            None => Arc::new(NativeImageTool::new()),
        };

        let mut optimizers: Vec<Arc<dyn Optimizer>> = Vec::new();
        if let Some(tool) = Jpegoptim::locate(timeout, allow_lossy) {
            optimizers.push(Arc::new(tool));
        }
        if let Some(tool) = Oxipng::locate(timeout) {
            optimizers.push(Arc::new(tool));
        }
        if allow_lossy {
            if let Some(tool) = Pngquant::locate(timeout) {
                optimizers.push(Arc::new(tool));
            }
        }

        let shredder: Arc<dyn Shredder> = match ShredCommand::locate(timeout) {
            Some(tool) => Arc::new(tool),
            None => Arc::new(OverwriteShredder),
        };

        let toolbox = Self {
            metadata,
            image,
            optimizers,
            shredder,
        };
        info!(
            metadata = ?toolbox.metadata.iter().map(|t| t.name()).collect::<Vec<_>>(),
            image = toolbox.image.name(),
            optimizers = ?toolbox.optimizers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            shredder = toolbox.shredder.name(),
            "Tools discovered"
        );
        toolbox.validate()?;
        Ok(toolbox)
    }

    /// Fail fast when a mandatory capability is missing
    pub fn validate(&self) -> Result<(), SanitizerError> {
        if self.metadata.is_empty() {
            return Err(SanitizerError::MissingTool {
                capability: "metadata stripping",
                hint: "exiftool or exiv2",
            });
        }
        Ok(())
    }

    /// Optimizers usable for `format` under the lossy policy
    pub fn optimizers_for(
        &self,
        format: ImageFormat,
        allow_lossy: bool,
    ) -> Vec<Arc<dyn Optimizer>> {
        self.optimizers
            .iter()
            .filter(|o| o.supports(format) && (allow_lossy || !o.is_lossy()))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolbox")
            .field(
                "metadata",
                &self.metadata.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("image", &self.image.name())
            .field(
                "optimizers",
                &self.optimizers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("shredder", &self.shredder.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeOptimizer {
        lossy: bool,
    }

    impl Optimizer for FakeOptimizer {
        fn name(&self) -> &str {
            "fake"
        }

        fn supports(&self, format: ImageFormat) -> bool {
            format == ImageFormat::Png
        }

        fn is_lossy(&self) -> bool {
            self.lossy
        }

        fn optimize(&self, input: &Path, output: &Path, _q: u8) -> Result<(), ToolError> {
            std::fs::copy(input, output).map(|_| ()).map_err(|e| ToolError::Io {
                tool: "fake".to_string(),
                path: output.to_path_buf(),
                source: e,
            })
        }
    }

    #[test]
    fn native_toolbox_is_valid() {
        assert!(Toolbox::native().validate().is_ok());
    }

    #[test]
    fn toolbox_without_metadata_tool_is_fatal() {
        let mut toolbox = Toolbox::native();
        toolbox.metadata.clear();

        assert!(matches!(
            toolbox.validate(),
            Err(SanitizerError::MissingTool { .. })
        ));
    }

    #[test]
    fn lossy_optimizers_are_filtered_unless_allowed() {
        let mut toolbox = Toolbox::native();
        toolbox.optimizers = vec![
            Arc::new(FakeOptimizer { lossy: false }),
            Arc::new(FakeOptimizer { lossy: true }),
        ];

        assert_eq!(toolbox.optimizers_for(ImageFormat::Png, false).len(), 1);
        assert_eq!(toolbox.optimizers_for(ImageFormat::Png, true).len(), 2);
        assert!(toolbox.optimizers_for(ImageFormat::Jpeg, true).is_empty());
    }
}
