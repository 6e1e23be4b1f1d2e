//! External size-reduction tools.

use super::command::{find_in_path, run_command};
use super::Optimizer;
use crate::core::scanner::ImageFormat;
use crate::error::ToolError;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn copy_for_in_place(tool: &str, input: &Path, output: &Path) -> Result<(), ToolError> {
    fs::copy(input, output).map(|_| ()).map_err(|e| ToolError::Io {
        tool: tool.to_string(),
        path: output.to_path_buf(),
        source: e,
    })
}

fn ensure_output(tool: &str, output: &Path) -> Result<(), ToolError> {
    match fs::metadata(output) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(ToolError::NoOutput {
            tool: tool.to_string(),
            path: output.to_path_buf(),
        }),
    }
}

/// jpegoptim: lossless Huffman optimisation, optionally capped quality
pub struct Jpegoptim {
    program: PathBuf,
    lossy: bool,
    timeout: Duration,
}

impl Jpegoptim {
    pub fn new(program: PathBuf, lossy: bool, timeout: Duration) -> Self {
        Self {
            program,
            lossy,
            timeout,
        }
    }

    /// Find `jpegoptim` on `PATH`
    pub fn locate(timeout: Duration, lossy: bool) -> Option<Self> {
        find_in_path("jpegoptim").map(|program| Self::new(program, lossy, timeout))
    }
}

impl Optimizer for Jpegoptim {
    fn name(&self) -> &str {
        "jpegoptim"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Jpeg
    }

    fn is_lossy(&self) -> bool {
        self.lossy
    }

    fn optimize(&self, input: &Path, output: &Path, target_quality: u8) -> Result<(), ToolError> {
        // jpegoptim rewrites in place, so it gets a private copy
        copy_for_in_place(self.name(), input, output)?;

        let mut args: Vec<OsString> = vec!["-q".into(), "--strip-all".into()];
        if self.lossy {
            args.push(format!("--max={}", target_quality).into());
        }
        args.push(output.as_os_str().to_owned());

        run_command(self.name(), &self.program, &args, self.timeout)?;
        ensure_output(self.name(), output)
    }
}

/// oxipng: lossless PNG recompression
pub struct Oxipng {
    program: PathBuf,
    timeout: Duration,
}

impl Oxipng {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Find `oxipng` on `PATH`
    pub fn locate(timeout: Duration) -> Option<Self> {
        find_in_path("oxipng").map(|program| Self::new(program, timeout))
    }
}

impl Optimizer for Oxipng {
    fn name(&self) -> &str {
        "oxipng"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Png
    }

    fn is_lossy(&self) -> bool {
        false
    }

    fn optimize(&self, input: &Path, output: &Path, _target_quality: u8) -> Result<(), ToolError> {
        let args: Vec<OsString> = vec![
            "-q".into(),
            "-o".into(),
            "4".into(),
            "--strip".into(),
            "all".into(),
            "--out".into(),
            output.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ];
        run_command(self.name(), &self.program, &args, self.timeout)?;
        ensure_output(self.name(), output)
    }
}

/// pngquant: lossy palette quantisation, only used when lossy output is allowed
pub struct Pngquant {
    program: PathBuf,
    timeout: Duration,
}

impl Pngquant {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    /// Find `pngquant` on `PATH`
    pub fn locate(timeout: Duration) -> Option<Self> {
        find_in_path("pngquant").map(|program| Self::new(program, timeout))
    }
}

/// pngquant quality range that never drops below `target` minus a margin
fn pngquant_range(target: u8) -> String {
    let max = target.clamp(1, 100);
    let min = max.saturating_sub(20).max(1);
    format!("{}-{}", min, max)
}

impl Optimizer for Pngquant {
    fn name(&self) -> &str {
        "pngquant"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Png
    }

    fn is_lossy(&self) -> bool {
        true
    }

    fn optimize(&self, input: &Path, output: &Path, target_quality: u8) -> Result<(), ToolError> {
        let args: Vec<OsString> = vec![
            format!("--quality={}", pngquant_range(target_quality)).into(),
            "--strip".into(),
            "--output".into(),
            output.as_os_str().to_owned(),
            input.as_os_str().to_owned(),
        ];
        run_command(self.name(), &self.program, &args, self.timeout)?;
        ensure_output(self.name(), output)
    }
}
