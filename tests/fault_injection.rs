//! Runs with misbehaving tools swapped into the toolbox.
//!
//! Checks that transient failures are retried, persistent ones leave the
//! original intact, broken optimizers never cost a file, and an interrupt
//! at any stage boundary leaves nothing half done.

mod common;

use assert_fs::prelude::*;
use common::*;
use photo_sanitizer::core::pipeline::{StageKind, StageStatus, TerminalState};
use photo_sanitizer::core::report::EXIT_FAILURES;
use photo_sanitizer::core::hasher::ContentHash;
use photo_sanitizer::core::retry::CancellationToken;
use photo_sanitizer::core::scratch::SCRATCH_PREFIX;
use photo_sanitizer::core::tools::{
    FieldMap, ImageInfo, ImageTool, MetadataTool, NativeImageTool, NativeMetadata, Optimizer,
    ReencodeOptions, Shredder,
};
use photo_sanitizer::core::{ImageFormat, Toolbox};
use photo_sanitizer::error::{FailureReason, ToolError};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Re-encoder that fails its first `failures` calls, then behaves
struct FlakyEncoder {
    failures: u32,
    calls: AtomicU32,
    inner: NativeImageTool,
}

impl FlakyEncoder {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            inner: NativeImageTool::new(),
        }
    }
}

impl ImageTool for FlakyEncoder {
    fn name(&self) -> &str {
        "flaky-encoder"
    }

    fn reencode(&self, input: &Path, output: &Path, options: &ReencodeOptions) -> Result<(), ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ToolError::Failed {
                tool: self.name().to_string(),
                status: 1,
                stderr: "resource temporarily unavailable".to_string(),
            });
        }
        self.inner.reencode(input, output, options)
    }

    fn inspect(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        self.inner.inspect(path)
    }
}

/// Re-encoder that silently halves the image
struct ShrinkingEncoder;

impl ImageTool for ShrinkingEncoder {
    fn name(&self) -> &str {
        "shrinking-encoder"
    }

    fn reencode(&self, input: &Path, output: &Path, _options: &ReencodeOptions) -> Result<(), ToolError> {
        let img = image::open(input).unwrap();
        img.thumbnail(img.width() / 2, img.height() / 2)
            .save(output)
            .unwrap();
        Ok(())
    }

    fn inspect(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        NativeImageTool::new().inspect(path)
    }
}

/// Optimizer that writes a garbage file
struct GarbageOptimizer;

impl Optimizer for GarbageOptimizer {
    fn name(&self) -> &str {
        "garbage"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Jpeg
    }

    fn is_lossy(&self) -> bool {
        false
    }

    fn optimize(&self, _input: &Path, output: &Path, _target_quality: u8) -> Result<(), ToolError> {
        fs::write(output, b"xx").unwrap();
        Ok(())
    }
}

/// Lossy optimizer that re-saves JPEGs at a low quality
struct CrushingOptimizer;

impl Optimizer for CrushingOptimizer {
    fn name(&self) -> &str {
        "crusher"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Jpeg
    }

    fn is_lossy(&self) -> bool {
        true
    }

    fn optimize(&self, input: &Path, output: &Path, _target_quality: u8) -> Result<(), ToolError> {
        let img = image::open(input).unwrap().to_rgb8();
        fs::write(output, jpeg_bytes(&img, 20)).unwrap();
        Ok(())
    }
}

/// Shredder that can never remove anything
struct StuckShredder;

impl Shredder for StuckShredder {
    fn name(&self) -> &str {
        "stuck"
    }

    fn shred(&self, path: &Path) -> Result<(), ToolError> {
        Err(ToolError::Failed {
            tool: self.name().to_string(),
            status: 1,
            stderr: format!("cannot shred {}", path.display()),
        })
    }
}

/// Strips normally, then trips the token
struct InterruptedStrip {
    cancel: CancellationToken,
    inner: NativeMetadata,
}

impl MetadataTool for InterruptedStrip {
    fn name(&self) -> &str {
        "interrupted-strip"
    }

    fn strip(&self, input: &Path, output: &Path, format: ImageFormat) -> Result<(), ToolError> {
        let result = self.inner.strip(input, output, format);
        self.cancel.cancel();
        result
    }

    fn read_fields(&self, path: &Path, fields: &[&str]) -> Result<FieldMap, ToolError> {
        self.inner.read_fields(path, fields)
    }
}

/// Re-encodes or inspects normally, then trips the token on the chosen call
struct InterruptedEncoder {
    cancel: CancellationToken,
    on_inspect: bool,
    inner: NativeImageTool,
}

impl ImageTool for InterruptedEncoder {
    fn name(&self) -> &str {
        "interrupted-encoder"
    }

    fn reencode(&self, input: &Path, output: &Path, options: &ReencodeOptions) -> Result<(), ToolError> {
        let result = self.inner.reencode(input, output, options);
        if !self.on_inspect {
            self.cancel.cancel();
        }
        result
    }

    fn inspect(&self, path: &Path) -> Result<ImageInfo, ToolError> {
        let result = self.inner.inspect(path);
        if self.on_inspect {
            self.cancel.cancel();
        }
        result
    }
}

/// Copies its input, then trips the token
struct InterruptedOptimizer {
    cancel: CancellationToken,
}

impl Optimizer for InterruptedOptimizer {
    fn name(&self) -> &str {
        "interrupted-optimizer"
    }

    fn supports(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Jpeg
    }

    fn is_lossy(&self) -> bool {
        false
    }

    fn optimize(&self, input: &Path, output: &Path, _target_quality: u8) -> Result<(), ToolError> {
        fs::copy(input, output).unwrap();
        self.cancel.cancel();
        Ok(())
    }
}

/// Run one JPEG through a toolbox that interrupts itself and check that
/// the original survived untouched and no scratch files were left
fn assert_interrupted_cleanly(toolbox: impl FnOnce(CancellationToken) -> Toolbox) {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.jpg")
        .write_binary(&jpeg_bytes(&photo_like(7), 90))
        .unwrap();
    let original = temp.child("a.jpg");
    let before = ContentHash::of_file(original.path()).unwrap();

    let cancel = CancellationToken::new();
    let report = builder(temp.path())
        .toolbox(toolbox(cancel.clone()))
        .cancellation(cancel)
        .build()
        .unwrap()
        .run()
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.exit_code(), EXIT_FAILURES);
    let entry = report.failures.iter().next().unwrap();
    assert_eq!(entry.reason, FailureReason::Cancelled);
    assert_eq!(report.results[0].state, TerminalState::Failed);

    assert_eq!(ContentHash::of_file(original.path()).unwrap(), before);
    assert_eq!(listing(temp.path()), vec!["a.jpg"]);
    assert!(all_entries(temp.path())
        .iter()
        .all(|p| !p.file_name().unwrap().to_string_lossy().starts_with(SCRATCH_PREFIX)));
}

#[test]
fn interrupt_during_strip_keeps_original() {
    assert_interrupted_cleanly(|cancel| {
        let mut toolbox = Toolbox::native();
        toolbox.metadata = vec![Arc::new(InterruptedStrip {
            cancel,
            inner: NativeMetadata::new(),
        })];
        toolbox
    });
}

#[test]
fn interrupt_during_reencode_keeps_original() {
    assert_interrupted_cleanly(|cancel| {
        let mut toolbox = Toolbox::native();
        toolbox.image = Arc::new(InterruptedEncoder {
            cancel,
            on_inspect: false,
            inner: NativeImageTool::new(),
        });
        toolbox
    });
}

#[test]
fn interrupt_during_optimize_keeps_original() {
    assert_interrupted_cleanly(|cancel| {
        let mut toolbox = Toolbox::native();
        toolbox.optimizers.push(Arc::new(InterruptedOptimizer { cancel }));
        toolbox
    });
}

#[test]
fn interrupt_just_before_placement_keeps_original() {
    // The last tool call before placing is the final verification
    assert_interrupted_cleanly(|cancel| {
        let mut toolbox = Toolbox::native();
        toolbox.image = Arc::new(InterruptedEncoder {
            cancel,
            on_inspect: true,
            inner: NativeImageTool::new(),
        });
        toolbox
    });
}

#[test]
fn stale_scratch_from_a_killed_run_is_removed() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.jpg")
        .write_binary(&jpeg_bytes(&quadrants(), 90))
        .unwrap();
    let area = temp.child(".scrub-x").child("file-y");
    area.create_dir_all().unwrap();
    area.child("01-strip.jpg").write_binary(b"working copy").unwrap();

    let report = builder(temp.path()).build().unwrap().run().unwrap();

    assert_eq!(report.count(TerminalState::Committed), 1);
    temp.child(".scrub-x").assert(predicates::path::missing());
    assert_eq!(all_entries(temp.path()).len(), 1);
}

#[test]
fn transient_failures_are_retried_until_success() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.jpg")
        .write_binary(&jpeg_bytes(&quadrants(), 90))
        .unwrap();

    let mut toolbox = Toolbox::native();
    toolbox.image = Arc::new(FlakyEncoder::new(2));
    let report = builder(temp.path()).toolbox(toolbox).build().unwrap().run().unwrap();

    let result = &report.results[0];
    assert_eq!(result.state, TerminalState::Committed);
    assert_eq!(result.retries, 2);
    let reencode = result
        .stages
        .iter()
        .find(|s| s.stage == StageKind::Reencode)
        .unwrap();
    assert!(matches!(reencode.status, StageStatus::Done { attempts: 3, .. }));
}

#[test]
fn persistent_failure_leaves_original_intact() {
    let temp = assert_fs::TempDir::new().unwrap();
    let original = jpeg_bytes(&quadrants(), 90);
    temp.child("a.jpg").write_binary(&original).unwrap();

    let mut toolbox = Toolbox::native();
    toolbox.image = Arc::new(FlakyEncoder::new(u32::MAX));
    let report = builder(temp.path()).toolbox(toolbox).build().unwrap().run().unwrap();

    assert_eq!(report.exit_code(), EXIT_FAILURES);
    let entry = report.failures.iter().next().unwrap();
    assert_eq!(entry.reason, FailureReason::ToolFailed);
    assert_eq!(entry.attempts, 3);
    assert_eq!(listing(temp.path()), vec!["a.jpg"]);
    assert_eq!(fs::read(temp.child("a.jpg").path()).unwrap(), original);
}

#[test]
fn dimension_change_is_rejected() {
    let temp = assert_fs::TempDir::new().unwrap();
    let original = jpeg_bytes(&quadrants(), 90);
    temp.child("a.jpg").write_binary(&original).unwrap();

    let mut toolbox = Toolbox::native();
    toolbox.image = Arc::new(ShrinkingEncoder);
    let report = builder(temp.path()).toolbox(toolbox).build().unwrap().run().unwrap();

    let entry = report.failures.iter().next().unwrap();
    assert_eq!(entry.reason, FailureReason::DimensionMismatch);
    assert_eq!(fs::read(temp.child("a.jpg").path()).unwrap(), original);
}

#[test]
fn broken_optimizer_output_is_ignored() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.jpg")
        .write_binary(&jpeg_bytes(&quadrants(), 90))
        .unwrap();

    let mut toolbox = Toolbox::native();
    toolbox.optimizers.push(Arc::new(GarbageOptimizer));
    let report = builder(temp.path()).toolbox(toolbox).build().unwrap().run().unwrap();

    let result = &report.results[0];
    assert_eq!(result.state, TerminalState::Committed);
    let optimize = result
        .stages
        .iter()
        .find(|s| s.stage == StageKind::Optimize)
        .unwrap();
    assert!(matches!(optimize.status, StageStatus::Skipped { .. }));
    let committed = result.final_path.as_ref().unwrap();
    assert!(image::open(committed).is_ok());
}

#[test]
fn lossy_optimizer_needs_permission() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.jpg")
        .write_binary(&jpeg_bytes(&stripes(), 95))
        .unwrap();

    let mut toolbox = Toolbox::native();
    toolbox.optimizers.push(Arc::new(CrushingOptimizer));

    let cautious = builder(temp.path())
        .toolbox(toolbox.clone())
        .dry_run(true)
        .build()
        .unwrap()
        .run()
        .unwrap();
    let optimize = cautious.results[0]
        .stages
        .iter()
        .find(|s| s.stage == StageKind::Optimize)
        .unwrap();
    assert!(matches!(optimize.status, StageStatus::Skipped { .. }));

    let lossy = builder(temp.path())
        .toolbox(toolbox)
        .allow_lossy(true)
        .build()
        .unwrap()
        .run()
        .unwrap();
    let result = &lossy.results[0];
    let optimize = result
        .stages
        .iter()
        .find(|s| s.stage == StageKind::Optimize)
        .unwrap();
    assert!(
        matches!(&optimize.status, StageStatus::Done { tool, .. } if tool == "crusher")
    );
    assert!(result.bytes_after < result.bytes_before);
}

#[test]
fn failed_shred_falls_back_to_unlinking() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.jpg")
        .write_binary(&jpeg_bytes(&quadrants(), 90))
        .unwrap();

    let mut toolbox = Toolbox::native();
    toolbox.shredder = Arc::new(StuckShredder);
    let report = builder(temp.path()).toolbox(toolbox).build().unwrap().run().unwrap();

    let result = &report.results[0];
    assert_eq!(result.state, TerminalState::Committed);
    temp.child("a.jpg").assert(predicates::path::missing());
    assert_eq!(listing(temp.path()).len(), 1);
    assert!(result.final_path.as_ref().unwrap().is_file());
}
