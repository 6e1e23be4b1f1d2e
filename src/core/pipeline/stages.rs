//! Strip, Re-encode and Optimize for one admitted file.
//!
//! Every stage reads the previous stage's working file and writes a new one
//! in the file's private scratch area. The original is only ever read.

use super::{StageKind, StageReport, StageStatus};
use crate::core::fingerprint::ImageRecord;
use crate::core::hasher::ContentHash;
use crate::core::report::FailureEntry;
use crate::core::retry::{retry, CancellationToken, Retried, RetryError, RetryPolicy};
use crate::core::scratch::ScratchArea;
use crate::core::tools::{ReencodeOptions, Toolbox};
use crate::core::verify::IntegrityVerifier;
use crate::error::{Classify, FailureReason, StageError, ToolError};
use crate::events::{Event, EventSender, FileEvent};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A verified working file ready to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedCandidate {
    pub path: PathBuf,
    pub content_hash: ContentHash,
    pub size: u64,
}

/// Everything the stages did for one file
#[derive(Debug)]
pub struct StageOutcome {
    pub stages: Vec<StageReport>,
    pub retries: u32,
    /// Last working file written
    pub working_path: Option<PathBuf>,
    pub result: Result<SanitizedCandidate, FailureEntry>,
}

/// Runs the three stages under the retry policy
#[derive(Debug, Clone)]
pub struct StageRunner {
    toolbox: Toolbox,
    verifier: IntegrityVerifier,
    retry: RetryPolicy,
    cancel: CancellationToken,
    target_quality: u8,
    allow_lossy: bool,
}

/// Mutable bookkeeping while one file moves through the stages
struct Progress<'a> {
    record: &'a ImageRecord,
    area: &'a mut ScratchArea,
    events: &'a EventSender,
    stages: Vec<StageReport>,
    retries: u32,
    working_path: Option<PathBuf>,
}

impl Progress<'_> {
    fn started(&self, stage: StageKind) {
        debug!("{} stage for {}", stage, self.record.path.display());
        self.events.send(Event::File(FileEvent::StageStarted {
            path: self.record.path.clone(),
            stage,
        }));
    }

    fn record_stage(&mut self, stage: StageKind, status: StageStatus) {
        self.stages.push(StageReport { stage, status });
    }

    fn fail<E: Classify + std::fmt::Display>(
        mut self,
        stage: StageKind,
        error: RetryError<E>,
    ) -> StageOutcome {
        self.retries += error.attempts().saturating_sub(1);
        self.record_stage(
            stage,
            StageStatus::Failed {
                reason: error.reason(),
                attempts: error.attempts(),
            },
        );
        let entry = FailureEntry {
            path: self.record.path.clone(),
            reason: error.reason(),
            attempts: error.attempts(),
            detail: format!("{} stage: {}", stage, error),
        };
        self.finish(Err(entry))
    }

    fn finish(self, result: Result<SanitizedCandidate, FailureEntry>) -> StageOutcome {
        StageOutcome {
            stages: self.stages,
            retries: self.retries,
            working_path: self.working_path,
            result,
        }
    }
}

impl StageRunner {
    pub fn new(
        toolbox: Toolbox,
        verifier: IntegrityVerifier,
        retry: RetryPolicy,
        cancel: CancellationToken,
        target_quality: u8,
        allow_lossy: bool,
    ) -> Self {
        Self {
            toolbox,
            verifier,
            retry,
            cancel,
            target_quality,
            allow_lossy,
        }
    }

    /// Produce a verified sanitized candidate for `record` inside `area`
    pub fn run(
        &self,
        record: &ImageRecord,
        area: &mut ScratchArea,
        events: &EventSender,
    ) -> StageOutcome {
        let mut progress = Progress {
            record,
            area,
            events,
            stages: Vec::new(),
            retries: 0,
            working_path: None,
        };

        // Stage 1: strip
        progress.started(StageKind::Strip);
        let stripped = match self.with_retry(&mut progress, StageKind::Strip, |p| {
            self.strip_once(p.record, p.area)
        }) {
            Ok(Retried {
                value: (tool, path),
                attempts,
            }) => {
                progress.record_stage(StageKind::Strip, StageStatus::Done { tool, attempts });
                progress.working_path = Some(path.clone());
                path
            }
            Err(error) => return progress.fail(StageKind::Strip, error),
        };

        // Stage 2: re-encode, which must verify
        progress.started(StageKind::Reencode);
        let reencoded = match self.with_retry(&mut progress, StageKind::Reencode, |p| {
            self.reencode_once(p.record, &stripped, p.area)
        }) {
            Ok(Retried {
                value: (tool, path),
                attempts,
            }) => {
                progress.record_stage(StageKind::Reencode, StageStatus::Done { tool, attempts });
                progress.working_path = Some(path.clone());
                path
            }
            Err(error) => return progress.fail(StageKind::Reencode, error),
        };

        if let Err(error) = self.verifier.verify(record, &reencoded) {
            warn!("{} failed verification: {}", reencoded.display(), error);
            let entry = FailureEntry {
                path: record.path.clone(),
                reason: error.reason(),
                attempts: 1,
                detail: error.to_string(),
            };
            return progress.finish(Err(entry));
        }

        // Stage 3: optimize, optional
        progress.started(StageKind::Optimize);
        let chosen = match self.optimize(&mut progress, &reencoded) {
            Ok(chosen) => chosen,
            Err(error) => return progress.fail(StageKind::Optimize, error),
        };
        progress.working_path = Some(chosen.clone());

        let candidate = fs::read(&chosen)
            .map(|bytes| SanitizedCandidate {
                path: chosen.clone(),
                content_hash: ContentHash::of_bytes(&bytes),
                size: bytes.len() as u64,
            })
            .map_err(|e| FailureEntry {
                path: record.path.clone(),
                reason: FailureReason::Io,
                attempts: 1,
                detail: format!("cannot read candidate {}: {}", chosen.display(), e),
            });
        progress.finish(candidate)
    }

    fn with_retry<T, F>(
        &self,
        progress: &mut Progress<'_>,
        stage: StageKind,
        mut operation: F,
    ) -> Result<Retried<T>, RetryError<StageError>>
    where
        F: FnMut(&mut Progress<'_>) -> Result<T, StageError>,
    {
        let path = progress.record.path.clone();
        let events = progress.events.clone();
        let label = format!("{} of {}", stage, path.display());
        let result = retry(
            &self.retry,
            &self.cancel,
            &label,
            |attempt, error: &StageError| {
                events.send(Event::File(FileEvent::Retrying {
                    path: path.clone(),
                    operation: stage.to_string(),
                    attempt,
                    message: error.to_string(),
                }))
            },
            |_| operation(progress),
        );
        if let Ok(done) = &result {
            progress.retries += done.attempts - 1;
        }
        result
    }

    /// Try each metadata tool in preference order
    fn strip_once(
        &self,
        record: &ImageRecord,
        area: &mut ScratchArea,
    ) -> Result<(String, PathBuf), StageError> {
        let stage = StageKind::Strip.as_str();
        let mut last: Option<ToolError> = None;

        for tool in &self.toolbox.metadata {
            if self.cancel.is_cancelled() {
                return Err(StageError::Cancelled { stage });
            }
            let output = area.next_path("strip", record.format.extension());
            match tool.strip(&record.path, &output, record.format) {
                Ok(()) => return Ok((tool.name().to_string(), output)),
                Err(e) => {
                    warn!(
                        "{} could not strip {}: {}; trying next tool",
                        tool.name(),
                        record.path.display(),
                        e
                    );
                    last = Some(e);
                }
            }
        }

        match last {
            Some(last) => Err(StageError::Exhausted { stage, last }),
            None => Err(StageError::Tool {
                stage,
                source: ToolError::NotInstalled {
                    tool: "metadata tool".to_string(),
                },
            }),
        }
    }

    fn reencode_once(
        &self,
        record: &ImageRecord,
        input: &Path,
        area: &mut ScratchArea,
    ) -> Result<(String, PathBuf), StageError> {
        let output = area.next_path("reencode", record.format.extension());
        let options = ReencodeOptions {
            format: record.format,
            quality: self.target_quality,
        };
        self.toolbox
            .image
            .reencode(input, &output, &options)
            .map_err(|source| StageError::Tool {
                stage: StageKind::Reencode.as_str(),
                source,
            })?;
        Ok((self.toolbox.image.name().to_string(), output))
    }

    /// Run every applicable optimizer on `input` and keep the smallest
    /// verified result. Optimizer failures only cost the optimization.
    fn optimize(
        &self,
        progress: &mut Progress<'_>,
        input: &Path,
    ) -> Result<PathBuf, RetryError<StageError>> {
        let format = progress.record.format;
        let optimizers = self.toolbox.optimizers_for(format, self.allow_lossy);
        if optimizers.is_empty() {
            progress.record_stage(
                StageKind::Optimize,
                StageStatus::Skipped {
                    reason: format!("no optimizer for {}", format),
                },
            );
            return Ok(input.to_path_buf());
        }

        let mut best: Option<(PathBuf, u64, String, u32)> = None;
        let mut best_size = fs::metadata(input).map(|m| m.len()).unwrap_or(u64::MAX);

        for optimizer in optimizers {
            let attempt = self.with_retry(progress, StageKind::Optimize, |p| {
                let output = p.area.next_path("optimize", format.extension());
                optimizer
                    .optimize(input, &output, self.target_quality)
                    .map(|()| output)
                    .map_err(|source| StageError::Tool {
                        stage: StageKind::Optimize.as_str(),
                        source,
                    })
            });

            let Retried {
                value: output,
                attempts,
            } = match attempt {
                Ok(done) => done,
                Err(error @ RetryError::Cancelled { .. }) => return Err(error),
                Err(error) => {
                    warn!(
                        "{} gave up on {}: {}",
                        optimizer.name(),
                        progress.record.path.display(),
                        error
                    );
                    continue;
                }
            };

            if let Err(error) = self.verifier.verify(progress.record, &output) {
                warn!(
                    "{} output for {} rejected: {}",
                    optimizer.name(),
                    progress.record.path.display(),
                    error
                );
                continue;
            }

            let size = fs::metadata(&output).map(|m| m.len()).unwrap_or(u64::MAX);
            if size < best_size {
                best_size = size;
                best = Some((output, size, optimizer.name().to_string(), attempts));
            }
        }

        match best {
            Some((path, size, tool, attempts)) => {
                debug!(
                    "{} shrank {} to {} bytes",
                    tool,
                    progress.record.path.display(),
                    size
                );
                progress.record_stage(StageKind::Optimize, StageStatus::Done { tool, attempts });
                Ok(path)
            }
            None => {
                progress.record_stage(
                    StageKind::Optimize,
                    StageStatus::Skipped {
                        reason: "no smaller verified result".to_string(),
                    },
                );
                Ok(input.to_path_buf())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::FingerprintBuilder;
    use crate::core::scratch::ScratchRoot;
    use crate::core::tools::NativeImageTool;
    use crate::events::null_sender;
    use image::{Rgb, RgbImage};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn runner(cancel: CancellationToken) -> StageRunner {
        let toolbox = Toolbox::native();
        StageRunner::new(
            toolbox,
            IntegrityVerifier::new(Arc::new(NativeImageTool::new())),
            RetryPolicy::immediate(3),
            cancel,
            85,
            false,
        )
    }

    fn analyzed(dir: &TempDir, name: &str) -> ImageRecord {
        let path = dir.path().join(name);
        RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 90]))
            .save(&path)
            .unwrap();
        let hash = ContentHash::of_file(&path).unwrap();
        let (record, _) = FingerprintBuilder::without_metadata()
            .analyze(&path, hash)
            .unwrap();
        record
    }

    #[test]
    fn produces_verified_candidate() {
        let dir = TempDir::new().unwrap();
        let record = analyzed(&dir, "photo.png");
        let scratch = ScratchRoot::create_in(dir.path()).unwrap();
        let mut area = scratch.area().unwrap();

        let outcome = runner(CancellationToken::new()).run(&record, &mut area, &null_sender());

        let candidate = outcome.result.unwrap();
        assert!(candidate.path.starts_with(area.path()));
        assert_eq!(candidate.size, fs::metadata(&candidate.path).unwrap().len());
        assert_eq!(outcome.retries, 0);

        let kinds: Vec<StageKind> = outcome.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            kinds,
            vec![StageKind::Strip, StageKind::Reencode, StageKind::Optimize]
        );
        assert!(matches!(
            &outcome.stages[0].status,
            StageStatus::Done { tool, attempts: 1 } if tool == "native-metadata"
        ));
        assert!(matches!(
            outcome.stages[2].status,
            StageStatus::Skipped { .. }
        ));
        assert_eq!(outcome.working_path, Some(candidate.path));
    }

    #[test]
    fn original_is_only_read() {
        let dir = TempDir::new().unwrap();
        let record = analyzed(&dir, "photo.png");
        let before = fs::read(&record.path).unwrap();
        let scratch = ScratchRoot::create_in(dir.path()).unwrap();
        let mut area = scratch.area().unwrap();

        runner(CancellationToken::new()).run(&record, &mut area, &null_sender());

        assert_eq!(fs::read(&record.path).unwrap(), before);
    }

    #[test]
    fn cancelled_before_strip() {
        let dir = TempDir::new().unwrap();
        let record = analyzed(&dir, "photo.png");
        let scratch = ScratchRoot::create_in(dir.path()).unwrap();
        let mut area = scratch.area().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = runner(cancel).run(&record, &mut area, &null_sender());

        let entry = outcome.result.unwrap_err();
        assert_eq!(entry.reason, FailureReason::Cancelled);
        assert_eq!(outcome.stages.len(), 1);
        assert!(outcome.working_path.is_none());
    }

    #[test]
    fn unreadable_source_fails_strip() {
        let dir = TempDir::new().unwrap();
        let record = analyzed(&dir, "photo.png");
        fs::remove_file(&record.path).unwrap();
        let scratch = ScratchRoot::create_in(dir.path()).unwrap();
        let mut area = scratch.area().unwrap();

        let outcome = runner(CancellationToken::new()).run(&record, &mut area, &null_sender());

        let entry = outcome.result.unwrap_err();
        assert_eq!(entry.reason, FailureReason::Io);
        assert_eq!(entry.attempts, 3);
        assert!(matches!(
            outcome.stages[0].status,
            StageStatus::Failed { attempts: 3, .. }
        ));
    }
}
