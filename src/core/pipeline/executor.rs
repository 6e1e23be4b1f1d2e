//! Pipeline execution implementation.

use super::config::{SanitizeConfig, SanitizerBuilder};
use super::stages::StageRunner;
use super::{PipelineResult, TerminalState};
use crate::core::fingerprint::{FingerprintBuilder, ImageRecord};
use crate::core::hasher::ContentHash;
use crate::core::index::{Admission, DuplicateIndex, DuplicateKind};
use crate::core::replace::{committed_path, is_already_sanitized, AtomicReplacer};
use crate::core::report::{BatchReport, FailureEntry};
use crate::core::retry::{retry, CancellationToken, Retried, RetryError};
use crate::core::scanner::{DirectoryScanner, ScanConfig, ScannedFile, Sniffed};
use crate::core::scratch::{ensure_free_space, ScratchRoot};
use crate::core::tools::Toolbox;
use crate::core::verify::IntegrityVerifier;
use crate::error::{
    Classify, FailureReason, FingerprintError, ReplaceError, SanitizerError, ScanError,
};
use crate::events::{
    null_sender, Event, EventSender, FileEvent, PipelineEvent, PipelinePhase,
};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

/// Work handed to the sanitize phase
enum Job {
    Sanitize {
        record: ImageRecord,
        retries: u32,
    },
    Discard {
        file: ScannedFile,
        canonical: PathBuf,
        kind: DuplicateKind,
        retries: u32,
    },
}

impl Job {
    fn path(&self) -> &Path {
        match self {
            Job::Sanitize { record, .. } => &record.path,
            Job::Discard { file, .. } => &file.path,
        }
    }
}

/// A byte-identical file waiting to learn whether its canonical is usable
struct ExactDuplicate {
    file: ScannedFile,
    canonical: PathBuf,
    retries: u32,
}

/// Deduplicates and sanitizes one directory
pub struct Sanitizer {
    config: SanitizeConfig,
    toolbox: Toolbox,
    cancel: CancellationToken,
}

impl Sanitizer {
    pub(super) fn new(config: SanitizeConfig, toolbox: Toolbox, cancel: CancellationToken) -> Self {
        Self {
            config,
            toolbox,
            cancel,
        }
    }

    /// Create a new sanitizer builder
    pub fn builder() -> SanitizerBuilder {
        SanitizerBuilder::new()
    }

    pub fn config(&self) -> &SanitizeConfig {
        &self.config
    }

    /// Token that stops this sanitizer when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run without events
    pub fn run(&self) -> Result<BatchReport, SanitizerError> {
        self.run_with_events(&null_sender())
    }

    /// Run with event reporting.
    ///
    /// Fatal problems (bad root, no scratch space) return `Err` before any
    /// file is touched. Everything else ends up in the report.
    pub fn run_with_events(&self, events: &EventSender) -> Result<BatchReport, SanitizerError> {
        let start_time = Instant::now();
        events.send(Event::Pipeline(PipelineEvent::Started));

        let result = self.execute(events, start_time);
        match &result {
            Ok(report) => {
                if report.cancelled {
                    events.send(Event::Pipeline(PipelineEvent::Cancelled));
                }
                events.send(Event::Pipeline(PipelineEvent::Completed {
                    summary: report.summary(),
                }));
            }
            Err(SanitizerError::Cancelled) => {
                events.send(Event::Pipeline(PipelineEvent::Cancelled));
            }
            Err(e) => {
                events.send(Event::Pipeline(PipelineEvent::Error {
                    message: e.to_string(),
                }));
            }
        }
        result
    }

    fn execute(&self, events: &EventSender, start_time: Instant) -> Result<BatchReport, SanitizerError> {
        if self.cancel.is_cancelled() {
            return Err(SanitizerError::Cancelled);
        }
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let _span = info_span!("run", %run_id).entered();

        // Phase 1: Scanning
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Scanning,
            total: 0,
        }));
        let root = self
            .config
            .root
            .canonicalize()
            .map_err(|e| unresolvable_root(&self.config.root, e))?;
        let scanner = DirectoryScanner::new(ScanConfig {
            include_hidden: self.config.include_hidden,
        });
        let files = scanner.scan_with_events(&root, events)?;
        info!("Found {} candidate files in {}", files.len(), root.display());

        if self.cancel.is_cancelled() {
            return Err(SanitizerError::Cancelled);
        }

        let largest = files.iter().map(|f| f.size).max().unwrap_or(0);
        ensure_free_space(
            &root,
            largest,
            self.config.min_free_space_factor,
            self.config.workers,
        )?;
        let scratch = ScratchRoot::create_in(&root)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| SanitizerError::Config(format!("cannot start worker pool: {}", e)))?;

        let results = pool.install(|| self.process(files, &scratch, events));

        Ok(BatchReport::from_results(
            run_id,
            started_at,
            root,
            results,
            self.config.dry_run,
            self.cancel.is_cancelled(),
            start_time.elapsed().as_millis() as u64,
        ))
    }

    fn process(
        &self,
        files: Vec<ScannedFile>,
        scratch: &ScratchRoot,
        events: &EventSender,
    ) -> Vec<PipelineResult> {
        let index = DuplicateIndex::new();
        let mut finished = Vec::new();

        // Phase 2: content hashes
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Hashing,
            total: files.len(),
        }));
        let hashed: Vec<_> = files
            .into_par_iter()
            .map(|file| {
                let result = self.retried(&file.path, "hash", events, |_| {
                    ContentHash::of_file(&file.path).map_err(|source| FingerprintError::Unreadable {
                        path: file.path.clone(),
                        source,
                    })
                });
                events.send(Event::File(FileEvent::Hashed {
                    path: file.path.clone(),
                }));
                (file, result)
            })
            .collect();

        // Phase 3: exact duplicates, in path order
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Deduplicating,
            total: hashed.len(),
        }));
        let mut to_fingerprint = Vec::new();
        let mut exact_duplicates = Vec::new();
        for (file, hash) in hashed {
            let Retried { value: hash, attempts } = match hash {
                Ok(done) => done,
                Err(error) => {
                    finished.push(self.fail(&file.path, 0, "hash", &error, events));
                    continue;
                }
            };
            let retries = attempts - 1;

            // Only real images take the shortcut; two empty files are not duplicates
            if !matches!(file.sniffed, Sniffed::Image(_)) || file.size == 0 {
                to_fingerprint.push((file, hash, retries));
                continue;
            }
            match index.admit_exact(&file.path, &hash) {
                Admission::Admitted => to_fingerprint.push((file, hash, retries)),
                Admission::DuplicateOf { canonical, .. } => {
                    debug!(
                        "{} is byte-identical to {}",
                        file.path.display(),
                        canonical.display()
                    );
                    exact_duplicates.push(ExactDuplicate {
                        file,
                        canonical,
                        retries,
                    });
                }
            }
        }

        // Phase 4: fingerprints
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Fingerprinting,
            total: to_fingerprint.len(),
        }));
        let builder = match self.toolbox.metadata.first() {
            Some(tool) => FingerprintBuilder::new(tool.clone()),
            None => FingerprintBuilder::without_metadata(),
        };
        let fingerprinted: Vec<_> = to_fingerprint
            .into_par_iter()
            .map(|(file, hash, retries)| {
                let result = self.retried(&file.path, "fingerprint", events, |_| {
                    builder.analyze(&file.path, hash)
                });
                if result.is_ok() {
                    events.send(Event::File(FileEvent::Fingerprinted {
                        path: file.path.clone(),
                    }));
                }
                (file, hash, retries, result)
            })
            .collect();

        // Phase 5: perceptual duplicates, in path order
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Deduplicating,
            total: fingerprinted.len(),
        }));
        let mut jobs = Vec::new();
        let mut unusable: HashMap<PathBuf, FailureReason> = HashMap::new();
        for (file, hash, retries, result) in fingerprinted {
            let Retried {
                value: (record, fingerprint),
                attempts,
            } = match result {
                Ok(done) => done,
                Err(error) => {
                    unusable.insert(file.path.clone(), error.reason());
                    finished.push(self.fail(&file.path, retries, "fingerprint", &error, events));
                    continue;
                }
            };
            let retries = retries + attempts - 1;

            match index.admit(&record.path, &hash, &fingerprint) {
                Admission::Admitted => {
                    events.send(Event::File(FileEvent::Admitted {
                        path: record.path.clone(),
                    }));
                    jobs.push(Job::Sanitize { record, retries });
                }
                Admission::DuplicateOf { canonical, kind } => {
                    events.send(Event::File(FileEvent::Duplicate {
                        path: record.path.clone(),
                        canonical: canonical.clone(),
                    }));
                    jobs.push(Job::Discard {
                        file,
                        canonical,
                        kind,
                        retries,
                    });
                }
            }
        }

        // Byte-identical copies of a file that could not be fingerprinted
        // stay where they are and share its failure
        for duplicate in exact_duplicates {
            match unusable.get(&duplicate.canonical) {
                Some(&reason) => {
                    let entry = FailureEntry {
                        path: duplicate.file.path.clone(),
                        reason,
                        attempts: 1,
                        detail: format!(
                            "identical to {}, which could not be processed",
                            duplicate.canonical.display()
                        ),
                    };
                    finished.push(self.finish_failed(
                        PipelineResult::failed(
                            duplicate.file.path.clone(),
                            Vec::new(),
                            duplicate.retries,
                            entry,
                        ),
                        events,
                    ));
                }
                None => {
                    events.send(Event::File(FileEvent::Duplicate {
                        path: duplicate.file.path.clone(),
                        canonical: duplicate.canonical.clone(),
                    }));
                    jobs.push(Job::Discard {
                        file: duplicate.file,
                        canonical: duplicate.canonical,
                        kind: DuplicateKind::Exact,
                        retries: duplicate.retries,
                    });
                }
            }
        }
        jobs.sort_by(|a, b| a.path().cmp(b.path()));

        // Phase 6: sanitize, verify, commit
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Sanitizing,
            total: jobs.len(),
        }));
        let runner = StageRunner::new(
            self.toolbox.clone(),
            IntegrityVerifier::new(self.toolbox.image.clone()),
            self.config.retry,
            self.cancel.clone(),
            self.config.target_quality,
            self.config.allow_lossy,
        );
        let replacer = AtomicReplacer::new(self.toolbox.shredder.clone());

        let processed: Vec<PipelineResult> = jobs
            .into_par_iter()
            .map(|job| {
                let (mut result, retries) = match job {
                    Job::Sanitize { record, retries } => (
                        self.sanitize_one(&record, scratch, &runner, &replacer, events),
                        retries,
                    ),
                    Job::Discard {
                        file,
                        canonical,
                        kind,
                        retries,
                    } => (self.discard(&file, canonical, kind, &replacer), retries),
                };
                result.retries += retries;
                if result.failure.is_none() {
                    events.send(Event::File(FileEvent::Finished(result.clone())));
                    result
                } else {
                    self.finish_failed(result, events)
                }
            })
            .collect();

        finished.extend(processed);
        finished
    }

    /// Sanitize one admitted file and commit the result
    fn sanitize_one(
        &self,
        record: &ImageRecord,
        scratch: &ScratchRoot,
        runner: &StageRunner,
        replacer: &AtomicReplacer,
        events: &EventSender,
    ) -> PipelineResult {
        if self.cancel.is_cancelled() {
            return cancelled(&record.path);
        }
        if is_already_sanitized(&record.path, &record.content_hash) {
            debug!("{} is already sanitized", record.path.display());
            return PipelineResult::already_sanitized(record.path.clone(), record.size);
        }

        let mut area = match scratch.area() {
            Ok(area) => area,
            Err(e) => {
                return PipelineResult::failed(
                    record.path.clone(),
                    Vec::new(),
                    0,
                    FailureEntry {
                        path: record.path.clone(),
                        reason: FailureReason::Io,
                        attempts: 1,
                        detail: format!("cannot create scratch area: {}", e),
                    },
                )
            }
        };

        let outcome = runner.run(record, &mut area, events);
        let candidate = match outcome.result {
            Ok(candidate) => candidate,
            Err(entry) => {
                return PipelineResult {
                    working_path: outcome.working_path,
                    ..PipelineResult::failed(record.path.clone(), outcome.stages, outcome.retries, entry)
                }
            }
        };

        let destination = committed_path(&record.path, &candidate.content_hash, record.format);
        let mut result = PipelineResult {
            final_path: Some(destination.clone()),
            working_path: outcome.working_path,
            stages: outcome.stages,
            retries: outcome.retries,
            bytes_after: candidate.size,
            ..PipelineResult::new(record.path.clone(), TerminalState::Committed, record.size)
        };

        if self.config.dry_run {
            info!(
                "Would commit {} as {}",
                record.path.display(),
                destination.display()
            );
            return result;
        }

        // Last point at which cancellation is honoured
        if self.cancel.is_cancelled() {
            return PipelineResult {
                stages: result.stages,
                retries: result.retries,
                working_path: result.working_path,
                ..cancelled(&record.path)
            };
        }

        let placed = retry(
            &self.config.retry,
            &CancellationToken::new(),
            &format!("placing {}", destination.display()),
            |attempt, error: &ReplaceError| {
                events.send(Event::File(FileEvent::Retrying {
                    path: record.path.clone(),
                    operation: "place".to_string(),
                    attempt,
                    message: error.to_string(),
                }))
            },
            |_| replacer.place(&candidate.path, &destination),
        );
        match placed {
            Ok(done) => result.retries += done.attempts - 1,
            Err(error) => {
                return PipelineResult {
                    stages: result.stages,
                    retries: result.retries + error.attempts().saturating_sub(1),
                    working_path: result.working_path,
                    ..PipelineResult::failed(
                        record.path.clone(),
                        Vec::new(),
                        0,
                        failure_entry(&record.path, "commit", &error),
                    )
                };
            }
        }

        // Point of no return: runs once, never retried
        if let Err(error) = replacer.destroy_original(&record.path, &destination) {
            result.state = TerminalState::Failed;
            result.failure = Some(FailureEntry {
                path: record.path.clone(),
                reason: error.reason(),
                attempts: 1,
                detail: error.to_string(),
            });
            return result;
        }

        info!(
            "Committed {} as {} ({} -> {} bytes)",
            record.path.display(),
            destination.display(),
            record.size,
            candidate.size
        );
        result
    }

    /// Remove a duplicate in favour of its canonical file
    fn discard(
        &self,
        file: &ScannedFile,
        canonical: PathBuf,
        kind: DuplicateKind,
        replacer: &AtomicReplacer,
    ) -> PipelineResult {
        if self.config.dry_run {
            info!(
                "Would remove {} (duplicate of {})",
                file.path.display(),
                canonical.display()
            );
            return PipelineResult::duplicate(file.path.clone(), canonical, kind, file.size);
        }
        if self.cancel.is_cancelled() {
            return cancelled(&file.path);
        }

        match replacer.discard_duplicate(&file.path) {
            Ok(()) => {
                info!(
                    "Removed {} (duplicate of {})",
                    file.path.display(),
                    canonical.display()
                );
                PipelineResult::duplicate(file.path.clone(), canonical, kind, file.size)
            }
            Err(error) => PipelineResult::failed(
                file.path.clone(),
                Vec::new(),
                0,
                FailureEntry {
                    path: file.path.clone(),
                    reason: error.reason(),
                    attempts: 1,
                    detail: error.to_string(),
                },
            ),
        }
    }

    fn retried<T, F>(
        &self,
        path: &Path,
        operation: &str,
        events: &EventSender,
        op: F,
    ) -> Result<Retried<T>, RetryError<FingerprintError>>
    where
        F: FnMut(u32) -> Result<T, FingerprintError>,
    {
        retry(
            &self.config.retry,
            &self.cancel,
            &format!("{} of {}", operation, path.display()),
            |attempt, error: &FingerprintError| {
                events.send(Event::File(FileEvent::Retrying {
                    path: path.to_path_buf(),
                    operation: operation.to_string(),
                    attempt,
                    message: error.to_string(),
                }))
            },
            op,
        )
    }

    fn fail<E: Classify + Display>(
        &self,
        path: &Path,
        retries: u32,
        operation: &str,
        error: &RetryError<E>,
        events: &EventSender,
    ) -> PipelineResult {
        let entry = failure_entry(path, operation, error);
        let retries = retries + error.attempts().saturating_sub(1);
        self.finish_failed(
            PipelineResult::failed(path.to_path_buf(), Vec::new(), retries, entry),
            events,
        )
    }

    /// Log and publish a failed result
    fn finish_failed(&self, result: PipelineResult, events: &EventSender) -> PipelineResult {
        if let Some(entry) = &result.failure {
            error!(
                "{} failed ({}): {}",
                entry.path.display(),
                entry.reason,
                entry.detail
            );
        }
        events.send(Event::File(FileEvent::Finished(result.clone())));
        result
    }
}

impl std::fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sanitizer")
            .field("config", &self.config)
            .field("toolbox", &self.toolbox)
            .finish()
    }
}

fn failure_entry<E: Classify + Display>(
    path: &Path,
    operation: &str,
    error: &RetryError<E>,
) -> FailureEntry {
    FailureEntry {
        path: path.to_path_buf(),
        reason: error.reason(),
        attempts: error.attempts(),
        detail: format!("{}: {}", operation, error),
    }
}

fn unresolvable_root(root: &Path, source: std::io::Error) -> ScanError {
    let path = root.to_path_buf();
    match source.kind() {
        ErrorKind::NotFound => ScanError::DirectoryNotFound { path },
        ErrorKind::PermissionDenied => ScanError::PermissionDenied { path },
        _ => ScanError::ReadDirectory { path, source },
    }
}

fn cancelled(path: &Path) -> PipelineResult {
    PipelineResult::failed(
        path.to_path_buf(),
        Vec::new(),
        0,
        FailureEntry {
            path: path.to_path_buf(),
            reason: FailureReason::Cancelled,
            attempts: 0,
            detail: "run was cancelled before this file was committed".to_string(),
        },
    )
}
