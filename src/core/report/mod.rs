//! # Report Module
//!
//! End-of-run aggregation: the failure report, per-state counts and the
//! process exit code.
//!
//! Per-file failures never stop a run. They are collected here and shown
//! once, after every other file has been dealt with.

use crate::core::pipeline::{PipelineResult, TerminalState};
use crate::error::FailureReason;
use crate::events::PipelineSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Exit code when every file was committed or skipped
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when the failure report is non-empty
pub const EXIT_FAILURES: i32 = 1;
/// Exit code for fatal errors that stopped the run
pub const EXIT_FATAL: i32 = 2;

/// One file left untouched because of an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub path: PathBuf,
    pub reason: FailureReason,
    /// Attempts made by the operation that gave up
    pub attempts: u32,
    /// Human-readable error text
    pub detail: String,
}

/// All per-file failures of a run, ordered by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureReport {
    entries: Vec<FailureEntry>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: FailureEntry) {
        let at = self
            .entries
            .partition_point(|existing| existing.path <= entry.path);
        self.entries.insert(at, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FailureEntry> {
        self.entries.iter()
    }

    /// Failure entry for `path`, if it failed
    pub fn get(&self, path: &std::path::Path) -> Option<&FailureEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }
}

impl FromIterator<FailureEntry> for FailureReport {
    fn from_iter<I: IntoIterator<Item = FailureEntry>>(iter: I) -> Self {
        let mut report = FailureReport::new();
        for entry in iter {
            report.push(entry);
        }
        report
    }
}

/// Everything a run did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Unique id of this run, also attached to its log lines
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Directory that was processed
    pub root: PathBuf,
    /// One result per discovered file, ordered by input path
    pub results: Vec<PipelineResult>,
    pub failures: FailureReport,
    /// Nothing was committed or deleted
    pub dry_run: bool,
    /// The run was interrupted before every file finished
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl BatchReport {
    /// Assemble the report from per-file results
    pub fn from_results(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        root: PathBuf,
        mut results: Vec<PipelineResult>,
        dry_run: bool,
        cancelled: bool,
        duration_ms: u64,
    ) -> Self {
        results.sort_by(|a, b| a.input.cmp(&b.input));
        let failures = results
            .iter()
            .filter_map(|result| result.failure.clone())
            .collect();

        Self {
            run_id,
            started_at,
            root,
            results,
            failures,
            dry_run,
            cancelled,
            duration_ms,
        }
    }

    /// Files that ended in `state`
    pub fn count(&self, state: TerminalState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            total_files: self.results.len(),
            committed: self.count(TerminalState::Committed),
            already_sanitized: self.count(TerminalState::AlreadySanitized),
            duplicates: self.count(TerminalState::SkippedDuplicate),
            failed: self.count(TerminalState::Failed),
            bytes_saved: self.results.iter().map(PipelineResult::bytes_saved).sum(),
            duration_ms: self.duration_ms,
        }
    }

    /// 0 when nothing failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.failures.is_empty() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURES
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::PipelineResult;

    fn failed(path: &str) -> PipelineResult {
        PipelineResult::failed(
            PathBuf::from(path),
            Vec::new(),
            0,
            FailureEntry {
                path: PathBuf::from(path),
                reason: FailureReason::Corrupt,
                attempts: 1,
                detail: "bad".to_string(),
            },
        )
    }

    fn batch(results: Vec<PipelineResult>) -> BatchReport {
        BatchReport::from_results(
            Uuid::new_v4(),
            Utc::now(),
            PathBuf::from("/p"),
            results,
            false,
            false,
            5,
        )
    }

    #[test]
    fn failure_report_is_ordered_by_path() {
        let report: FailureReport = ["/p/c.jpg", "/p/a.jpg", "/p/b.jpg"]
            .iter()
            .map(|p| FailureEntry {
                path: PathBuf::from(p),
                reason: FailureReason::Io,
                attempts: 3,
                detail: String::new(),
            })
            .collect();

        let paths: Vec<_> = report.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/p/a.jpg"),
                PathBuf::from("/p/b.jpg"),
                PathBuf::from("/p/c.jpg")
            ]
        );
    }

    #[test]
    fn clean_run_exits_zero() {
        let report = batch(Vec::new());
        assert_eq!(report.exit_code(), EXIT_SUCCESS);
        assert_eq!(report.summary().total_files, 0);
    }

    #[test]
    fn any_failure_exits_non_zero() {
        let report = batch(vec![failed("/p/d.jpg")]);

        assert_eq!(report.exit_code(), EXIT_FAILURES);
        assert_eq!(report.summary().failed, 1);
        assert_eq!(
            report.failures.get(std::path::Path::new("/p/d.jpg")).unwrap().reason,
            FailureReason::Corrupt
        );
    }

    #[test]
    fn failure_report_serializes_as_a_list() {
        let report = batch(vec![failed("/p/d.jpg")]);
        let json = serde_json::to_value(&report.failures).unwrap();

        assert!(json.is_array());
        assert_eq!(json[0]["reason"], "corrupt");
    }
}
