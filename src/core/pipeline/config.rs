//! Run configuration and the builder that assembles a [`Sanitizer`].

use super::executor::Sanitizer;
use crate::core::retry::{CancellationToken, RetryPolicy};
use crate::core::tools::Toolbox;
use crate::error::SanitizerError;
use std::path::PathBuf;
use std::time::Duration;

/// Everything that shapes a run
#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    /// Directory whose direct children are processed
    pub root: PathBuf,
    /// Parallel workers
    pub workers: usize,
    /// Retry policy for every retried operation
    pub retry: RetryPolicy,
    /// Upper bound on any single external tool invocation
    pub tool_timeout: Duration,
    /// Encoder quality for re-encoding and lossy optimization (1-100)
    pub target_quality: u8,
    /// Allow optimizers that discard image information
    pub allow_lossy: bool,
    /// Run everything in scratch; commit and delete nothing
    pub dry_run: bool,
    /// Free scratch space required, as a multiple of the largest input
    pub min_free_space_factor: f64,
    /// Process dot-files too
    pub include_hidden: bool,
    /// Refuse to fall back to in-process tools
    pub external_only: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            workers: default_workers(),
            retry: RetryPolicy::default(),
            tool_timeout: Duration::from_secs(60),
            target_quality: 85,
            allow_lossy: false,
            dry_run: false,
            min_free_space_factor: 2.0,
            include_hidden: false,
            external_only: false,
        }
    }
}

impl SanitizeConfig {
    /// Reject settings no run could honour
    pub fn validate(&self) -> Result<(), SanitizerError> {
        if self.workers == 0 {
            return Err(SanitizerError::Config("workers must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SanitizerError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.target_quality) {
            return Err(SanitizerError::Config(format!(
                "target quality must be between 1 and 100, got {}",
                self.target_quality
            )));
        }
        if self.min_free_space_factor.is_nan() || self.min_free_space_factor < 1.0 {
            return Err(SanitizerError::Config(format!(
                "free space factor must be at least 1.0, got {}",
                self.min_free_space_factor
            )));
        }
        if self.tool_timeout.is_zero() {
            return Err(SanitizerError::Config("tool timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Builder for [`Sanitizer`]
#[derive(Default)]
pub struct SanitizerBuilder {
    config: SanitizeConfig,
    toolbox: Option<Toolbox>,
    cancel: Option<CancellationToken>,
}

impl SanitizerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory to process
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn target_quality(mut self, quality: u8) -> Self {
        self.config.target_quality = quality;
        self
    }

    pub fn allow_lossy(mut self, allow: bool) -> Self {
        self.config.allow_lossy = allow;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn min_free_space_factor(mut self, factor: f64) -> Self {
        self.config.min_free_space_factor = factor;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.config.include_hidden = include;
        self
    }

    pub fn external_only(mut self, external_only: bool) -> Self {
        self.config.external_only = external_only;
        self
    }

    /// Use these tools instead of probing `PATH`
    pub fn toolbox(mut self, toolbox: Toolbox) -> Self {
        self.toolbox = Some(toolbox);
        self
    }

    /// Share a cancellation token, e.g. with an interrupt handler
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SanitizeConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and resolve the toolbox
    pub fn build(self) -> Result<Sanitizer, SanitizerError> {
        self.config.validate()?;
        let toolbox = match self.toolbox {
            Some(toolbox) => {
                toolbox.validate()?;
                toolbox
            }
            None => Toolbox::discover(
                self.config.tool_timeout,
                self.config.allow_lossy,
                self.config.external_only,
            )?,
        };
        Ok(Sanitizer::new(
            self.config,
            toolbox,
            self.cancel.unwrap_or_default(),
        ))
    }
}
