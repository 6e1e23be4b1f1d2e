//! # CLI Module
//!
//! Command-line interface for the photo sanitizer.
//!
//! ## Usage
//! ```bash
//! # Deduplicate and sanitize a folder
//! photo-sanitize run ~/Exports
//!
//! # See what would happen without touching anything
//! photo-sanitize run ~/Exports --dry-run
//!
//! # Allow lossy optimizers, JSON report
//! photo-sanitize run ~/Exports --allow-lossy --quality 80 --output json
//! ```
//!
//! ## Exit codes
//! - `0` every file was committed or skipped
//! - `1` at least one file failed and was left untouched
//! - `2` the run could not start or was aborted

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use photo_sanitizer::core::pipeline::{Sanitizer, TerminalState};
use photo_sanitizer::core::report::{BatchReport, EXIT_FATAL};
use photo_sanitizer::core::retry::{CancellationToken, DelayPolicy, RetryPolicy};
use photo_sanitizer::events::{Event, EventChannel, FileEvent, PipelineEvent, ScanEvent};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Photo Sanitizer - deduplicate and scrub metadata without losing a photo
#[derive(Parser, Debug)]
#[command(name = "photo-sanitize")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deduplicate and sanitize the images directly inside a directory
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory to process (not recursive)
    directory: PathBuf,

    /// Parallel workers (default: available CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Attempts per operation before a file is given up on
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Use a fixed delay between attempts, in milliseconds
    #[arg(long, value_name = "MS")]
    fixed_delay: Option<u64>,

    /// Timeout for each external tool invocation, in seconds
    #[arg(long, default_value = "60", value_name = "SECS")]
    tool_timeout: u64,

    /// Encoder quality for re-encoding and lossy optimizers (1-100)
    #[arg(short, long, default_value = "85")]
    quality: u8,

    /// Allow optimizers that discard image information
    #[arg(long)]
    allow_lossy: bool,

    /// Process everything in scratch but commit and delete nothing
    #[arg(long)]
    dry_run: bool,

    /// Include hidden files
    #[arg(long)]
    include_hidden: bool,

    /// Require exiftool/exiv2 and ImageMagick instead of falling back to built-ins
    #[arg(long)]
    external_only: bool,

    /// Required free scratch space as a multiple of the largest image
    #[arg(long, default_value = "2.0", value_name = "FACTOR")]
    min_free_space: f64,

    /// Output format
    #[arg(short, long, default_value = "pretty")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON report for scripting
    Json,
}

/// Run the CLI and return the process exit code
pub fn run() -> i32 {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_sanitize(args),
    }
}

fn run_sanitize(args: RunArgs) -> i32 {
    photo_sanitizer::init_tracing(if args.verbose { "debug" } else { "warn" });
    let term = Term::stderr();
    let pretty = matches!(args.output, OutputFormat::Pretty);

    if pretty {
        term.write_line(&format!(
            "{} {}",
            style("Photo Sanitizer").bold().cyan(),
            style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim()
        ))
        .ok();
        if args.dry_run {
            term.write_line(&format!("{}", style("Dry run: nothing will be changed").yellow()))
                .ok();
        }
        term.write_line("").ok();
    }

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not install interrupt handler: {}", e);
    }

    let delay = match args.fixed_delay {
        Some(ms) => DelayPolicy::Fixed(Duration::from_millis(ms)),
        None => RetryPolicy::default().delay,
    };
    let mut builder = Sanitizer::builder()
        .root(&args.directory)
        .retry(RetryPolicy {
            max_attempts: args.retries,
            delay,
        })
        .tool_timeout(Duration::from_secs(args.tool_timeout))
        .target_quality(args.quality)
        .allow_lossy(args.allow_lossy)
        .dry_run(args.dry_run)
        .include_hidden(args.include_hidden)
        .external_only(args.external_only)
        .min_free_space_factor(args.min_free_space)
        .cancellation(cancel);
    if let Some(workers) = args.workers {
        builder = builder.workers(workers);
    }

    let sanitizer = match builder.build() {
        Ok(sanitizer) => sanitizer,
        Err(e) => return fatal(&term, &e),
    };

    // Set up event handling
    let (sender, receiver) = EventChannel::new();

    let progress = if pretty {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Some(pb)
    } else {
        None
    };

    let progress_clone = progress.clone();
    let verbose = args.verbose;

    // The renderer only observes; the run never waits on it
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(pb) = progress_clone.as_ref() else {
                continue;
            };
            match event {
                Event::Scan(ScanEvent::Completed { total_files }) => {
                    pb.set_length(total_files as u64);
                }
                Event::Pipeline(PipelineEvent::PhaseChanged { phase, .. }) => {
                    pb.set_message(phase.to_string());
                }
                Event::File(FileEvent::Finished(result)) => {
                    pb.inc(1);
                    if verbose {
                        pb.println(format!(
                            "  {} {}",
                            state_marker(result.state),
                            display_path(&result.input)
                        ));
                    }
                }
                Event::File(FileEvent::Retrying {
                    path,
                    operation,
                    attempt,
                    message,
                }) if verbose => {
                    pb.println(format!(
                        "  {} {} of {} failed (attempt {}): {}",
                        style("↻").yellow(),
                        operation,
                        display_path(&path),
                        attempt,
                        message
                    ));
                }
                Event::Pipeline(PipelineEvent::Cancelled) => {
                    pb.set_message("Cancelling...");
                }
                Event::Pipeline(PipelineEvent::Completed { .. })
                | Event::Pipeline(PipelineEvent::Error { .. }) => {
                    pb.finish_and_clear();
                }
                _ => {}
            }
        }
    });

    let result = sanitizer.run_with_events(&sender);

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let report = match result {
        Ok(report) => report,
        Err(e) => return fatal(&term, &e),
    };

    match args.output {
        OutputFormat::Pretty => print_pretty_report(&term, &report),
        OutputFormat::Json => print_json_report(&report),
    }

    report.exit_code()
}

fn fatal(term: &Term, error: &photo_sanitizer::SanitizerError) -> i32 {
    term.write_line(&format!("{} {}", style("Error:").red().bold(), error))
        .ok();
    EXIT_FATAL
}

fn print_pretty_report(term: &Term, report: &BatchReport) {
    let summary = report.summary();
    let heading = if report.cancelled {
        format!("{} Run Cancelled", style("!").yellow().bold())
    } else {
        format!("{} Run Complete", style("✓").green().bold())
    };
    term.write_line(&heading).ok();
    term.write_line("").ok();

    let verb = if report.dry_run { "would be " } else { "" };
    term.write_line(&format!(
        "  {} images found in {:.1}s",
        style(summary.total_files).cyan(),
        summary.duration_ms as f64 / 1000.0
    ))
    .ok();
    term.write_line(&format!(
        "  {} {}sanitized and committed",
        style(summary.committed).cyan(),
        verb
    ))
    .ok();
    term.write_line(&format!(
        "  {} already sanitized",
        style(summary.already_sanitized).cyan()
    ))
    .ok();
    term.write_line(&format!(
        "  {} duplicates {}removed",
        style(summary.duplicates).cyan(),
        verb
    ))
    .ok();
    term.write_line(&format!(
        "  {} {}saved",
        style(format_bytes(summary.bytes_saved)).yellow(),
        verb
    ))
    .ok();
    term.write_line("").ok();

    if report.failures.is_empty() {
        term.write_line(&format!("  {} No failures", style("✓").green()))
            .ok();
        return;
    }

    term.write_line(&format!(
        "{}",
        style(format!("Failed ({}), left untouched:", report.failures.len()))
            .bold()
            .red()
    ))
    .ok();
    for entry in report.failures.iter() {
        term.write_line(&format!(
            "  {} {} {} {}",
            style("✗").red(),
            display_path(&entry.path),
            style(format!("[{}]", entry.reason)).yellow(),
            style(format!("after {} attempt(s): {}", entry.attempts, entry.detail)).dim()
        ))
        .ok();
    }
}

fn print_json_report(report: &BatchReport) {
    let output = serde_json::json!({
        "summary": report.summary(),
        "report": report,
    });

    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize report: {}", e),
    }
}

fn state_marker(state: TerminalState) -> String {
    match state {
        TerminalState::Committed => style("✓").green().to_string(),
        TerminalState::AlreadySanitized => style("=").dim().to_string(),
        TerminalState::SkippedDuplicate => style("○").dim().to_string(),
        TerminalState::Failed => style("✗").red().to_string(),
    }
}

fn display_path(path: &Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf)) {
        Some(relative) => format!("~/{}", relative.display()),
        None => path.display().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
