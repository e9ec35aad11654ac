//! Offload - Command-line interface for the transfer queue.
//!
//! Queues every `--src` onto every `--dst`, runs the queue to the end and
//! reports progress on stderr. Conflicts and failures are either asked on
//! the terminal or answered by a fixed policy.

use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use engine::{
    ChecksumAlgorithm, Conflict, ConflictChoice, Decisions, EngineConfig, Failure, FailureChoice,
    JobId, QueueEvent, TransferQueue, TransferStatus, Volume,
};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Offload - verified copies of cards and folders
#[derive(Parser, Debug)]
#[command(name = "offload")]
#[command(version = "0.1.0")]
#[command(about = "Copy source folders to one or more destinations and verify every file")]
struct Args {
    /// Source folder (repeat for several sources)
    #[arg(long, value_name = "PATH", required = true)]
    src: Vec<PathBuf>,

    /// Destination folder (repeat for several destinations)
    #[arg(long, value_name = "PATH", required = true)]
    dst: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Checksum algorithm: sha256, blake3, md5 or xxh3 (overrides the config file)
    #[arg(long, value_name = "ALGORITHM")]
    hash: Option<String>,

    /// Rush mode: verify with xxh3 regardless of --hash
    #[arg(long)]
    rush: bool,

    /// Existing destination folder: ask, replace, keep-both or skip
    #[arg(long, value_name = "POLICY", default_value = "ask")]
    on_conflict: String,

    /// Failed transfer: ask, skip or stop
    #[arg(long, value_name = "POLICY", default_value = "ask")]
    on_failure: String,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,
}

/// A decision that is either fixed up front or asked for each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Policy<T> {
    Ask,
    Fixed(T),
}

fn parse_conflict_policy(value: &str) -> Result<Policy<ConflictChoice>, String> {
    match value.to_lowercase().as_str() {
        "ask" => Ok(Policy::Ask),
        "replace" => Ok(Policy::Fixed(ConflictChoice::Replace)),
        "keep-both" | "keepboth" => Ok(Policy::Fixed(ConflictChoice::KeepBoth)),
        "skip" => Ok(Policy::Fixed(ConflictChoice::Skip)),
        _ => Err(format!(
            "Invalid conflict policy '{}'. Must be 'ask', 'replace', 'keep-both', or 'skip'",
            value
        )),
    }
}

fn parse_failure_policy(value: &str) -> Result<Policy<FailureChoice>, String> {
    match value.to_lowercase().as_str() {
        "ask" => Ok(Policy::Ask),
        "skip" => Ok(Policy::Fixed(FailureChoice::Skip)),
        "stop" => Ok(Policy::Fixed(FailureChoice::Stop)),
        "retry" => Err(
            "Policy 'retry' is only available interactively. Use 'ask', 'skip', or 'stop'"
                .to_string(),
        ),
        _ => Err(format!(
            "Invalid failure policy '{}'. Must be 'ask', 'skip', or 'stop'",
            value
        )),
    }
}

fn parse_conflict_answer(answer: &str) -> Option<ConflictChoice> {
    match answer {
        "r" | "replace" => Some(ConflictChoice::Replace),
        "k" | "keep" | "keep-both" => Some(ConflictChoice::KeepBoth),
        "s" | "skip" => Some(ConflictChoice::Skip),
        _ => None,
    }
}

fn parse_failure_answer(answer: &str) -> Option<FailureChoice> {
    match answer {
        "r" | "retry" => Some(FailureChoice::Retry),
        "s" | "skip" => Some(FailureChoice::Skip),
        "t" | "stop" => Some(FailureChoice::Stop),
        _ => None,
    }
}

/// Terminal implementation of the engine's decision provider.
///
/// An unreadable or unrecognized answer is returned as `None`, which the
/// queue treats as Skip for conflicts and Stop for failures.
struct CliDecisions {
    on_conflict: Policy<ConflictChoice>,
    on_failure: Policy<FailureChoice>,
    input: Mutex<Box<dyn BufRead + Send>>,
}

impl CliDecisions {
    fn new(
        on_conflict: Policy<ConflictChoice>,
        on_failure: Policy<FailureChoice>,
        input: Box<dyn BufRead + Send>,
    ) -> Self {
        CliDecisions {
            on_conflict,
            on_failure,
            input: Mutex::new(input),
        }
    }

    fn ask(&self, question: &str) -> Option<String> {
        eprintln!();
        eprint!("{} ", question);
        let _ = io::stderr().flush();

        let mut input = self.input.lock().ok()?;
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_lowercase()),
        }
    }
}

impl Decisions for CliDecisions {
    fn resolve_conflict(&self, conflict: &Conflict) -> Option<ConflictChoice> {
        match self.on_conflict {
            Policy::Fixed(choice) => Some(choice),
            Policy::Ask => {
                let answer = self.ask(&format!(
                    "Destination {} already exists. [r]eplace, [k]eep both, [s]kip?",
                    conflict.destination.display()
                ))?;
                parse_conflict_answer(&answer)
            }
        }
    }

    fn resolve_failure(&self, failure: &Failure) -> Option<FailureChoice> {
        match self.on_failure {
            Policy::Fixed(choice) => Some(choice),
            Policy::Ask => {
                let answer = self.ask(&format!(
                    "{} -> {} failed: {}. [r]etry, [s]kip, s[t]op?",
                    failure.job.source_name,
                    failure.job.destination_path.display(),
                    failure.error
                ))?;
                parse_failure_answer(&answer)
            }
        }
    }
}

/// Renders queue events to stderr.
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    last_progress_update: Option<Instant>,
    labels: HashMap<JobId, String>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            last_progress_update: None,
            labels: HashMap::new(),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!(
            "[{}{}] {}%",
            "=".repeat(filled),
            " ".repeat(empty),
            percent
        )
    }

    fn label(&mut self, queue: &TransferQueue, job_id: JobId) -> String {
        if let Some(label) = self.labels.get(&job_id) {
            return label.clone();
        }
        let label = match queue.job(job_id) {
            Some(job) => format!("{} -> {}", job.source_name, job.destination_path.display()),
            None => job_id.to_string(),
        };
        self.labels.insert(job_id, label.clone());
        label
    }

    fn handle(&mut self, queue: &TransferQueue, event: &QueueEvent) {
        match event {
            QueueEvent::JobAdded { job_id, duplicate } => {
                let label = self.label(queue, *job_id);
                if *duplicate {
                    eprintln!("Queued (duplicate): {}", label);
                } else if self.verbose {
                    eprintln!("Queued: {}", label);
                }
            }
            QueueEvent::JobEnumerated {
                job_id,
                file_count,
                total_size,
            } => {
                if self.verbose {
                    let label = self.label(queue, *job_id);
                    eprintln!(
                        "Found {} files ({}) for {}",
                        file_count,
                        Self::format_bytes(*total_size),
                        label
                    );
                }
            }
            QueueEvent::EnumerationFailed {
                source_path,
                message,
                ..
            } => {
                eprintln!("Could not read {}: {}", source_path.display(), message);
            }
            QueueEvent::StatusChanged { job_id, status } => {
                self.on_status(queue, *job_id, *status);
            }
            QueueEvent::Progress {
                copied_size,
                total_size,
                ..
            } => self.on_progress(*copied_size, *total_size),
            QueueEvent::JobsRemoved { .. } | QueueEvent::RunningChanged { .. } => {}
        }
    }

    fn on_status(&mut self, queue: &TransferQueue, job_id: JobId, status: TransferStatus) {
        match status {
            TransferStatus::Preparing => {
                self.labels.remove(&job_id);
                eprintln!();
                eprintln!("Preparing {}", self.label(queue, job_id));
            }
            TransferStatus::Transferring => {
                self.labels.remove(&job_id);
                if let Some(job) = queue.job(job_id) {
                    eprintln!(
                        "  Copying {} files ({}) to {}",
                        job.files.len(),
                        Self::format_bytes(job.total_size),
                        job.destination_path.display()
                    );
                }
                self.last_progress_update = None;
            }
            TransferStatus::Verifying => {
                eprintln!();
                let algorithm = queue
                    .job(job_id)
                    .map(|job| job.checksum_algorithm.to_string())
                    .unwrap_or_default();
                eprintln!("  Verifying ({})", algorithm);
            }
            TransferStatus::Completed => eprintln!("  Completed"),
            TransferStatus::Cancelled => {
                eprintln!();
                eprintln!("  Cancelled");
            }
            TransferStatus::Failed => {
                eprintln!();
                let error = queue
                    .job(job_id)
                    .and_then(|job| job.error)
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                eprintln!("  Failed: {}", error);
            }
            TransferStatus::Queued => {
                if self.verbose {
                    eprintln!("  Requeued {}", self.label(queue, job_id));
                }
            }
        }
    }

    fn on_progress(&mut self, copied: u64, total: u64) {
        // Throttle progress updates to avoid spam (max once per 200ms), always show the last one
        let now = Instant::now();
        let due = self
            .last_progress_update
            .map_or(true, |last| now.duration_since(last).as_millis() >= 200);
        if !due && copied < total {
            return;
        }
        self.last_progress_update = Some(now);

        let percent = if total == 0 {
            100
        } else {
            (copied as f64 / total as f64 * 100.0) as u32
        };
        eprint!(
            "\r  Progress: {} | {}/{}",
            Self::print_progress_bar(percent),
            Self::format_bytes(copied),
            Self::format_bytes(total)
        );
        let _ = io::stderr().flush();
    }

    /// Print the final tally. Returns true when every job completed.
    fn summarize(&self, queue: &TransferQueue) -> bool {
        let jobs = queue.jobs();
        let count = |status: TransferStatus| jobs.iter().filter(|j| j.status == status).count();
        let completed = count(TransferStatus::Completed);
        let failed = count(TransferStatus::Failed);
        let cancelled = count(TransferStatus::Cancelled);
        let pending = jobs.len() - completed - failed - cancelled;
        let bytes: u64 = jobs
            .iter()
            .filter(|j| j.status == TransferStatus::Completed)
            .map(|j| j.total_size)
            .sum();

        eprintln!();
        eprintln!(
            "Summary: {} completed, {} failed, {} cancelled, {} not started",
            completed, failed, cancelled, pending
        );
        eprintln!("Bytes verified: {}", Self::format_bytes(bytes));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if failed > 0 {
            eprintln!();
            eprintln!("Failed transfers:");
            for job in jobs.iter().filter(|j| j.status == TransferStatus::Failed) {
                let message = job
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "(unknown error)".to_string());
                eprintln!("  {} -> {}: {}", job.source_name, job.destination_path.display(), message);
            }
        }

        !jobs.is_empty() && completed == jobs.len()
    }
}

const IDLE_POLL: Duration = Duration::from_millis(250);

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Parse arguments, run the queue and map the outcome to an exit code
fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let exit_code = match run_cli(&args, Box::new(io::BufReader::new(io::stdin()))) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn build_config(args: &Args) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };

    if let Some(hash) = &args.hash {
        config.checksum = hash.parse::<ChecksumAlgorithm>().map_err(|_| {
            format!(
                "Invalid hash algorithm '{}'. Must be 'sha256', 'blake3', 'md5', or 'xxh3'",
                hash
            )
        })?;
    }
    if args.rush {
        config.rush_mode = true;
    }
    info!(
        checksum = %config.effective_algorithm(),
        buffer_size = config.effective_buffer_size(),
        "configuration loaded"
    );
    Ok(config)
}

/// Main CLI logic - separated for testability.
///
/// `Ok(true)` when every job completed, `Ok(false)` when any failed, was
/// cancelled or never started, `Err` for usage and setup problems.
fn run_cli(args: &Args, input: Box<dyn BufRead + Send>) -> Result<bool, String> {
    for src in &args.src {
        if !src.exists() {
            return Err(format!("Source directory does not exist: {}", src.display()));
        }
        if !src.is_dir() {
            return Err(format!("Source is not a directory: {}", src.display()));
        }
    }
    for dst in &args.dst {
        if !dst.is_dir() {
            return Err(format!(
                "Destination directory does not exist: {}",
                dst.display()
            ));
        }
    }

    let config = build_config(args)?;
    if !config.effective_algorithm().is_cryptographic() {
        eprintln!(
            "Rush mode: verifying with {} (fast, not collision resistant)",
            config.effective_algorithm()
        );
    }
    let decisions = CliDecisions::new(
        parse_conflict_policy(&args.on_conflict)?,
        parse_failure_policy(&args.on_failure)?,
        input,
    );

    let queue = TransferQueue::new(config, Arc::new(decisions))
        .map_err(|e| format!("Could not start transfer queue: {}", e))?;
    let events = queue
        .subscribe()
        .map_err(|e| format!("Could not start transfer queue: {}", e))?;

    let sources: Vec<Volume> = args.src.iter().map(Volume::from_path).collect();
    let destinations: Vec<Volume> = args.dst.iter().map(Volume::from_path).collect();
    queue
        .queue_all_sources_all_destinations(&sources, &destinations)
        .map_err(|e| format!("Could not queue transfers: {}", e))?;
    queue.start();

    let mut progress = CliProgress::new(args.verbose);
    loop {
        match events.recv_timeout(IDLE_POLL) {
            Ok(QueueEvent::RunningChanged { running: false }) => break,
            Ok(event) => progress.handle(&queue, &event),
            // Start is a no-op if enumeration already emptied the queue.
            Err(RecvTimeoutError::Timeout) => {
                if !queue.is_running() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Flush anything published before the queue went idle.
    while let Ok(event) = events.try_recv() {
        progress.handle(&queue, &event);
    }

    let all_completed = progress.summarize(&queue);
    queue.shutdown();
    Ok(all_completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn args(src: Vec<PathBuf>, dst: Vec<PathBuf>) -> Args {
        Args {
            src,
            dst,
            config: None,
            hash: None,
            rush: false,
            on_conflict: "skip".to_string(),
            on_failure: "stop".to_string(),
            verbose: false,
        }
    }

    fn no_input() -> Box<dyn BufRead + Send> {
        Box::new(Cursor::new(Vec::new()))
    }

    fn source_with_file(name: &str, content: &str) -> TempDir {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(dir.path().join(name), content).expect("Failed to write file");
        dir
    }

    fn copies_in(dst: &TempDir) -> Vec<PathBuf> {
        fs::read_dir(dst.path())
            .expect("Failed to list destination")
            .map(|entry| entry.expect("Failed to read entry").path())
            .collect()
    }

    #[test]
    fn test_cli_with_valid_directories() {
        let src_dir = source_with_file("test.txt", "hello");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");

        let result = run_cli(
            &args(vec![src_dir.path().to_path_buf()], vec![dst_dir.path().to_path_buf()]),
            no_input(),
        );
        assert_eq!(result, Ok(true), "CLI should succeed with valid directories");

        let copies = copies_in(&dst_dir);
        assert_eq!(copies.len(), 1);
        assert_eq!(
            fs::read_to_string(copies[0].join("test.txt")).expect("Failed to read copy"),
            "hello"
        );
    }

    #[test]
    fn test_cli_copies_every_source_to_every_destination() {
        let first = source_with_file("a.mov", "a");
        let second = source_with_file("b.mov", "b");
        let dst_a = TempDir::new().expect("Failed to create temp dir");
        let dst_b = TempDir::new().expect("Failed to create temp dir");

        let mut args = args(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            vec![dst_a.path().to_path_buf(), dst_b.path().to_path_buf()],
        );
        args.hash = Some("blake3".to_string());

        assert_eq!(run_cli(&args, no_input()), Ok(true));
        assert_eq!(copies_in(&dst_a).len(), 2);
        assert_eq!(copies_in(&dst_b).len(), 2);
    }

    #[test]
    fn test_cli_with_config_file() {
        let src_dir = source_with_file("test.txt", "hello");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = config_dir.path().join("offload.toml");
        fs::write(&config_path, "rush_mode = true\nbuffer_size = 8192\n")
            .expect("Failed to write config");

        let mut args = args(vec![src_dir.path().to_path_buf()], vec![dst_dir.path().to_path_buf()]);
        args.config = Some(config_path);

        assert_eq!(run_cli(&args, no_input()), Ok(true));
    }

    #[test]
    fn test_cli_rejects_missing_source() {
        let dst_dir = TempDir::new().expect("Failed to create temp dir");

        let result = run_cli(
            &args(vec![PathBuf::from("/nonexistent/path")], vec![dst_dir.path().to_path_buf()]),
            no_input(),
        );
        assert!(result.is_err(), "CLI should reject missing source");
    }

    #[test]
    fn test_cli_rejects_missing_destination() {
        let src_dir = source_with_file("test.txt", "hello");

        let result = run_cli(
            &args(vec![src_dir.path().to_path_buf()], vec![PathBuf::from("/nonexistent/dst")]),
            no_input(),
        );
        assert!(result.is_err(), "CLI should reject missing destination");
    }

    #[test]
    fn test_cli_rejects_invalid_policy() {
        let src_dir = source_with_file("test.txt", "hello");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");

        let mut args = args(vec![src_dir.path().to_path_buf()], vec![dst_dir.path().to_path_buf()]);
        args.on_conflict = "overwrite".to_string();
        assert!(run_cli(&args, no_input()).is_err(), "CLI should reject invalid policy");

        args.on_conflict = "skip".to_string();
        args.on_failure = "retry".to_string();
        assert!(run_cli(&args, no_input()).is_err(), "CLI should reject fixed retry");
    }

    #[test]
    fn test_cli_rejects_invalid_hash_algorithm() {
        let src_dir = source_with_file("test.txt", "hello");
        let dst_dir = TempDir::new().expect("Failed to create temp dir");

        let mut args = args(vec![src_dir.path().to_path_buf()], vec![dst_dir.path().to_path_buf()]);
        args.hash = Some("crc32".to_string());

        let result = run_cli(&args, no_input());
        assert!(result.is_err(), "CLI should reject invalid hash algorithm");
    }

    #[test]
    fn test_prompted_conflict_answers() {
        let conflict = Conflict {
            job_id: JobId::nil(),
            destination: PathBuf::from("/Volumes/RAID/A001_20261019-101530-000"),
            name: "A001_20261019-101530-000".to_string(),
        };
        let ask = |input: &str| {
            CliDecisions::new(
                Policy::Ask,
                Policy::Ask,
                Box::new(Cursor::new(input.as_bytes().to_vec())),
            )
            .resolve_conflict(&conflict)
        };

        assert_eq!(ask("k\n"), Some(ConflictChoice::KeepBoth));
        assert_eq!(ask("Replace\n"), Some(ConflictChoice::Replace));
        assert_eq!(ask("  s \n"), Some(ConflictChoice::Skip));
        assert_eq!(ask("whatever\n"), None);
        assert_eq!(ask(""), None);
    }

    #[test]
    fn test_failure_answers() {
        assert_eq!(parse_failure_answer("r"), Some(FailureChoice::Retry));
        assert_eq!(parse_failure_answer("skip"), Some(FailureChoice::Skip));
        assert_eq!(parse_failure_answer("t"), Some(FailureChoice::Stop));
        assert_eq!(parse_failure_answer("q"), None);
        assert_eq!(
            parse_failure_policy("stop"),
            Ok(Policy::Fixed(FailureChoice::Stop))
        );
        assert_eq!(parse_conflict_policy("Keep-Both"), Ok(Policy::Fixed(ConflictChoice::KeepBoth)));
    }

    #[test]
    fn test_progress_formatting() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(
            CliProgress::print_progress_bar(50),
            format!("[{}{}] 50%", "=".repeat(10), " ".repeat(10))
        );
        assert_eq!(
            CliProgress::print_progress_bar(150),
            format!("[{}] 100%", "=".repeat(20))
        );
    }
}
