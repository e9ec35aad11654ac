//! The transfer queue.
//!
//! `TransferQueue` is a handle to a dedicated engine thread that owns every
//! job. All job-state changes happen on that thread; everything that can
//! block runs elsewhere and reports back through the engine's inbox:
//!
//! - one short-lived thread per submission enumerates the source tree
//! - a single I/O worker prepares destinations, copies files, verifies them
//!   and consults the [`Decisions`] provider
//!
//! Only one job is active (Preparing, Transferring or Verifying) at a time,
//! and jobs are picked strictly in submission order among Queued jobs.
//! Cancellation is cooperative: it is checked before each file and before
//! verification, never in the middle of a file.
//!
//! Every activation of a job gets a fresh run number. Worker reports carry
//! it, and reports from a run that is no longer current are dropped, so a
//! cancelled job cannot be revived by a copy that was still in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::checksums::{verify_against, ChecksumAlgorithm, ChecksumValue};
use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, Resolution};
use crate::decisions::{Decisions, Failure, FailureChoice};
use crate::error::{EngineError, JobError};
use crate::fs_ops::{self, EnumeratedFile};
use crate::job::{self, TokenClock};
use crate::model::{JobId, TransferJob, TransferStatus, Volume};
use crate::progress::{EventBus, Notice, NoticeBoard, NoticeKind, QueueEvent};

/// Point-in-time copy of the queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    /// Jobs in submission order
    pub jobs: Vec<TransferJob>,
    /// The job currently being processed or awaiting a failure decision
    pub current: Option<JobId>,
    pub running: bool,
}

enum Command {
    Submit {
        source: Volume,
        destination: Volume,
        reply: Sender<JobId>,
    },
    Start,
    Stop,
    Cancel(JobId),
    ClearCompleted,
    ClearAll,
    Snapshot(Sender<QueueSnapshot>),
    Subscribe(Sender<Receiver<QueueEvent>>),
    Shutdown,
}

enum Message {
    Command(Command),
    Enumerated {
        job_id: JobId,
        result: Result<Vec<EnumeratedFile>, EngineError>,
    },
    Report(Report),
}

/// Outcome of a worker task, tagged with the run it belongs to.
struct Report {
    run: u64,
    job_id: JobId,
    outcome: Outcome,
}

enum Outcome {
    Prepared(Result<Resolution, EngineError>),
    Progress(u64),
    FileCopied {
        index: usize,
        result: Result<ChecksumValue, EngineError>,
    },
    Verified(Result<(), EngineError>),
    FailureDecided(Option<FailureChoice>),
}

enum Task {
    Prepare {
        run: u64,
        job_id: JobId,
        destination: PathBuf,
        check_conflict: bool,
    },
    CopyFile {
        run: u64,
        job_id: JobId,
        index: usize,
        source: PathBuf,
        destination: PathBuf,
        algorithm: ChecksumAlgorithm,
    },
    Verify {
        run: u64,
        job_id: JobId,
        files: Vec<(PathBuf, Option<ChecksumValue>)>,
    },
    DecideFailure {
        run: u64,
        failure: Failure,
    },
}

impl Task {
    fn run(&self) -> u64 {
        match self {
            Task::Prepare { run, .. }
            | Task::CopyFile { run, .. }
            | Task::Verify { run, .. }
            | Task::DecideFailure { run, .. } => *run,
        }
    }
}

/// Run number of the active job, 0 when idle. Written by the engine,
/// read by the worker to skip work nobody is waiting for.
type LiveRun = Arc<AtomicU64>;

/// The job being driven and where it is in its file list.
#[derive(Debug, Clone, Copy)]
struct Active {
    job_id: JobId,
    run: u64,
    next_file: usize,
    /// Bytes streamed so far for the file in flight
    file_bytes: u64,
}

/// Handle to the queue's engine thread.
///
/// Dropping the handle shuts the engine down. A file copy already handed to
/// the I/O worker still runs to completion.
pub struct TransferQueue {
    inbox: Sender<Message>,
    notices: NoticeBoard,
    engine: Option<JoinHandle<()>>,
}

impl TransferQueue {
    /// Start the engine and I/O worker threads.
    pub fn new(config: EngineConfig, decisions: Arc<dyn Decisions>) -> Result<Self, EngineError> {
        let (inbox_tx, inbox_rx) = unbounded::<Message>();
        let (task_tx, task_rx) = unbounded::<Task>();
        let notices = NoticeBoard::new(config.notice_ttl());
        let live = LiveRun::default();

        let worker = Worker {
            decisions,
            buffer_size: config.effective_buffer_size(),
            verify_settle: config.verify_settle(),
            live: Arc::clone(&live),
            reports: inbox_tx.clone(),
        };
        thread::Builder::new()
            .name("offload-io".to_string())
            .spawn(move || worker.run(task_rx))
            .map_err(|e| EngineError::ThreadSpawn {
                name: "I/O worker",
                source: e,
            })?;

        let engine = Engine {
            config,
            jobs: Vec::new(),
            current: None,
            live,
            running: false,
            runs: 0,
            clock: TokenClock::new(),
            bus: EventBus::default(),
            notices: notices.clone(),
            inbox: inbox_tx.clone(),
            worker: task_tx,
        };
        let handle = thread::Builder::new()
            .name("offload-engine".to_string())
            .spawn(move || engine.run(inbox_rx))
            .map_err(|e| EngineError::ThreadSpawn {
                name: "engine",
                source: e,
            })?;

        Ok(TransferQueue {
            inbox: inbox_tx,
            notices,
            engine: Some(handle),
        })
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.inbox
            .send(Message::Command(command))
            .map_err(|_| EngineError::QueueClosed)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply, response) = bounded(1);
        self.send(make(reply))?;
        response.recv().map_err(|_| EngineError::QueueClosed)
    }

    fn fire(&self, command: Command) {
        if let Err(e) = self.send(command) {
            debug!("{}", e);
        }
    }

    /// Queue a transfer of `source` into a new directory under `destination`.
    ///
    /// The placeholder job is in the queue when this returns; its file list
    /// and total size are filled in by a background enumeration. If that
    /// enumeration fails, the job is removed and an `EnumerationFailed`
    /// event is published.
    ///
    /// Submitting a (source, destination) pair that is already queued is
    /// allowed: the job is added and a `Duplicate` notice is posted.
    pub fn submit(&self, source: &Volume, destination: &Volume) -> Result<JobId, EngineError> {
        self.request(|reply| Command::Submit {
            source: source.clone(),
            destination: destination.clone(),
            reply,
        })
    }

    /// Submit every source to every destination, sources in the outer loop.
    pub fn queue_all_sources_all_destinations(
        &self,
        sources: &[Volume],
        destinations: &[Volume],
    ) -> Result<Vec<JobId>, EngineError> {
        info!(
            sources = sources.len(),
            destinations = destinations.len(),
            "queueing {} transfers",
            sources.len() * destinations.len()
        );
        let mut ids = Vec::with_capacity(sources.len() * destinations.len());
        for source in sources {
            for destination in destinations {
                ids.push(self.submit(source, destination)?);
            }
        }
        Ok(ids)
    }

    /// Submit every source to a single destination.
    pub fn queue_all_sources(
        &self,
        sources: &[Volume],
        destination: &Volume,
    ) -> Result<Vec<JobId>, EngineError> {
        self.queue_all_sources_all_destinations(sources, std::slice::from_ref(destination))
    }

    /// Begin processing queued jobs. No-op if already running or nothing is queued.
    pub fn start(&self) {
        self.fire(Command::Start);
    }

    /// Halt the queue. The active job is cancelled before its next file;
    /// queued jobs stay queued until `start` is called again.
    pub fn stop(&self) {
        self.fire(Command::Stop);
    }

    /// Cancel a job. Cancelling the active job lets the queue move on.
    pub fn cancel(&self, job_id: JobId) {
        self.fire(Command::Cancel(job_id));
    }

    /// Remove every Completed or Cancelled job.
    pub fn clear_completed(&self) {
        self.fire(Command::ClearCompleted);
    }

    /// Remove every job. Ignored while the queue is running.
    pub fn clear_all(&self) {
        self.fire(Command::ClearAll);
    }

    pub fn snapshot(&self) -> Result<QueueSnapshot, EngineError> {
        self.request(Command::Snapshot)
    }

    /// All jobs in submission order; empty once the queue has shut down.
    pub fn jobs(&self) -> Vec<TransferJob> {
        self.snapshot().map(|s| s.jobs).unwrap_or_default()
    }

    pub fn job(&self, job_id: JobId) -> Option<TransferJob> {
        self.jobs().into_iter().find(|job| job.id == job_id)
    }

    pub fn current_job(&self) -> Option<TransferJob> {
        let snapshot = self.snapshot().ok()?;
        let current = snapshot.current?;
        snapshot.jobs.into_iter().find(|job| job.id == current)
    }

    pub fn is_running(&self) -> bool {
        self.snapshot().map(|s| s.running).unwrap_or(false)
    }

    /// The latest "added"/"duplicate" notice, until it expires.
    pub fn notice(&self) -> Option<Notice> {
        self.notices.current()
    }

    /// Receive every subsequent `QueueEvent`.
    pub fn subscribe(&self) -> Result<Receiver<QueueEvent>, EngineError> {
        self.request(Command::Subscribe)
    }

    /// Stop the engine thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(handle) = self.engine.take() {
            let _ = self.send(Command::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for TransferQueue {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the engine thread.
struct Engine {
    config: EngineConfig,
    jobs: Vec<TransferJob>,
    current: Option<Active>,
    live: LiveRun,
    running: bool,
    runs: u64,
    clock: TokenClock,
    bus: EventBus,
    notices: NoticeBoard,
    inbox: Sender<Message>,
    worker: Sender<Task>,
}

impl Engine {
    fn run(mut self, inbox: Receiver<Message>) {
        debug!("engine started");
        while let Ok(message) = inbox.recv() {
            match message {
                Message::Command(Command::Shutdown) => break,
                Message::Command(command) => self.handle_command(command),
                Message::Enumerated { job_id, result } => self.on_enumerated(job_id, result),
                Message::Report(report) => self.on_report(report),
            }
        }
        debug!("engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                source,
                destination,
                reply,
            } => {
                let job_id = self.submit(&source, &destination);
                let _ = reply.send(job_id);
            }
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Cancel(job_id) => self.cancel(job_id),
            Command::ClearCompleted => self.clear_completed(),
            Command::ClearAll => self.clear_all(),
            Command::Snapshot(reply) => {
                let _ = reply.send(QueueSnapshot {
                    jobs: self.jobs.clone(),
                    current: self.current.map(|active| active.job_id),
                    running: self.running,
                });
            }
            Command::Subscribe(reply) => {
                let _ = reply.send(self.bus.subscribe());
            }
            Command::Shutdown => {}
        }
    }

    fn index_of(&self, job_id: JobId) -> Option<usize> {
        self.jobs.iter().position(|job| job.id == job_id)
    }

    fn job_mut(&mut self, job_id: JobId) -> Option<&mut TransferJob> {
        self.jobs.iter_mut().find(|job| job.id == job_id)
    }

    fn set_status(&mut self, job_id: JobId, status: TransferStatus) {
        if let Some(job) = self.jobs.iter_mut().find(|job| job.id == job_id) {
            job.status = status;
            if status.is_terminal() {
                job.finished_at = Some(Utc::now());
            }
            info!(job = %job_id, source = %job.source_name, "{}", status);
            self.bus.publish(QueueEvent::StatusChanged { job_id, status });
        }
    }

    fn set_running(&mut self, running: bool) {
        if self.running != running {
            self.running = running;
            info!(running, "queue running state changed");
            self.bus.publish(QueueEvent::RunningChanged { running });
        }
    }

    fn submit(&mut self, source: &Volume, destination: &Volume) -> JobId {
        let duplicate = self
            .jobs
            .iter()
            .any(|job| job::is_duplicate_of(job, &source.root_path, &destination.root_path));

        let token = self.clock.next_token();
        let job = job::create_job(
            source,
            destination,
            &token,
            self.config.effective_algorithm(),
        );
        let job_id = job.id;
        info!(
            job = %job_id,
            source = %source.name,
            destination = %job.destination_path.display(),
            duplicate,
            "transfer queued"
        );
        self.jobs.push(job);
        self.bus.publish(QueueEvent::JobAdded { job_id, duplicate });

        if duplicate {
            self.notices.post(
                NoticeKind::Duplicate,
                format!("{} is already queued for {}", source.name, destination.name),
            );
        } else {
            self.notices.post(
                NoticeKind::Added,
                format!("Queued {} to {}", source.name, destination.name),
            );
        }

        let root = source.root_path.clone();
        let inbox = self.inbox.clone();
        let spawned = thread::Builder::new()
            .name("offload-enumerate".to_string())
            .spawn(move || {
                let result = fs_ops::enumerate_tree(&root);
                let _ = inbox.send(Message::Enumerated { job_id, result });
            });
        if let Err(e) = spawned {
            self.on_enumerated(
                job_id,
                Err(EngineError::EnumerationFailed {
                    path: source.root_path.clone(),
                    source: e,
                }),
            );
        }

        job_id
    }

    fn on_enumerated(&mut self, job_id: JobId, result: Result<Vec<EnumeratedFile>, EngineError>) {
        let Some(index) = self.index_of(job_id) else {
            debug!(job = %job_id, "enumeration finished for a removed job");
            return;
        };

        match result {
            Ok(files) => {
                let job = &mut self.jobs[index];
                job::plan_job(job, files);
                info!(
                    job = %job_id,
                    files = job.files.len(),
                    bytes = job.total_size,
                    "enumeration complete"
                );
                let event = QueueEvent::JobEnumerated {
                    job_id,
                    file_count: job.files.len(),
                    total_size: job.total_size,
                };
                self.bus.publish(event);
            }
            Err(e) => {
                let job = self.jobs.remove(index);
                warn!(job = %job_id, source = %job.source_path.display(), "{}", e);
                let message = JobError::from(&e).message().to_string();
                self.bus.publish(QueueEvent::EnumerationFailed {
                    job_id,
                    source_path: job.source_path,
                    message,
                });
            }
        }

        // The scheduler may be waiting on this very job.
        self.advance();
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        if !self
            .jobs
            .iter()
            .any(|job| job.status == TransferStatus::Queued)
        {
            debug!("start ignored, nothing queued");
            return;
        }
        self.set_running(true);
        self.advance();
    }

    fn stop(&mut self) {
        self.set_running(false);
    }

    /// Activate the first Queued job, if the queue is running and idle.
    ///
    /// A first-in-line job that is still being enumerated is waited for
    /// rather than overtaken.
    fn advance(&mut self) {
        if !self.running || self.current.is_some() {
            return;
        }

        match self
            .jobs
            .iter()
            .find(|job| job.status == TransferStatus::Queued)
        {
            None => {
                info!("no more queued transfers");
                self.set_running(false);
            }
            Some(job) if !job.enumerated => {
                debug!(job = %job.id, "waiting for enumeration");
            }
            Some(job) => {
                let job_id = job.id;
                self.activate(job_id);
            }
        }
    }

    fn activate(&mut self, job_id: JobId) {
        self.runs += 1;
        let run = self.runs;
        self.current = Some(Active {
            job_id,
            run,
            next_file: 0,
            file_bytes: 0,
        });
        self.live.store(run, Ordering::SeqCst);

        let Some(job) = self.job_mut(job_id) else {
            return;
        };
        job.started_at = Some(Utc::now());
        let destination = job.destination_path.clone();
        let check_conflict = !job.destination_created;
        self.set_status(job_id, TransferStatus::Preparing);

        self.dispatch(Task::Prepare {
            run,
            job_id,
            destination,
            check_conflict,
        });
    }

    fn clear_current(&mut self) {
        self.current = None;
        self.live.store(0, Ordering::SeqCst);
    }

    fn dispatch(&mut self, task: Task) {
        if self.worker.send(task).is_err() {
            warn!("I/O worker has exited; stopping queue");
            self.clear_current();
            self.set_running(false);
        }
    }

    /// The active run for `report`, if it is still current.
    fn active_for(&self, report: &Report) -> Option<Active> {
        self.current
            .filter(|active| active.run == report.run && active.job_id == report.job_id)
    }

    fn status_of(&self, job_id: JobId) -> Option<TransferStatus> {
        self.jobs
            .iter()
            .find(|job| job.id == job_id)
            .map(|job| job.status)
    }

    fn on_report(&mut self, report: Report) {
        let Some(active) = self.active_for(&report) else {
            debug!(job = %report.job_id, run = report.run, "dropping stale worker report");
            return;
        };
        let job_id = active.job_id;

        match report.outcome {
            Outcome::Prepared(result) => {
                if self.status_of(job_id) != Some(TransferStatus::Preparing) {
                    return;
                }
                match result {
                    Ok(Resolution::Skip) => self.finish(job_id, TransferStatus::Cancelled),
                    Ok(resolution) => {
                        if let Some(job) = self.job_mut(job_id) {
                            if let Resolution::KeepBoth(renamed) = resolution {
                                job::rebase_destination(job, renamed);
                            }
                            job.destination_created = true;
                        }
                        self.set_status(job_id, TransferStatus::Transferring);
                        self.dispatch_next_file();
                    }
                    Err(e) => self.fail(job_id, e),
                }
            }
            Outcome::Progress(bytes) => {
                if let Some(job) = self.jobs.iter_mut().find(|job| job.id == job_id) {
                    if job.status != TransferStatus::Transferring {
                        return;
                    }
                    if let Some(active) = self.current.as_mut() {
                        active.file_bytes += bytes;
                    }
                    job.copied_size = (job.copied_size + bytes).min(job.total_size);
                    let event = QueueEvent::Progress {
                        job_id,
                        copied_size: job.copied_size,
                        total_size: job.total_size,
                    };
                    self.bus.publish(event);
                }
            }
            Outcome::FileCopied { index, result } => {
                if self.status_of(job_id) != Some(TransferStatus::Transferring) {
                    return;
                }
                match result {
                    Ok(checksum) => {
                        let mut streamed = 0;
                        if let Some(active) = self.current.as_mut() {
                            streamed = active.file_bytes;
                            active.file_bytes = 0;
                            active.next_file = index + 1;
                        }
                        if let Some(job) = self.jobs.iter_mut().find(|job| job.id == job_id) {
                            if let Some(file) = job.files.get(index) {
                                debug!(
                                    job = %job_id,
                                    file = %file.relative_path.display(),
                                    checksum = %checksum.to_string_with_algo(),
                                    bytes = streamed,
                                    "file copied"
                                );
                            }
                            // Sizes follow what was streamed if the source changed since enumeration.
                            job::complete_file(job, index, checksum, streamed);
                            let event = QueueEvent::Progress {
                                job_id,
                                copied_size: job.copied_size,
                                total_size: job.total_size,
                            };
                            self.bus.publish(event);
                        }
                        self.dispatch_next_file();
                    }
                    Err(e) => self.fail(job_id, e),
                }
            }
            Outcome::Verified(result) => {
                if self.status_of(job_id) != Some(TransferStatus::Verifying) {
                    return;
                }
                match result {
                    Ok(()) => self.finish(job_id, TransferStatus::Completed),
                    Err(e) => self.fail(job_id, e),
                }
            }
            Outcome::FailureDecided(choice) => {
                if self.status_of(job_id) != Some(TransferStatus::Failed) {
                    return;
                }
                self.on_failure_decided(job_id, choice);
            }
        }
    }

    /// Copy the next file of the active job, or move on to verification.
    ///
    /// This is the cancellation point: a stopped queue or a job that is no
    /// longer Transferring ends the run as Cancelled.
    fn dispatch_next_file(&mut self) {
        let Some(active) = self.current else {
            return;
        };
        let job_id = active.job_id;

        if !self.running || self.status_of(job_id) != Some(TransferStatus::Transferring) {
            info!(job = %job_id, "transfer interrupted");
            self.finish(job_id, TransferStatus::Cancelled);
            return;
        }

        let Some(job) = self.jobs.iter().find(|job| job.id == job_id) else {
            self.clear_current();
            return;
        };

        if let Some(file) = job.files.get(active.next_file) {
            let task = Task::CopyFile {
                run: active.run,
                job_id,
                index: active.next_file,
                source: file.source_path.clone(),
                destination: file.destination_path.clone(),
                algorithm: job.checksum_algorithm,
            };
            self.dispatch(task);
            return;
        }

        let files = job
            .files
            .iter()
            .map(|file| (file.destination_path.clone(), file.checksum.clone()))
            .collect();
        self.set_status(job_id, TransferStatus::Verifying);
        self.dispatch(Task::Verify {
            run: active.run,
            job_id,
            files,
        });
    }

    /// End the active run with a terminal, non-blocking status and move on.
    fn finish(&mut self, job_id: JobId, status: TransferStatus) {
        self.set_status(job_id, status);
        self.clear_current();
        self.advance();
    }

    /// Mark the active job Failed and ask how to continue. The queue does
    /// not advance until the answer arrives.
    fn fail(&mut self, job_id: JobId, err: EngineError) {
        let error = JobError::from(&err);
        if err.is_integrity_failure() {
            warn!(job = %job_id, "verification failed: {}", err);
        } else {
            warn!(job = %job_id, "{}", error);
        }
        if let Some(job) = self.job_mut(job_id) {
            job.error = Some(error.clone());
        }
        self.set_status(job_id, TransferStatus::Failed);

        let (Some(active), Some(job)) = (
            self.current,
            self.jobs.iter().find(|job| job.id == job_id).cloned(),
        ) else {
            return;
        };
        self.dispatch(Task::DecideFailure {
            run: active.run,
            failure: Failure { job, error },
        });
    }

    fn on_failure_decided(&mut self, job_id: JobId, choice: Option<FailureChoice>) {
        let choice = choice.unwrap_or_else(|| {
            warn!(job = %job_id, "no failure decision given; stopping queue");
            FailureChoice::Stop
        });
        info!(job = %job_id, ?choice, "failure resolved");
        self.clear_current();

        match choice {
            FailureChoice::Retry => {
                if let Some(job) = self.job_mut(job_id) {
                    job::reset_for_retry(job);
                }
                self.bus.publish(QueueEvent::StatusChanged {
                    job_id,
                    status: TransferStatus::Queued,
                });
                if self.running {
                    self.activate(job_id);
                }
            }
            FailureChoice::Skip => self.advance(),
            FailureChoice::Stop => self.set_running(false),
        }
    }

    fn cancel(&mut self, job_id: JobId) {
        if self.current.map(|active| active.job_id) == Some(job_id) {
            self.finish(job_id, TransferStatus::Cancelled);
            return;
        }

        match self.status_of(job_id) {
            Some(TransferStatus::Queued) | Some(TransferStatus::Failed) => {
                self.set_status(job_id, TransferStatus::Cancelled);
            }
            Some(status) => debug!(job = %job_id, %status, "cancel ignored"),
            None => debug!(job = %job_id, "cancel of unknown job"),
        }
    }

    fn clear_completed(&mut self) {
        let (removed, kept): (Vec<TransferJob>, Vec<TransferJob>) =
            self.jobs.drain(..).partition(|job| {
                matches!(
                    job.status,
                    TransferStatus::Completed | TransferStatus::Cancelled
                )
            });
        self.jobs = kept;
        if !removed.is_empty() {
            let job_ids = removed.into_iter().map(|job| job.id).collect();
            self.bus.publish(QueueEvent::JobsRemoved { job_ids });
        }
    }

    fn clear_all(&mut self) {
        if self.running {
            debug!("clear_all ignored while running");
            return;
        }
        self.clear_current();
        let job_ids: Vec<JobId> = self.jobs.drain(..).map(|job| job.id).collect();
        if !job_ids.is_empty() {
            info!(count = job_ids.len(), "all transfers cleared");
            self.bus.publish(QueueEvent::JobsRemoved { job_ids });
        }
    }
}

/// Executes blocking work for the active job, one task at a time.
struct Worker {
    decisions: Arc<dyn Decisions>,
    buffer_size: usize,
    verify_settle: Duration,
    live: LiveRun,
    reports: Sender<Message>,
}

impl Worker {
    fn run(self, tasks: Receiver<Task>) {
        for task in tasks.iter() {
            if task.run() != self.live.load(Ordering::SeqCst) {
                debug!(run = task.run(), "skipping task for a withdrawn job");
                continue;
            }
            match task {
                Task::Prepare {
                    run,
                    job_id,
                    destination,
                    check_conflict,
                } => {
                    let result = if check_conflict {
                        ConflictResolver::new(self.decisions.as_ref()).prepare_if(
                            job_id,
                            &destination,
                            || self.live.load(Ordering::SeqCst) == run,
                        )
                    } else {
                        fs_ops::ensure_dir_exists(&destination).map(|()| Resolution::Clear)
                    };
                    self.report(run, job_id, Outcome::Prepared(result));
                }
                Task::CopyFile {
                    run,
                    job_id,
                    index,
                    source,
                    destination,
                    algorithm,
                } => {
                    let result = fs_ops::ensure_parent_dir_exists(&destination).and_then(|()| {
                        fs_ops::copy_file(&source, &destination, algorithm, self.buffer_size, |n| {
                            self.report(run, job_id, Outcome::Progress(n))
                        })
                    });
                    self.report(run, job_id, Outcome::FileCopied { index, result });
                }
                Task::Verify { run, job_id, files } => {
                    if !self.verify_settle.is_zero() {
                        thread::sleep(self.verify_settle);
                    }
                    let result = verify_files(&files, self.buffer_size);
                    self.report(run, job_id, Outcome::Verified(result));
                }
                Task::DecideFailure { run, failure } => {
                    let job_id = failure.job.id;
                    let choice = self.decisions.resolve_failure(&failure);
                    self.report(run, job_id, Outcome::FailureDecided(choice));
                }
            }
        }
    }

    fn report(&self, run: u64, job_id: JobId, outcome: Outcome) {
        let _ = self.reports.send(Message::Report(Report {
            run,
            job_id,
            outcome,
        }));
    }
}

/// Recompute every destination digest; the first missing or mismatching
/// file is reported.
fn verify_files(
    files: &[(PathBuf, Option<ChecksumValue>)],
    buffer_size: usize,
) -> Result<(), EngineError> {
    for (path, recorded) in files {
        verify_against(path, recorded.as_ref(), buffer_size)?;
    }
    Ok(())
}
