//! Batch orchestration across a pool of worker processes
//!
//! The orchestrator discovers the files, sizes the pool, primes one worker
//! per pool slot and then waits. Every worker reports its fragments into a
//! single [`ReportIntake`], the only place where aggregate state is
//! mutated, and signals a [`Countdown`] once it terminates.

use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use super::countdown::Countdown;
use super::exit_status::{reduce_statuses, WorkerExitStatus};
use super::runner::{ReportSink, WorkerRunner};
use super::work_queue::WorkQueue;
use super::worker::{ProcessLauncher, WorkerCommand, WorkerLauncher};
use crate::config::BatchConfig;
use crate::error::Result;
use crate::reporting::{
    purge_deferred_deletions, report_writer_for, ProcessingHandler, ReportFragment,
};
use crate::scanner::collect_files;

/// Pool size for a batch: at least one worker when there is work, never
/// more workers than files
pub fn pool_size(requested_workers: usize, files: usize) -> usize {
    requested_workers.max(1).min(files)
}

struct AggregateState {
    remaining: usize,
    handler: ProcessingHandler,
    worst: WorkerExitStatus,
    progress: ProgressBar,
}

impl AggregateState {
    fn record_failure(&mut self, what: &str, e: io::Error) {
        error!(error = %e, "failed to {}", what);
        self.worst = self.worst.worst(WorkerExitStatus::ReportSerialization);
    }

    fn end_and_close(&mut self) {
        if let Err(e) = self.handler.end_report() {
            self.record_failure("write report footer", e);
        }
        if let Err(e) = self.handler.close() {
            self.record_failure("close report stream", e);
        }
    }
}

/// Serialized intake of report fragments for one batch
pub struct ReportIntake {
    state: Mutex<AggregateState>,
}

impl ReportIntake {
    pub fn new(handler: ProcessingHandler, expected: usize, progress: ProgressBar) -> Self {
        Self {
            state: Mutex::new(AggregateState {
                remaining: expected,
                handler,
                worst: WorkerExitStatus::Valid,
                progress,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        // A panicking writer must not wedge the other workers
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fragments still expected
    pub fn remaining(&self) -> usize {
        self.lock().remaining
    }

    /// Complete the report after all workers are gone
    ///
    /// If some files never produced a fragment the missing framing is
    /// written now so partial output is still a complete document.
    /// Returns the worst status seen while merging.
    pub fn finish(&self) -> WorkerExitStatus {
        let mut state = self.lock();
        if !state.handler.is_closed() {
            if state.remaining > 0 {
                warn!(missing = state.remaining, "batch finished with unreported files");
            }
            if let Err(e) = state.handler.start_report() {
                state.record_failure("write report header", e);
            }
            state.end_and_close();
        }
        state.progress.finish_and_clear();
        state.worst
    }
}

impl ReportSink for ReportIntake {
    fn report(&self, fragment: ReportFragment) {
        let mut state = self.lock();
        if state.handler.is_closed() {
            warn!(report = %fragment.report.display(), "fragment arrived after report was closed");
            fragment.discard();
            return;
        }

        if !state.handler.is_started() {
            if let Err(e) = state.handler.start_report() {
                state.record_failure("write report header", e);
            }
        }
        if let Err(e) = state.handler.fill_report(&fragment) {
            warn!(report = %fragment.report.display(), "fragment skipped");
            state.record_failure("merge fragment", e);
        }

        state.remaining = state.remaining.saturating_sub(1);
        state.progress.inc(1);
        if state.remaining == 0 {
            state.end_and_close();
        }
    }
}

fn progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    })
}

pub struct Orchestrator<L: WorkerLauncher> {
    launcher: L,
    config: BatchConfig,
    shutdown: Arc<AtomicBool>,
    show_progress: bool,
}

impl<L: WorkerLauncher> Orchestrator<L> {
    pub fn new(launcher: L, config: BatchConfig) -> Self {
        Self {
            launcher,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            show_progress: false,
        }
    }

    /// Share a flag that stops workers from taking new files once set
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Validate every file under `paths` and merge the reports
    ///
    /// # Returns
    /// The worst status across all workers and the report merge
    pub fn process(
        &self,
        paths: &[PathBuf],
        recurse: bool,
        requested_workers: usize,
    ) -> WorkerExitStatus {
        match self.try_process(paths, recurse, requested_workers) {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "batch could not be started");
                e.exit_status()
            }
        }
    }

    fn try_process(
        &self,
        paths: &[PathBuf],
        recurse: bool,
        requested_workers: usize,
    ) -> Result<WorkerExitStatus> {
        let files = collect_files(paths, recurse, self.config.accept_non_pdf);
        let queue = Arc::new(WorkQueue::new(files));
        let workers = pool_size(requested_workers, queue.total());
        if workers == 0 {
            info!("no files to validate");
            return Ok(WorkerExitStatus::NoFiles);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("batch-worker-{}", i))
            .panic_handler(|_| error!("worker thread panicked"))
            .build()?;

        let out = open_output(self.config.output.as_deref())?;
        let handler = ProcessingHandler::new(report_writer_for(self.config.format, out));
        let intake = Arc::new(ReportIntake::new(
            handler,
            queue.total(),
            progress_bar(queue.total(), self.show_progress),
        ));

        info!(
            files = queue.total(),
            workers,
            format = %self.config.format,
            "starting batch"
        );

        // Every slot takes its first file before any runner starts draining
        // the queue
        let (countdown, signals) = Countdown::new(workers);
        let mut primed = Vec::with_capacity(workers);
        for signal in signals {
            match queue.pop() {
                Some(first) => primed.push((signal, first)),
                None => signal.complete(WorkerExitStatus::Valid),
            }
        }

        for (id, (signal, first)) in primed.into_iter().enumerate() {
            match self.launcher.launch(&first) {
                Ok(channel) => {
                    let runner = WorkerRunner::new(
                        id,
                        channel,
                        first,
                        Arc::clone(&queue),
                        Arc::clone(&intake),
                        Arc::clone(&self.shutdown),
                    );
                    pool.spawn(move || {
                        let status = runner.run();
                        signal.complete(status);
                    });
                }
                Err(e) => {
                    error!(worker = id, file = %first.display(), error = %e, "failed to launch worker");
                    signal.complete(e.exit_status());
                }
            }
        }

        let worker_status = countdown.wait();
        let merge_status = intake.finish();
        let status = reduce_statuses([worker_status, merge_status]);
        info!(status = %status, "batch complete");
        Ok(status)
    }
}

/// Resolve the worker command and run a batch of real worker processes
///
/// Fails fast with `StartFailure` when no worker executable can be found.
pub fn run_batch(
    config: &BatchConfig,
    paths: &[PathBuf],
    shutdown: Arc<AtomicBool>,
    show_progress: bool,
) -> WorkerExitStatus {
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return e.exit_status();
    }

    let command = match WorkerCommand::resolve(config) {
        Ok(command) => command,
        Err(e) => {
            error!(error = %e, "cannot start batch");
            return e.exit_status();
        }
    };

    let orchestrator = Orchestrator::new(ProcessLauncher::new(command), config.clone())
        .with_shutdown(shutdown)
        .with_progress(show_progress);
    let status = orchestrator.process(paths, config.recursive, config.workers);

    let leftover = purge_deferred_deletions();
    if !leftover.is_empty() {
        warn!(count = leftover.len(), "temporary report files could not be deleted");
    }
    status
}
