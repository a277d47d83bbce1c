//! Per-worker driver
//!
//! A [`WorkerRunner`] owns one [`WorkerChannel`] and walks it through the
//! protocol as an explicit state machine:
//!
//! ```text
//!   AwaitingResult ──result──► SubmittingNext ──next file──► AwaitingResult
//!         │                          │
//!         │ stream closed            │ queue empty / shutdown
//!         ▼                          ▼
//!   AwaitingTermination ◄────────────┘
//!         │
//!         ▼
//!     Terminated(status)
//! ```
//!
//! I/O failures at any step abort the worker and terminate with `IoError`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::exit_status::WorkerExitStatus;
use super::work_queue::WorkQueue;
use super::worker::WorkerChannel;
use crate::reporting::ReportFragment;

/// Receives fragments from every runner of a batch
pub trait ReportSink: Send + Sync {
    fn report(&self, fragment: ReportFragment);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    AwaitingResult,
    SubmittingNext,
    AwaitingTermination,
    Terminated(WorkerExitStatus),
}

pub struct WorkerRunner<C: WorkerChannel, S: ReportSink + ?Sized> {
    id: usize,
    channel: C,
    queue: Arc<WorkQueue>,
    sink: Arc<S>,
    shutdown: Arc<AtomicBool>,
    state: WorkerState,
    /// File the worker is currently validating
    in_flight: Option<PathBuf>,
    /// Worst status from problems seen before termination
    observed: WorkerExitStatus,
    processed: usize,
}

impl<C: WorkerChannel, S: ReportSink + ?Sized> WorkerRunner<C, S> {
    /// Runner for a channel already primed with `first`
    pub fn new(
        id: usize,
        channel: C,
        first: PathBuf,
        queue: Arc<WorkQueue>,
        sink: Arc<S>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            channel,
            queue,
            sink,
            shutdown,
            state: WorkerState::AwaitingResult,
            in_flight: Some(first),
            observed: WorkerExitStatus::Valid,
            processed: 0,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Drive the worker until it terminates
    pub fn run(mut self) -> WorkerExitStatus {
        loop {
            if let WorkerState::Terminated(status) = self.step() {
                debug!(worker = self.id, processed = self.processed, status = %status, "worker terminated");
                return status;
            }
        }
    }

    /// Perform one protocol step and return the new state
    pub fn step(&mut self) -> WorkerState {
        self.state = match self.state {
            WorkerState::AwaitingResult => self.await_result(),
            WorkerState::SubmittingNext => self.submit_next(),
            WorkerState::AwaitingTermination => {
                let status = self.channel.close();
                WorkerState::Terminated(self.observed.worst(status))
            }
            terminated @ WorkerState::Terminated(_) => terminated,
        };
        self.state
    }

    fn await_result(&mut self) -> WorkerState {
        match self.channel.next_result() {
            Ok(Some(report)) => {
                debug!(
                    worker = self.id,
                    file = ?self.in_flight,
                    report = %report.display(),
                    "received result"
                );
                self.in_flight = None;
                self.processed += 1;
                self.sink.report(ReportFragment::new(report));
                WorkerState::SubmittingNext
            }
            Ok(None) => {
                warn!(
                    worker = self.id,
                    file = ?self.in_flight,
                    "worker closed its output before finishing"
                );
                self.observed = self.observed.worst(WorkerExitStatus::InternalError);
                WorkerState::AwaitingTermination
            }
            Err(e) => self.fail("reading result", e),
        }
    }

    fn submit_next(&mut self) -> WorkerState {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!(worker = self.id, "shutdown requested, not submitting more files");
                self.observed = self.observed.worst(WorkerExitStatus::Interrupted);
                return WorkerState::AwaitingTermination;
            }

            let Some(path) = self.queue.pop() else {
                return WorkerState::AwaitingTermination;
            };

            match self.channel.submit(&path) {
                Ok(()) => {
                    debug!(
                        worker = self.id,
                        file = %path.display(),
                        queued = self.queue.len(),
                        "submitted file"
                    );
                    self.in_flight = Some(path);
                    return WorkerState::AwaitingResult;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                    // The worker never saw it; skip the file and keep going
                    error!(worker = self.id, file = %path.display(), error = %e, "cannot submit file");
                    self.observed = self.observed.worst(WorkerExitStatus::IoError);
                }
                Err(e) => {
                    self.in_flight = Some(path);
                    return self.fail("submitting file", e);
                }
            }
        }
    }

    fn fail(&mut self, action: &str, e: std::io::Error) -> WorkerState {
        error!(
            worker = self.id,
            file = ?self.in_flight,
            error = %e,
            "worker failed while {}",
            action
        );
        let _ = self.channel.abort();
        WorkerState::Terminated(self.observed.worst(WorkerExitStatus::IoError))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::path::Path;
    use std::sync::Mutex;

    /// Scripted in-memory worker
    #[derive(Default)]
    pub(crate) struct FakeChannel {
        pub submitted: Vec<PathBuf>,
        pub results: VecDeque<io::Result<Option<PathBuf>>>,
        pub submit_error: Option<io::ErrorKind>,
        pub exit_status: WorkerExitStatus,
        pub closed: bool,
        pub aborted: bool,
    }

    impl WorkerChannel for FakeChannel {
        fn submit(&mut self, path: &Path) -> io::Result<()> {
            if let Some(kind) = self.submit_error {
                return Err(io::Error::new(kind, "scripted failure"));
            }
            self.submitted.push(path.to_path_buf());
            Ok(())
        }

        fn next_result(&mut self) -> io::Result<Option<PathBuf>> {
            self.results.pop_front().unwrap_or(Ok(None))
        }

        fn close(&mut self) -> WorkerExitStatus {
            self.closed = true;
            self.exit_status
        }

        fn abort(&mut self) -> WorkerExitStatus {
            self.aborted = true;
            WorkerExitStatus::Interrupted
        }
    }

    #[derive(Default)]
    pub(crate) struct CollectingSink {
        pub fragments: Mutex<Vec<ReportFragment>>,
    }

    impl ReportSink for CollectingSink {
        fn report(&self, fragment: ReportFragment) {
            self.fragments.lock().unwrap().push(fragment);
        }
    }

    fn runner(
        channel: FakeChannel,
        queued: &[&str],
    ) -> (WorkerRunner<FakeChannel, CollectingSink>, Arc<CollectingSink>, Arc<AtomicBool>) {
        let queue = Arc::new(WorkQueue::new(queued.iter().map(PathBuf::from)));
        let sink = Arc::new(CollectingSink::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let runner = WorkerRunner::new(
            0,
            channel,
            PathBuf::from("/docs/first.pdf"),
            queue,
            Arc::clone(&sink),
            Arc::clone(&shutdown),
        );
        (runner, sink, shutdown)
    }

    fn ok(path: &str) -> io::Result<Option<PathBuf>> {
        Ok(Some(PathBuf::from(path)))
    }

    #[test]
    fn test_state_sequence_for_two_files() {
        let channel = FakeChannel {
            results: VecDeque::from([ok("/tmp/r1.xml"), ok("/tmp/r2.xml")]),
            exit_status: WorkerExitStatus::Invalid,
            ..FakeChannel::default()
        };
        let (mut runner, sink, _) = runner(channel, &["/docs/second.pdf"]);

        assert_eq!(runner.state(), WorkerState::AwaitingResult);
        assert_eq!(runner.step(), WorkerState::SubmittingNext);
        assert_eq!(runner.step(), WorkerState::AwaitingResult);
        assert_eq!(runner.step(), WorkerState::SubmittingNext);
        assert_eq!(runner.step(), WorkerState::AwaitingTermination);
        assert_eq!(
            runner.step(),
            WorkerState::Terminated(WorkerExitStatus::Invalid)
        );
        assert_eq!(runner.processed(), 2);
        assert_eq!(runner.channel.submitted, vec![PathBuf::from("/docs/second.pdf")]);
        assert!(runner.channel.closed);

        let fragments = sink.fragments.lock().unwrap();
        let reports: Vec<_> = fragments.iter().map(|f| f.report.clone()).collect();
        assert_eq!(reports, vec![PathBuf::from("/tmp/r1.xml"), PathBuf::from("/tmp/r2.xml")]);
    }

    #[test]
    fn test_read_failure_aborts_with_io_error() {
        let channel = FakeChannel {
            results: VecDeque::from([Err(io::Error::new(io::ErrorKind::TimedOut, "silent"))]),
            ..FakeChannel::default()
        };
        let (runner, sink, _) = runner(channel, &["/docs/second.pdf"]);
        assert_eq!(runner.run(), WorkerExitStatus::IoError);
        assert!(sink.fragments.lock().unwrap().is_empty());
    }

    #[test]
    fn test_broken_pipe_on_submit_aborts() {
        let channel = FakeChannel {
            results: VecDeque::from([ok("/tmp/r1.xml")]),
            submit_error: Some(io::ErrorKind::BrokenPipe),
            ..FakeChannel::default()
        };
        let (mut runner, sink, _) = runner(channel, &["/docs/second.pdf"]);
        runner.step();
        assert_eq!(
            runner.step(),
            WorkerState::Terminated(WorkerExitStatus::IoError)
        );
        assert!(runner.channel.aborted);
        assert_eq!(sink.fragments.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubmittable_path_is_skipped() {
        let channel = FakeChannel {
            results: VecDeque::from([ok("/tmp/r1.xml")]),
            submit_error: Some(io::ErrorKind::InvalidInput),
            ..FakeChannel::default()
        };
        let (runner, _, _) = runner(channel, &["/docs/bad.pdf", "/docs/worse.pdf"]);
        assert_eq!(runner.run(), WorkerExitStatus::IoError);
    }

    #[test]
    fn test_early_end_of_stream_is_internal_error() {
        let channel = FakeChannel {
            results: VecDeque::from([Ok(None)]),
            exit_status: WorkerExitStatus::Valid,
            ..FakeChannel::default()
        };
        let (runner, _, _) = runner(channel, &[]);
        assert_eq!(runner.run(), WorkerExitStatus::InternalError);
    }

    #[test]
    fn test_shutdown_stops_submission() {
        let channel = FakeChannel {
            results: VecDeque::from([ok("/tmp/r1.xml")]),
            ..FakeChannel::default()
        };
        let (runner, _, shutdown) = runner(channel, &["/docs/second.pdf"]);
        shutdown.store(true, Ordering::SeqCst);
        assert_eq!(runner.run(), WorkerExitStatus::Interrupted);
    }

    #[test]
    fn test_worker_status_survives_clean_run() {
        let channel = FakeChannel {
            results: VecDeque::from([ok("/tmp/r1.xml")]),
            exit_status: WorkerExitStatus::OutOfMemory,
            ..FakeChannel::default()
        };
        let (runner, _, _) = runner(channel, &[]);
        assert_eq!(runner.run(), WorkerExitStatus::OutOfMemory);
    }
}
