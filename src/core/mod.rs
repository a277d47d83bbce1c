//! Batch orchestration core

pub mod countdown;
pub mod exit_status;
pub mod orchestrator;
pub mod runner;
pub mod work_queue;
pub mod worker;

pub use exit_status::{reduce_statuses, WorkerExitStatus};
pub use orchestrator::{run_batch, Orchestrator, ReportIntake};
pub use runner::{ReportSink, WorkerRunner, WorkerState};
pub use work_queue::WorkQueue;
pub use worker::{ProcessLauncher, ProcessWorker, WorkerChannel, WorkerCommand, WorkerLauncher};
