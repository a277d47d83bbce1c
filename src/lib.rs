//! PDF Batch Validator Library
//!
//! Validates large sets of PDF files by fanning them out over a pool of
//! worker processes and merging their reports into one stream.

pub mod config;
pub mod core;
pub mod error;
pub mod reporting;
pub mod scanner;

pub use crate::core::orchestrator;
pub use crate::reporting::report_writer;
pub use crate::scanner::file_scanner;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::BatchConfig;
    pub use crate::core::exit_status::{reduce_statuses, WorkerExitStatus};
    pub use crate::core::orchestrator::{run_batch, Orchestrator};
    pub use crate::core::worker::{ProcessLauncher, WorkerCommand, WorkerLauncher};
    pub use crate::error::BatchError;
    pub use crate::reporting::{purge_deferred_deletions, ReportFormat, ReportFragment};
    pub use crate::scanner::file_scanner::collect_files;
}
