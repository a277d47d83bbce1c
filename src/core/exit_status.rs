//! Worker exit statuses and the worst-status reduction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;

/// Outcome of a worker process, ordered by severity
///
/// The numeric code doubles as the severity rank, so the derived `Ord`
/// is the order used when folding statuses from many workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExitStatus {
    #[default]
    Valid = 0,
    Invalid = 1,
    BadParams = 2,
    OutOfMemory = 3,
    NoFiles = 4,
    IoError = 5,
    ParseFailure = 6,
    Encrypted = 7,
    InternalError = 8,
    ReportSerialization = 9,
    StartFailure = 10,
    Interrupted = 11,
}

impl WorkerExitStatus {
    pub const ALL: [WorkerExitStatus; 12] = [
        WorkerExitStatus::Valid,
        WorkerExitStatus::Invalid,
        WorkerExitStatus::BadParams,
        WorkerExitStatus::OutOfMemory,
        WorkerExitStatus::NoFiles,
        WorkerExitStatus::IoError,
        WorkerExitStatus::ParseFailure,
        WorkerExitStatus::Encrypted,
        WorkerExitStatus::InternalError,
        WorkerExitStatus::ReportSerialization,
        WorkerExitStatus::StartFailure,
        WorkerExitStatus::Interrupted,
    ];

    /// Numeric process exit code
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw exit code back to a status
    ///
    /// Codes outside the known set are treated as an internal error of
    /// the worker.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.code() == code)
            .unwrap_or(WorkerExitStatus::InternalError)
    }

    /// Map an OS exit status; a signal-terminated process has no code
    pub fn from_process(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::from_code(code),
            None => WorkerExitStatus::Interrupted,
        }
    }

    /// The more severe of two statuses, keeping `self` on a tie
    pub fn worst(self, other: Self) -> Self {
        if other > self {
            other
        } else {
            self
        }
    }

    pub fn is_success(self) -> bool {
        self == WorkerExitStatus::Valid
    }

    pub fn description(self) -> &'static str {
        match self {
            WorkerExitStatus::Valid => "all files valid",
            WorkerExitStatus::Invalid => "invalid files found",
            WorkerExitStatus::BadParams => "bad parameters",
            WorkerExitStatus::OutOfMemory => "out of memory",
            WorkerExitStatus::NoFiles => "no files to process",
            WorkerExitStatus::IoError => "I/O error",
            WorkerExitStatus::ParseFailure => "failed to parse file",
            WorkerExitStatus::Encrypted => "encrypted file",
            WorkerExitStatus::InternalError => "internal error",
            WorkerExitStatus::ReportSerialization => "failed to write report",
            WorkerExitStatus::StartFailure => "failed to start workers",
            WorkerExitStatus::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for WorkerExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

/// Fold any number of statuses into the worst one, `Valid` when empty
pub fn reduce_statuses<I>(statuses: I) -> WorkerExitStatus
where
    I: IntoIterator<Item = WorkerExitStatus>,
{
    statuses
        .into_iter()
        .fold(WorkerExitStatus::Valid, WorkerExitStatus::worst)
}
