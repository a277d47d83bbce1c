//! Batch configuration
//!
//! Values come from an optional JSON file and are then overridden by
//! command-line flags.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BatchError, Result};
use crate::reporting::ReportFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Requested number of worker processes
    pub workers: usize,
    /// Worker executable; auto-detected when absent
    pub worker_executable: Option<PathBuf>,
    /// Validation flags passed through to every worker
    pub worker_args: Vec<String>,
    pub format: ReportFormat,
    pub recursive: bool,
    /// Accept files without a `.pdf` extension
    pub accept_non_pdf: bool,
    /// Kill a worker that produces no result for this long
    pub worker_timeout_secs: Option<u64>,
    /// Flag that puts a worker into single-file streaming mode
    pub single_file_flag: String,
    pub format_flag: String,
    /// Line that tells a worker to exit
    pub exit_token: String,
    /// Merged report destination; stdout when absent
    pub output: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            worker_executable: None,
            worker_args: Vec::new(),
            format: ReportFormat::default(),
            recursive: false,
            accept_non_pdf: false,
            worker_timeout_secs: None,
            single_file_flag: "--servermode".to_string(),
            format_flag: "--format".to_string(),
            exit_token: "--exit".to_string(),
            output: None,
        }
    }
}

/// One worker per available CPU
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BatchConfig {
    /// Load configuration from a JSON file; missing keys take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: BatchConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.exit_token.trim().is_empty() {
            return Err(BatchError::Config("exit token must not be empty".to_string()));
        }
        if self.single_file_flag.trim().is_empty() {
            return Err(BatchError::Config("single-file flag must not be empty".to_string()));
        }
        if self.format_flag.trim().is_empty() {
            return Err(BatchError::Config("format flag must not be empty".to_string()));
        }
        if self.worker_timeout_secs == Some(0) {
            return Err(BatchError::Config("worker timeout must be at least one second".to_string()));
        }
        Ok(())
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "workers": 3, "format": "text", "worker_args": ["--flavour", "2b"] }}"#).unwrap();

        let config = BatchConfig::load(file.path()).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.format, ReportFormat::Text);
        assert_eq!(config.worker_args, vec!["--flavour", "2b"]);
        assert_eq!(config.exit_token, "--exit");
        assert_eq!(config.single_file_flag, "--servermode");
        assert!(config.worker_timeout().is_none());
    }

    #[test]
    fn test_empty_exit_token_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "exit_token": "  " }}"#).unwrap();
        let err = BatchConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "workers = 3").unwrap();
        let err = BatchConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, BatchError::ConfigParse(_)));
    }

    #[test]
    fn test_timeout_conversion() {
        let config = BatchConfig {
            worker_timeout_secs: Some(90),
            ..BatchConfig::default()
        };
        assert_eq!(config.worker_timeout(), Some(Duration::from_secs(90)));
        assert!(BatchConfig::default().workers >= 1);
    }
}
