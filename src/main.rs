use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pdf_batch_validator_rs::prelude::*;

#[derive(Parser)]
#[command(name = "pdf_batch_validator_rs")]
#[command(about = "Validate PDF files in parallel across a pool of worker processes", long_about = None)]
struct Cli {
    /// Files and directories to validate
    paths: Vec<PathBuf>,

    /// Scan directories recursively
    #[arg(short, long)]
    recursive: bool,

    /// Also validate files without a .pdf extension
    #[arg(long)]
    nonpdfext: bool,

    /// Number of worker processes (default: number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Path to the single-file validator (default: installed launcher script)
    #[arg(long)]
    worker_exe: Option<PathBuf>,

    /// Report format requested from the workers and used for the merged report
    #[arg(short, long, value_enum)]
    format: Option<ReportFormat>,

    /// Merged report file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Kill a worker that produces no result for this many seconds
    #[arg(long)]
    worker_timeout: Option<u64>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run in batch mode (no progress bar)
    #[arg(long)]
    batch: bool,

    /// Flags passed through to every worker, after `--`
    #[arg(last = true)]
    worker_args: Vec<String>,
}

impl Cli {
    /// Merge command-line flags over the loaded configuration
    fn into_config(self, mut config: BatchConfig) -> (BatchConfig, Vec<PathBuf>, bool) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.worker_exe.is_some() {
            config.worker_executable = self.worker_exe;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        if self.worker_timeout.is_some() {
            config.worker_timeout_secs = self.worker_timeout;
        }
        if !self.worker_args.is_empty() {
            config.worker_args = self.worker_args;
        }
        config.recursive |= self.recursive;
        config.accept_non_pdf |= self.nonpdfext;
        (config, self.paths, !self.batch)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes priority over --log-level; logs go to stderr so a
    // report on stdout stays clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let config = match cli.config {
        Some(ref path) => BatchConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => BatchConfig::default(),
    };
    let (config, paths, show_progress) = cli.into_config(config);

    // Set up graceful shutdown handler
    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown_requested.clone();
    ctrlc::set_handler(move || {
        warn!("shutdown requested, finishing files already in progress");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Error setting Ctrl-C handler")?;

    // A progress bar would interleave with a report written to the terminal
    let show_progress = show_progress && config.output.is_some();

    let status = run_batch(&config, &paths, shutdown_requested.clone(), show_progress);

    if shutdown_requested.load(Ordering::SeqCst) {
        warn!("batch interrupted, report contains only completed files");
    }
    if let Some(ref output) = config.output {
        info!(report = %output.display(), "merged report written");
    }
    if status.is_success() {
        info!(code = status.code(), "{}", status.description());
    } else {
        warn!(code = status.code(), "{}", status.description());
    }

    std::process::exit(status.code());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::parse_from([
            "pdf_batch_validator_rs",
            "--workers",
            "6",
            "--format",
            "xml",
            "-r",
            "/docs",
            "--",
            "--flavour",
            "2b",
        ]);
        let loaded = BatchConfig {
            workers: 2,
            worker_timeout_secs: Some(30),
            ..BatchConfig::default()
        };

        let (config, paths, show_progress) = cli.into_config(loaded);
        assert_eq!(config.workers, 6);
        assert_eq!(config.format, ReportFormat::Xml);
        assert!(config.recursive);
        assert_eq!(config.worker_timeout_secs, Some(30));
        assert_eq!(config.worker_args, vec!["--flavour", "2b"]);
        assert_eq!(paths, vec![PathBuf::from("/docs")]);
        assert!(show_progress);
    }
}
