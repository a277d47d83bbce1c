//! Report writing functionality
//!
//! A [`ReportWriter`] folds the per-file report fragments produced by the
//! workers into one destination stream, in the order they are handed in.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::mrr_writer::MrrReportWriter;
use super::text_writer::TextReportWriter;
use super::xml_writer::XmlReportWriter;

lazy_static! {
    // Temp files that could not be removed right after merging
    static ref DEFERRED_DELETIONS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
}

/// Output format shared by the workers and the merged report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Plain text, fragments concatenated
    Text,
    /// Raw XML reports wrapped in a root element
    Xml,
    /// Machine-readable report with a single job list and batch summary
    #[default]
    Mrr,
}

impl ReportFormat {
    /// Value passed to the worker's format flag
    pub fn worker_arg(self) -> &'static str {
        match self {
            ReportFormat::Text => "text",
            ReportFormat::Xml => "xml",
            ReportFormat::Mrr => "mrr",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.worker_arg())
    }
}

/// A completed single-file report produced by a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFragment {
    pub report: PathBuf,
    pub log: PathBuf,
}

impl ReportFragment {
    /// Fragment for a report file; the side-channel log sits next to it
    /// with `.log` appended
    pub fn new(report: PathBuf) -> Self {
        let mut log = OsString::from(report.as_os_str());
        log.push(".log");
        Self {
            report,
            log: PathBuf::from(log),
        }
    }

    pub fn read_to_string(&self) -> io::Result<String> {
        fs::read_to_string(&self.report)
    }

    /// Delete the report and its log, deferring files that cannot be
    /// removed yet
    pub fn discard(&self) {
        for path in [&self.report, &self.log] {
            remove_or_defer(path);
        }
    }
}

fn remove_or_defer(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed temporary report file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not remove temporary file, deferring");
            if let Ok(mut pending) = DEFERRED_DELETIONS.lock() {
                pending.push(path.to_path_buf());
            }
        }
    }
}

/// Retry every deferred deletion; returns the paths that still remain
pub fn purge_deferred_deletions() -> Vec<PathBuf> {
    let pending: Vec<PathBuf> = match DEFERRED_DELETIONS.lock() {
        Ok(mut pending) => pending.drain(..).collect(),
        Err(_) => return Vec::new(),
    };

    let mut remaining = Vec::new();
    for path in pending {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "temporary file left behind");
                remaining.push(path);
            }
        }
    }
    remaining
}

/// Paths currently waiting for deferred deletion
#[cfg(test)]
pub(crate) fn deferred_deletions() -> Vec<PathBuf> {
    DEFERRED_DELETIONS
        .lock()
        .map(|pending| pending.clone())
        .unwrap_or_default()
}

/// Merge strategy for one output format
///
/// `write` takes ownership of the fragment's temporary files: once the
/// content is merged they are deleted.
pub trait ReportWriter: Send {
    /// Envelope header; no-op for formats without one
    fn start_document(&mut self) -> io::Result<()>;

    /// Merge one fragment into the destination and delete its files
    fn write(&mut self, fragment: &ReportFragment) -> io::Result<()>;

    /// Envelope footer; no-op for formats without one
    fn end_document(&mut self) -> io::Result<()>;

    /// Flush and release the destination; later calls do nothing
    fn close_output_stream(&mut self) -> io::Result<()>;
}

/// Destination stream shared by the writer implementations
pub(crate) struct Destination<W: Write> {
    out: Option<W>,
}

impl<W: Write> Destination<W> {
    pub(crate) fn new(out: W) -> Self {
        Self { out: Some(out) }
    }

    pub(crate) fn get(&mut self) -> io::Result<&mut W> {
        self.out
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "report stream already closed"))
    }

    pub(crate) fn close(&mut self) -> io::Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn take_inner(&mut self) -> Option<W> {
        self.out.take()
    }
}

/// Build the writer for `format` on top of `out`
pub fn report_writer_for<W>(format: ReportFormat, out: W) -> Box<dyn ReportWriter>
where
    W: Write + Send + 'static,
{
    match format {
        ReportFormat::Text => Box::new(TextReportWriter::new(out)),
        ReportFormat::Xml => Box::new(XmlReportWriter::new(out)),
        ReportFormat::Mrr => Box::new(MrrReportWriter::new(out)),
    }
}

/// Strip a leading XML declaration (and a UTF-8 BOM) from a fragment
pub(crate) fn strip_xml_declaration(content: &str) -> &str {
    let content = content.trim_start_matches('\u{feff}').trim_start();
    if content.starts_with("<?xml") {
        if let Some(end) = content.find("?>") {
            return content[end + 2..].trim_start();
        }
    }
    content
}
