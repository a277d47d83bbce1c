//! Machine-readable report merge
//!
//! Each worker emits a complete `<report>` document holding one job. The
//! merged document keeps a single `<buildInformation>` block (taken from
//! the first fragment), one `<jobs>` list with every job in arrival order,
//! and a `<batchSummary>` recomputed over the merged jobs:
//!
//! ```text
//! <report>
//!   <buildInformation>..</buildInformation>   first fragment only
//!   <jobs>
//!     <job>..</job>                           one per fragment job
//!   </jobs>
//!   <batchSummary totalJobs=".." compliant=".." nonCompliant=".." failedJobs=".."/>
//! </report>
//! ```

use std::io::{self, Write};

use super::report_writer::{strip_xml_declaration, Destination, ReportFragment, ReportWriter};
use super::xml_writer::XML_DECLARATION;

/// Job tallies for the closing `<batchSummary>`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_jobs: usize,
    pub compliant: usize,
    pub non_compliant: usize,
    pub failed_jobs: usize,
}

impl BatchSummary {
    /// Classify a job by its own task exception and validation report
    /// tags; nested feature or fixer sections do not count
    fn record(&mut self, job: &str) {
        self.total_jobs += 1;
        let validation = start_tag(job, "validationReport");
        let failed = start_tag(job, "taskException").is_some()
            || validation.is_some_and(|tag| tag.contains("isSuccess=\"false\""));
        if failed {
            self.failed_jobs += 1;
        } else if let Some(tag) = validation {
            if tag.contains("isCompliant=\"false\"") {
                self.non_compliant += 1;
            } else if tag.contains("isCompliant=\"true\"") {
                self.compliant += 1;
            }
        }
    }
}

pub struct MrrReportWriter<W: Write> {
    dest: Destination<W>,
    jobs_open: bool,
    summary: BatchSummary,
}

impl<W: Write> MrrReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            dest: Destination::new(out),
            jobs_open: false,
            summary: BatchSummary::default(),
        }
    }

    fn open_jobs(&mut self, build_information: Option<&str>) -> io::Result<()> {
        if self.jobs_open {
            return Ok(());
        }
        let out = self.dest.get()?;
        if let Some(info) = build_information {
            writeln!(out, "  {}", info)?;
        }
        writeln!(out, "  <jobs>")?;
        self.jobs_open = true;
        Ok(())
    }

    fn splice(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        let content = fragment.read_to_string()?;
        let document = strip_xml_declaration(&content);
        let jobs = jobs_content(document).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no <jobs> element in {}", fragment.report.display()),
            )
        })?;

        self.open_jobs(element(document, "buildInformation"))?;
        let out = self.dest.get()?;
        let mut summary = self.summary;
        for job in job_elements(jobs) {
            writeln!(out, "    {}", job)?;
            summary.record(job);
        }
        out.flush()?;
        self.summary = summary;
        Ok(())
    }
}

impl<W: Write + Send> ReportWriter for MrrReportWriter<W> {
    fn start_document(&mut self) -> io::Result<()> {
        let out = self.dest.get()?;
        writeln!(out, "{}", XML_DECLARATION)?;
        writeln!(out, "<report>")
    }

    fn write(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        let result = self.splice(fragment);
        fragment.discard();
        result
    }

    fn end_document(&mut self) -> io::Result<()> {
        self.open_jobs(None)?;
        let summary = self.summary;
        let out = self.dest.get()?;
        writeln!(out, "  </jobs>")?;
        writeln!(
            out,
            "  <batchSummary totalJobs=\"{}\" compliant=\"{}\" nonCompliant=\"{}\" failedJobs=\"{}\"/>",
            summary.total_jobs, summary.compliant, summary.non_compliant, summary.failed_jobs
        )?;
        writeln!(out, "</report>")?;
        out.flush()
    }

    fn close_output_stream(&mut self) -> io::Result<()> {
        self.dest.close()
    }
}

/// Find the start of `<name` as a whole tag name at or after `from`
fn find_tag(haystack: &str, name: &str, from: usize) -> Option<usize> {
    let open = format!("<{}", name);
    let mut cursor = from;
    while let Some(pos) = haystack[cursor..].find(&open) {
        let start = cursor + pos;
        let after = start + open.len();
        match haystack[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => return Some(start),
            _ => cursor = after,
        }
    }
    None
}

/// Opening tag `<name ...>` of the first `name` element
fn start_tag<'a>(document: &'a str, name: &str) -> Option<&'a str> {
    let start = find_tag(document, name, 0)?;
    let tag_end = start + document[start..].find('>')?;
    Some(&document[start..=tag_end])
}

/// Complete `<name ...>...</name>` element, or a self-closing one
fn element<'a>(document: &'a str, name: &str) -> Option<&'a str> {
    let start = find_tag(document, name, 0)?;
    let tag_end = start + document[start..].find('>')?;
    if document[..tag_end].ends_with('/') {
        return Some(&document[start..=tag_end]);
    }
    let close = format!("</{}>", name);
    let end = tag_end + document[tag_end..].find(&close)? + close.len();
    Some(&document[start..end])
}

/// Inner content of the `<jobs>` element; empty for `<jobs/>`
fn jobs_content(document: &str) -> Option<&str> {
    let start = find_tag(document, "jobs", 0)?;
    let tag_end = start + document[start..].find('>')?;
    if document[..tag_end].ends_with('/') {
        return Some("");
    }
    let end = document.rfind("</jobs>")?;
    if end <= tag_end {
        return None;
    }
    Some(&document[tag_end + 1..end])
}

/// Top-level `<job>` elements inside a jobs list
fn job_elements(jobs: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(start) = find_tag(jobs, "job", cursor) {
        let Some(tag_len) = jobs[start..].find('>') else {
            break;
        };
        let tag_end = start + tag_len;
        let end = if jobs[..tag_end].ends_with('/') {
            tag_end + 1
        } else {
            match jobs[tag_end..].find("</job>") {
                Some(pos) => tag_end + pos + "</job>".len(),
                None => break,
            }
        };
        found.push(&jobs[start..end]);
        cursor = end;
    }
    found
}
