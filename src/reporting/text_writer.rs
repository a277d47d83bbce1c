//! Plain-text merge: fragments concatenated byte for byte

use std::fs::File;
use std::io::{self, Write};

use super::report_writer::{Destination, ReportFragment, ReportWriter};

pub struct TextReportWriter<W: Write> {
    dest: Destination<W>,
}

impl<W: Write> TextReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            dest: Destination::new(out),
        }
    }

    fn copy_fragment(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        let mut source = File::open(&fragment.report)?;
        let out = self.dest.get()?;
        io::copy(&mut source, &mut *out)?;
        out.flush()
    }
}

impl<W: Write + Send> ReportWriter for TextReportWriter<W> {
    fn start_document(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn write(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        let result = self.copy_fragment(fragment);
        fragment.discard();
        result
    }

    fn end_document(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close_output_stream(&mut self) -> io::Result<()> {
        self.dest.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::{NamedTempFile, TempDir};

    fn fragment_with(dir: &Path, name: &str, content: &str) -> ReportFragment {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        ReportFragment::new(path)
    }

    #[test]
    fn test_fragments_concatenated_in_write_order() {
        let temp_dir = TempDir::new().unwrap();
        let output = NamedTempFile::new().unwrap();
        let mut writer = TextReportWriter::new(output.reopen().unwrap());

        let second = fragment_with(temp_dir.path(), "b.txt", "PASS /docs/b.pdf\n");
        let first = fragment_with(temp_dir.path(), "a.txt", "FAIL /docs/a.pdf\n");

        writer.start_document().unwrap();
        writer.write(&second).unwrap();
        writer.write(&first).unwrap();
        writer.end_document().unwrap();
        writer.close_output_stream().unwrap();

        let content = fs::read_to_string(output.path()).unwrap();
        assert_eq!(content, "PASS /docs/b.pdf\nFAIL /docs/a.pdf\n");
        assert!(!first.report.exists());
        assert!(!second.report.exists());
    }

    #[test]
    fn test_missing_fragment_is_an_error_but_stream_stays_usable() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = TextReportWriter::new(Vec::new());

        let missing = ReportFragment::new(temp_dir.path().join("gone.txt"));
        assert!(writer.write(&missing).is_err());

        let present = fragment_with(temp_dir.path(), "ok.txt", "PASS\n");
        writer.write(&present).unwrap();
    }

    #[test]
    fn test_write_after_close_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = TextReportWriter::new(Vec::new());
        writer.close_output_stream().unwrap();
        writer.close_output_stream().unwrap();

        let fragment = fragment_with(temp_dir.path(), "late.txt", "late\n");
        assert!(writer.write(&fragment).is_err());
        assert!(!fragment.report.exists());
    }
}
