//! Wrapped-XML merge: each fragment's document spliced under one root

use std::io::{self, Write};

use super::report_writer::{strip_xml_declaration, Destination, ReportFragment, ReportWriter};

pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";
pub const ROOT_ELEMENT: &str = "reports";

pub struct XmlReportWriter<W: Write> {
    dest: Destination<W>,
}

impl<W: Write> XmlReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            dest: Destination::new(out),
        }
    }

    fn splice(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        let content = fragment.read_to_string()?;
        let body = strip_xml_declaration(&content).trim_end();
        let out = self.dest.get()?;
        if !body.is_empty() {
            writeln!(out, "{}", body)?;
        }
        out.flush()
    }
}

impl<W: Write + Send> ReportWriter for XmlReportWriter<W> {
    fn start_document(&mut self) -> io::Result<()> {
        let out = self.dest.get()?;
        writeln!(out, "{}", XML_DECLARATION)?;
        writeln!(out, "<{}>", ROOT_ELEMENT)
    }

    fn write(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        let result = self.splice(fragment);
        fragment.discard();
        result
    }

    fn end_document(&mut self) -> io::Result<()> {
        let out = self.dest.get()?;
        writeln!(out, "</{}>", ROOT_ELEMENT)?;
        out.flush()
    }

    fn close_output_stream(&mut self) -> io::Result<()> {
        self.dest.close()
    }
}
