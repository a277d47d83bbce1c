//! Sequencer over a [`ReportWriter`]
//!
//! The caller decides when the report starts and ends; the handler only
//! remembers what framing has been written so it is never written twice.

use std::io;

use super::report_writer::{ReportFragment, ReportWriter};

pub struct ProcessingHandler {
    writer: Box<dyn ReportWriter>,
    started: bool,
    ended: bool,
    closed: bool,
}

impl ProcessingHandler {
    pub fn new(writer: Box<dyn ReportWriter>) -> Self {
        Self {
            writer,
            started: false,
            ended: false,
            closed: false,
        }
    }

    pub fn start_report(&mut self) -> io::Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.writer.start_document()
    }

    pub fn fill_report(&mut self, fragment: &ReportFragment) -> io::Result<()> {
        self.writer.write(fragment)
    }

    pub fn end_report(&mut self) -> io::Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.writer.end_document()
    }

    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.close_output_stream()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
