//! Report merging: writer strategies and the sequencing handler

pub mod mrr_writer;
pub mod processing_handler;
pub mod report_writer;
pub mod text_writer;
pub mod xml_writer;

pub use processing_handler::ProcessingHandler;
pub use report_writer::{
    purge_deferred_deletions, report_writer_for, ReportFormat, ReportFragment, ReportWriter,
};
