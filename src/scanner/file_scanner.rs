//! Candidate file discovery

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Whether `path` carries a `.pdf` extension (case-insensitive)
pub fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Collect the files to validate from a list of roots
///
/// # Arguments
/// * `roots` - Files and directories given by the user
/// * `recursive` - Whether to descend into subdirectories
/// * `accept_non_pdf` - Keep files without a `.pdf` extension
///
/// # Returns
/// Absolute paths of existing regular files, first occurrence order,
/// without duplicates. Missing or unreadable entries are logged and
/// skipped.
pub fn collect_files(roots: &[PathBuf], recursive: bool, accept_non_pdf: bool) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();
    let mut accept = |path: &Path| {
        if !accept_non_pdf && !has_pdf_extension(path) {
            return;
        }
        match fs::canonicalize(path) {
            Ok(absolute) => {
                if seen.insert(absolute.clone()) {
                    files.push(absolute);
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    };

    for root in roots {
        let metadata = match fs::metadata(root) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %root.display(), error = %e, "skipping missing path");
                continue;
            }
        };

        if metadata.is_file() {
            accept(root);
        } else if metadata.is_dir() {
            let max_depth = if recursive { usize::MAX } else { 1 };
            for entry in WalkDir::new(root).follow_links(false).max_depth(max_depth) {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => accept(entry.path()),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "skipping unreadable directory entry"),
                }
            }
        } else {
            debug!(path = %root.display(), "skipping special file");
        }
    }

    files
}
