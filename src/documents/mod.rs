// Document reading
// Turns files on disk into plain text ready for chunking


use std::path::Path;
use tracing::debug;

use crate::{Result, StudyError};

/// Largest file we are willing to read (50 MiB)
pub const MAX_DOCUMENT_SIZE: u64 = 50 * 1024 * 1024;

/// Read the text content of a document.
///
/// PDF files go through text extraction; anything else must be UTF-8 text.
#[inline]
pub fn read_document(path: &Path) -> Result<String> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        StudyError::Document(format!("Cannot read {}: {}", path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(StudyError::Document(format!(
            "{} is not a file",
            path.display()
        )));
    }

    let size = metadata.len();
    if size > MAX_DOCUMENT_SIZE {
        return Err(StudyError::Document(format!(
            "{} is too large: {:.1} MB (max {:.1} MB)",
            path.display(),
            size as f64 / (1024.0 * 1024.0),
            MAX_DOCUMENT_SIZE as f64 / (1024.0 * 1024.0)
        )));
    }

    let text = if is_pdf(path) {
        debug!("Extracting PDF text from {}", path.display());
        pdf_extract::extract_text(path).map_err(|e| {
            StudyError::Document(format!(
                "Failed to extract PDF text from {}: {}",
                path.display(),
                e
            ))
        })?
    } else {
        std::fs::read_to_string(path).map_err(|e| {
            StudyError::Document(format!("Failed to read {}: {}", path.display(), e))
        })?
    };

    debug!(
        "Read {} characters from {}",
        text.chars().count(),
        path.display()
    );
    Ok(text)
}

/// Name a document is remembered under: its file name
#[inline]
pub fn source_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}
