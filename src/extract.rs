//! Plain-text extraction from uploaded source documents.
//!
//! PDFs are read page by page and concatenated into flat text with no
//! page-boundary markers; layout fidelity is not a goal. Plain-text and
//! markdown files pass through as UTF-8.

use std::path::Path;

use crate::error::{Error, Result};

/// File extensions accepted at upload time.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

pub fn is_supported(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Extract the full text of a source document.
pub fn extract_text(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => pdf_extract::extract_text(path)
            .map_err(|e| Error::Validation(format!("PDF extraction failed: {}", e))),
        "txt" | "md" => std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(format!(
                "source file not found: {}",
                path.display()
            )),
            _ => Error::Persistence(format!("failed to read {}: {}", path.display(), e)),
        }),
        other => Err(Error::Validation(format!(
            "unsupported file type: .{} (expected one of: pdf, txt, md)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_supported_extensions() {
        assert!(is_supported("ch1.pdf"));
        assert!(is_supported("notes.TXT"));
        assert!(is_supported("syllabus.md"));
        assert!(!is_supported("slides.pptx"));
        assert!(!is_supported("README"));
    }

    #[test]
    fn unsupported_extension_is_a_validation_error() {
        let err = extract_text(Path::new("lesson.docx")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn invalid_pdf_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = extract_text(&path).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motion.txt");
        std::fs::write(&path, "A body at rest stays at rest.").unwrap();
        assert_eq!(
            extract_text(&path).unwrap(),
            "A body at rest stays at rest."
        );
    }

    #[test]
    fn missing_text_file_is_not_found() {
        let err = extract_text(Path::new("/nonexistent/ch9.txt")).unwrap_err();
        assert!(err.is_not_found());
    }
}
