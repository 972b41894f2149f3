//! Error types for the omr-grader library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`GradeError`]: **Fatal**: the grading run cannot proceed at all
//!   (bad input file, unreadable page, provider not configured, malformed
//!   answer key). Returned as `Err(GradeError)` from the top-level `grade*`
//!   functions.
//!
//! * [`QuestionError`]: **Non-fatal**: a single question could not be read
//!   (transient API error, timeout, a reply outside the answer grammar) but
//!   every other question is still graded. Stored inside
//!   [`crate::report::GradeRow`] so the report shows exactly which question
//!   failed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the omr-grader library.
///
/// Question-level failures use [`QuestionError`] and are stored in
/// [`crate::report::GradeRow`] rather than propagated here.
#[derive(Debug, Error)]
pub enum GradeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Document errors ───────────────────────────────────────────────────
    /// The bytes were read, but they are not a PDF.
    #[error("Input is not a valid PDF: '{source_name}'\nFirst bytes: {magic:?}")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{source_name}' is corrupt: {detail}")]
    CorruptPdf { source_name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{source_name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { source_name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{source_name}'")]
    WrongPassword { source_name: String },

    /// The requested page does not exist. `page` is 1-indexed.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error while rendering the page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Encoding errors ───────────────────────────────────────────────────
    /// The rendered page could not be serialised to JPEG/PNG.
    #[error("Image encoding failed ({format}): {detail}")]
    EncodeFailed { format: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model replied outside the answer grammar and the run is
    /// configured to abort on such replies.
    #[error("Question {question}: ambiguous model response {response:?}")]
    AmbiguousResponse { question: usize, response: String },

    /// A single-question read failed outright (single-question detection).
    #[error(transparent)]
    Question(#[from] QuestionError),

    /// Every question failed; the report would carry no information.
    #[error("All {total} questions failed.\nFirst error: {first_error}")]
    AllQuestionsFailed { total: usize, first_error: String },

    /// Some questions were read but at least one failed.
    ///
    /// Returned by [`crate::report::GradeReport::into_result`] when the
    /// caller wants to treat any question failure as an error.
    #[error("{failed}/{total} questions could not be read")]
    PartialFailure {
        graded: usize,
        failed: usize,
        total: usize,
    },

    // ── Answer key errors ─────────────────────────────────────────────────
    /// The answer key is empty or contains something other than A–D.
    #[error("Invalid answer key: {0}")]
    InvalidAnswerKey(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file (report export, sheet PDF).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The synthetic sheet could not be assembled.
    #[error("Answer sheet generation failed: {0}")]
    SheetGenerationFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform (e.g. from bblanchon/pdfium-binaries) and either:\n\
  • place it next to the omr-grade binary or in the working directory, or\n\
  • set PDFIUM_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single question.
///
/// Stored alongside [`crate::report::GradeRow`] when a question fails.
/// Grading continues unless ALL questions fail.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum QuestionError {
    /// The model call failed after retries.
    #[error("Question {question}: model call failed after {retries} retries: {detail}")]
    AnalyzerFailed {
        question: usize,
        retries: u8,
        detail: String,
    },

    /// The model call timed out.
    #[error("Question {question}: model call timed out after {secs}s")]
    Timeout { question: usize, secs: u64 },

    /// The reply was neither a single A–D letter nor the no-mark marker.
    #[error("Question {question}: ambiguous response {response:?}")]
    AmbiguousResponse { question: usize, response: String },
}

impl QuestionError {
    /// The 1-indexed question this error belongs to.
    pub fn question(&self) -> usize {
        match self {
            QuestionError::AnalyzerFailed { question, .. }
            | QuestionError::Timeout { question, .. }
            | QuestionError::AmbiguousResponse { question, .. } => *question,
        }
    }

    /// Transport retries spent before the error was given up on.
    pub fn retries(&self) -> u8 {
        match self {
            QuestionError::AnalyzerFailed { retries, .. } => *retries,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = GradeError::PartialFailure {
            graded: 39,
            failed: 1,
            total: 40,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/40"), "got: {msg}");
    }

    #[test]
    fn page_out_of_range_display() {
        let e = GradeError::PageOutOfRange { page: 3, total: 1 };
        assert!(e.to_string().contains("Page 3"));
        assert!(e.to_string().contains("1 pages"));
    }

    #[test]
    fn ambiguous_display_quotes_response() {
        let e = QuestionError::AmbiguousResponse {
            question: 7,
            response: "B or C".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Question 7"));
        assert!(msg.contains("\"B or C\""), "got: {msg}");
    }

    #[test]
    fn question_accessor() {
        let e = QuestionError::Timeout {
            question: 12,
            secs: 60,
        };
        assert_eq!(e.question(), 12);
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn question_error_serialises() {
        let e = QuestionError::AnalyzerFailed {
            question: 2,
            retries: 3,
            detail: "HTTP 503".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        assert!(json.contains("AnalyzerFailed"));
        let back: QuestionError = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, e);
    }
}
