//! Grade report: one row per question, the score, and exports.
//!
//! A report is built once per run and never persisted by the library;
//! callers render it ([`GradeReport::render_table`]) or export it
//! ([`GradeReport::write_csv`], [`GradeReport::write_json`]).

use crate::answer_key::{Detection, Letter};
use crate::error::{GradeError, QuestionError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Column headers of the spreadsheet export.
pub const CSV_HEADER: [&str; 4] = ["Question", "Detected", "Correct", "Status"];

/// The outcome for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRow {
    /// 1-indexed question number.
    pub question: usize,
    pub expected: Letter,
    /// `None` when the question could not be read (see `error`).
    pub detected: Option<Detection>,
    pub is_match: bool,
    /// The model's reply, verbatim, when one was received.
    pub raw_response: Option<String>,
    pub error: Option<QuestionError>,
    pub retries: u8,
    pub duration_ms: u64,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl GradeRow {
    /// A row for a question that was read.
    pub fn read(question: usize, expected: Letter, detection: Detection) -> Self {
        Self {
            question,
            expected,
            detected: Some(detection),
            is_match: detection == Detection::Mark(expected),
            raw_response: None,
            error: None,
            retries: 0,
            duration_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// A row for a question that failed. Never a match.
    pub fn failed(question: usize, expected: Letter, error: QuestionError) -> Self {
        let raw_response = match &error {
            QuestionError::AmbiguousResponse { response, .. } => Some(response.clone()),
            _ => None,
        };
        Self {
            question,
            expected,
            detected: None,
            is_match: false,
            raw_response,
            error: Some(error),
            retries: 0,
            duration_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Detected column text: the letter, `–` for blank, `?` for a failure.
    pub fn detected_label(&self) -> String {
        match self.detected {
            Some(d) => d.to_string(),
            None => "?".to_string(),
        }
    }

    /// Status column text.
    pub fn status(&self) -> RowStatus {
        if self.error.is_some() {
            RowStatus::Error
        } else if self.is_match {
            RowStatus::Correct
        } else {
            RowStatus::Wrong
        }
    }
}

/// Per-row verdict shown in the Status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    Correct,
    Wrong,
    Error,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Correct => "correct",
            RowStatus::Wrong => "wrong",
            RowStatus::Error => "error",
        }
    }
}

/// Timing and token totals for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradeStats {
    pub total_questions: usize,
    pub read_questions: usize,
    pub failed_questions: usize,
    pub blank_questions: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of grading one sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    pub rows: Vec<GradeRow>,
    pub score: usize,
    pub total: usize,
    pub stats: GradeStats,
}

impl GradeReport {
    /// Build a report from rows already in question order.
    ///
    /// The score is recomputed from the rows; timing fields stay zero until
    /// the orchestrator fills them.
    pub fn from_rows(rows: Vec<GradeRow>) -> Self {
        let score = rows.iter().filter(|r| r.is_match).count();
        let total = rows.len();
        let stats = GradeStats {
            total_questions: total,
            read_questions: rows.iter().filter(|r| r.error.is_none()).count(),
            failed_questions: rows.iter().filter(|r| r.error.is_some()).count(),
            blank_questions: rows
                .iter()
                .filter(|r| r.detected == Some(Detection::Blank))
                .count(),
            total_input_tokens: rows.iter().map(|r| r.input_tokens as u64).sum(),
            total_output_tokens: rows.iter().map(|r| r.output_tokens as u64).sum(),
            ..Default::default()
        };
        Self {
            rows,
            score,
            total,
            stats,
        }
    }

    /// Percentage score, 0–100.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.score as f64 * 100.0 / self.total as f64
        }
    }

    /// Rows whose question could not be read.
    pub fn failures(&self) -> impl Iterator<Item = &GradeRow> {
        self.rows.iter().filter(|r| r.error.is_some())
    }

    /// Treat any unread question as an error.
    pub fn into_result(self) -> Result<Self, GradeError> {
        let failed = self.stats.failed_questions;
        if failed > 0 {
            return Err(GradeError::PartialFailure {
                graded: self.total - failed,
                failed,
                total: self.total,
            });
        }
        Ok(self)
    }

    /// Plain-text table with a score line, for terminals and logs.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:>8}  {:>8}  {:>7}  {}\n",
            CSV_HEADER[0], CSV_HEADER[1], CSV_HEADER[2], CSV_HEADER[3]
        ));
        out.push_str(&format!("{}\n", "-".repeat(36)));
        for row in &self.rows {
            out.push_str(&format!(
                "{:>8}  {:>8}  {:>7}  {}\n",
                row.question,
                row.detected_label(),
                row.expected.to_string(),
                row.status().as_str()
            ));
        }
        out.push_str(&format!(
            "\nScore: {} / {} ({:.1}%)\n",
            self.score,
            self.total,
            self.percentage()
        ));
        out
    }

    /// Spreadsheet export as a CSV string.
    pub fn to_csv_string(&self) -> Result<String, GradeError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        self.write_csv_records(&mut wtr)?;
        let bytes = wtr
            .into_inner()
            .map_err(|e| GradeError::Internal(format!("CSV flush: {e}")))?;
        String::from_utf8(bytes).map_err(|e| GradeError::Internal(format!("CSV utf-8: {e}")))
    }

    fn write_csv_records<W: std::io::Write>(
        &self,
        wtr: &mut csv::Writer<W>,
    ) -> Result<(), GradeError> {
        let csv_err = |e: csv::Error| GradeError::Internal(format!("CSV: {e}"));
        wtr.write_record(CSV_HEADER).map_err(csv_err)?;
        for row in &self.rows {
            wtr.write_record([
                row.question.to_string(),
                row.detected_label(),
                row.expected.to_string(),
                row.status().as_str().to_string(),
            ])
            .map_err(csv_err)?;
        }
        wtr.flush()
            .map_err(|e| GradeError::Internal(format!("CSV flush: {e}")))?;
        Ok(())
    }

    /// Write the spreadsheet export to `path`.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), GradeError> {
        let csv = self.to_csv_string()?;
        write_atomic(path.as_ref(), csv.as_bytes())
    }

    /// Write the whole report as pretty JSON to `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), GradeError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GradeError::Internal(format!("JSON: {e}")))?;
        write_atomic(path.as_ref(), json.as_bytes())
    }
}

/// Write to a temp file next to `path`, then rename over it, so readers
/// never observe a half-written export.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), GradeError> {
    let write_err = |source: std::io::Error| GradeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
