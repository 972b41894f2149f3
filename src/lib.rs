//! # omr-grader
//!
//! Grade multiple-choice bubble sheets with a Vision Language Model.
//!
//! ## Why this crate?
//!
//! Classic optical mark recognition needs a fixed template, registration
//! marks, and careful thresholding. Here the sheet page is rasterised and a
//! VLM is asked, one question at a time, which bubble is filled. The reply is
//! held to a one-character grammar, compared with the answer key, and
//! collected into a per-question report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    resolve local file or download from URL
//!  ├─ 2. Render   rasterise the sheet page via pdfium (spawn_blocking)
//!  ├─ 3. Encode   JPEG/PNG → base64 ImageData
//!  ├─ 4. Analyze  one model call per question, reply validated as A–D or –
//!  ├─ 5. Grade    compare with the answer key, score
//!  └─ 6. Report   table / CSV / JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omr_grader::{grade, AnswerKey, GradingConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let key = AnswerKey::parse("DDACBCBBCC")?;
//!     let config = GradingConfig::default();
//!     let report = grade("answer_sheet.pdf", &key, &config).await?;
//!     print!("{}", report.render_table());
//!     report.write_csv("results.csv")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a model
//!
//! [`grade_image`] takes any [`QuestionAnalyzer`], so the whole grading
//! loop can be driven by a stub. [`generate_sheet`] draws synthetic filled
//! sheets with a known answer key for end-to-end runs.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `omr-grade` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! ```toml
//! omr-grader = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod answer_key;
pub mod config;
pub mod error;
pub mod generate;
pub mod grade;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use answer_key::{AnswerKey, Detection, Letter};
pub use config::{AmbiguousPolicy, GradingConfig, GradingConfigBuilder, ImageFormat, DEFAULT_MODEL};
pub use error::{GradeError, QuestionError};
pub use generate::{generate_sheet, random_answers, write_sheet, SheetLayout};
pub use grade::{
    detect_question, grade, grade_from_bytes, grade_image, grade_source, grade_sync, inspect,
    render_and_encode, resolve_provider, SheetInfo,
};
pub use pipeline::analyze::{
    parse_response, Analysis, AnalysisFailure, AnalyzerReply, QuestionAnalyzer, VisionAnalyzer,
};
pub use pipeline::input::PdfSource;
pub use progress::{GradingProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{GradeReport, GradeRow, GradeStats, RowStatus};
pub use stream::{grade_image_stream, grade_stream, RowStream};
