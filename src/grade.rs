//! Grading entry points and the per-question orchestration loop.
//!
//! [`grade_image`] is the UI-agnostic core: given an encoded sheet, an
//! answer key, and an analyzer, it returns a [`GradeReport`]. Everything
//! else in this module resolves inputs and providers and then calls it.
//!
//! ## Failure policy
//!
//! A question that cannot be read is recorded on its row and the remaining
//! questions are still graded. The run fails only when every question
//! fails, or when an ambiguous reply meets [`AmbiguousPolicy::Abort`].
//! Call [`GradeReport::into_result`] to treat any unread question as fatal.

use crate::answer_key::{AnswerKey, Letter};
use crate::config::{AmbiguousPolicy, GradingConfig};
use crate::error::{GradeError, QuestionError};
use crate::pipeline::analyze::{
    self, Analysis, AnalysisFailure, QuestionAnalyzer, VisionAnalyzer,
};
use crate::pipeline::input::{self, PdfSource};
use crate::pipeline::{encode, render};
use crate::progress::ProgressCallback;
use crate::report::{GradeReport, GradeRow};
use edgequake_llm::{ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Grade a sheet from a PDF file path or URL.
///
/// # Errors
/// Returns `Err(GradeError)` only for fatal errors:
/// - file not found / not a PDF / page out of range
/// - no LLM provider configured
/// - every question failed, or an ambiguous reply under `AmbiguousPolicy::Abort`
pub async fn grade(
    input_str: impl AsRef<str>,
    key: &AnswerKey,
    config: &GradingConfig,
) -> Result<GradeReport, GradeError> {
    let input_str = input_str.as_ref();
    info!("Starting grading: {}", input_str);

    let source = input::resolve_input(input_str, config.download_timeout_secs).await?;
    grade_source(&source, key, config).await
}

/// Grade a sheet held in memory, e.g. an uploaded file.
pub async fn grade_from_bytes(
    bytes: &[u8],
    key: &AnswerKey,
    config: &GradingConfig,
) -> Result<GradeReport, GradeError> {
    let source = PdfSource::from_bytes("<uploaded PDF>", bytes.to_vec())?;
    grade_source(&source, key, config).await
}

/// Synchronous wrapper around [`grade`].
///
/// Creates a temporary tokio runtime internally.
pub fn grade_sync(
    input_str: impl AsRef<str>,
    key: &AnswerKey,
    config: &GradingConfig,
) -> Result<GradeReport, GradeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| GradeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(grade(input_str, key, config))
}

/// Grade an already-resolved PDF.
pub async fn grade_source(
    source: &PdfSource,
    key: &AnswerKey,
    config: &GradingConfig,
) -> Result<GradeReport, GradeError> {
    let total_start = Instant::now();

    // Resolve the provider before rendering so a missing API key fails fast.
    let provider = resolve_provider(config)?;

    let render_start = Instant::now();
    let image = render_and_encode(source, config).await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    let analyzer = VisionAnalyzer::new(provider, config);
    let mut report = grade_image(&analyzer, &image, key, config).await?;

    report.stats.render_duration_ms = render_duration_ms;
    report.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Grading complete: {}/{} correct, {} unread, {}ms total",
        report.score, report.total, report.stats.failed_questions, report.stats.total_duration_ms
    );

    Ok(report)
}

/// Rasterise the configured page and encode it for the model.
pub async fn render_and_encode(
    source: &PdfSource,
    config: &GradingConfig,
) -> Result<ImageData, GradeError> {
    let img = render::rasterize_page(
        source,
        config.page,
        config.dpi,
        config.max_rendered_pixels,
        config.password.as_deref(),
    )
    .await?;

    encode::encode_image(&img, config.image_format, config.jpeg_quality).map_err(|e| {
        GradeError::EncodeFailed {
            format: config.image_format.to_string(),
            detail: e.to_string(),
        }
    })
}

/// Grade every question of `key` against one encoded sheet image.
///
/// Questions are dispatched in ascending order and rows come back in the
/// same order; with `concurrency > 1` several calls may be in flight at
/// once. Every question receives the same full-page image.
pub async fn grade_image<A: QuestionAnalyzer>(
    analyzer: &A,
    image: &ImageData,
    key: &AnswerKey,
    config: &GradingConfig,
) -> Result<GradeReport, GradeError> {
    let total = key.len();
    let policy = config.ambiguous_policy;
    let callback = config.progress_callback.as_ref();

    if let Some(cb) = callback {
        cb.on_grading_start(total);
    }

    let llm_start = Instant::now();
    let mut rows: Vec<GradeRow> = Vec::with_capacity(total);

    let mut pending = stream::iter(key.iter())
        .map(|(question, expected)| {
            grade_question(analyzer, image, question, expected, total, policy, callback)
        })
        .buffered(config.concurrency.max(1));

    while let Some(row) = pending.next().await {
        if policy == AmbiguousPolicy::Abort {
            if let Some(QuestionError::AmbiguousResponse { question, response }) = &row.error {
                return Err(GradeError::AmbiguousResponse {
                    question: *question,
                    response: response.clone(),
                });
            }
        }
        rows.push(row);
    }

    let mut report = GradeReport::from_rows(rows);
    report.stats.llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    if report.stats.read_questions == 0 {
        let first_error = report
            .failures()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(GradeError::AllQuestionsFailed { total, first_error });
    }

    if let Some(cb) = callback {
        cb.on_grading_complete(report.score, total);
    }

    Ok(report)
}

/// Read one question and turn the outcome into a row.
pub(crate) async fn grade_question<A: QuestionAnalyzer>(
    analyzer: &A,
    image: &ImageData,
    question: usize,
    expected: Letter,
    total: usize,
    policy: AmbiguousPolicy,
    callback: Option<&ProgressCallback>,
) -> GradeRow {
    if let Some(cb) = callback {
        cb.on_question_start(question, total);
    }

    let start = Instant::now();
    let outcome = analyze::analyze(analyzer, image, question, policy).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let row = match outcome {
        Ok(Analysis {
            detection,
            raw_response,
            input_tokens,
            output_tokens,
            retries,
        }) => {
            let mut row = GradeRow::read(question, expected, detection);
            row.raw_response = Some(raw_response);
            row.input_tokens = input_tokens;
            row.output_tokens = output_tokens;
            row.retries = retries;
            row
        }
        Err(AnalysisFailure {
            error,
            input_tokens,
            output_tokens,
            retries,
        }) => {
            warn!("{}", error);
            let mut row = GradeRow::failed(question, expected, error);
            row.input_tokens = input_tokens;
            row.output_tokens = output_tokens;
            row.retries = retries;
            row
        }
    };
    let row = GradeRow { duration_ms, ..row };

    debug!(
        "Question {}/{}: detected {}, expected {}",
        question,
        total,
        row.detected_label(),
        expected
    );

    if let Some(cb) = callback {
        match &row.error {
            None => cb.on_question_complete(question, total, &row.detected_label()),
            Some(e) => cb.on_question_error(question, total, &e.to_string()),
        }
    }

    row
}

/// Read a single question off `page` (0-indexed) of a sheet. No answer key
/// is involved; `config.page` is ignored.
pub async fn detect_question(
    input_str: impl AsRef<str>,
    page: usize,
    question: usize,
    config: &GradingConfig,
) -> Result<Analysis, GradeError> {
    if question == 0 {
        return Err(GradeError::InvalidConfig(
            "Questions are 1-indexed, minimum is 1".into(),
        ));
    }
    let source = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let provider = resolve_provider(config)?;
    let config = GradingConfig {
        page,
        ..config.clone()
    };
    let image = render_and_encode(&source, &config).await?;
    let analyzer = VisionAnalyzer::new(provider, &config);

    match analyze::analyze(&analyzer, &image, question, config.ambiguous_policy).await {
        Ok(a) => Ok(a),
        Err(failure) => match failure.error {
            QuestionError::AmbiguousResponse { question, response } => {
                Err(GradeError::AmbiguousResponse { question, response })
            }
            e => Err(e.into()),
        },
    }
}

/// Basic facts about a PDF, available without a model or API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetInfo {
    pub source: String,
    pub size_bytes: usize,
    pub page_count: usize,
}

/// Inspect a PDF without grading it.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &GradingConfig,
) -> Result<SheetInfo, GradeError> {
    let source = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let page_count = render::page_count(&source, config.password.as_deref()).await?;
    Ok(SheetInfo {
        source: source.name.clone(),
        size_bytes: source.bytes.len(),
        page_count,
    })
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, GradeError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        GradeError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is. Construct it
///    once per process and share it across runs.
/// 2. **Named provider** (`config.provider_name`) with `config.model`.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Auto-detection** over every known API key variable.
///
/// No credential anywhere is a fatal [`GradeError::ProviderNotConfigured`].
pub fn resolve_provider(config: &GradingConfig) -> Result<Arc<dyn LLMProvider>, GradeError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, config.model_or_default());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", config.model_or_default());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| GradeError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer_key::Detection;
    use crate::pipeline::analyze::AnalyzerReply;

    /// Answers from a fixed list of replies, indexed by question.
    struct Replies(Vec<&'static str>);

    impl QuestionAnalyzer for Replies {
        async fn ask(
            &self,
            _image: &ImageData,
            question: usize,
            _previous: Option<&str>,
        ) -> Result<AnalyzerReply, QuestionError> {
            Ok(AnalyzerReply::text(self.0[question - 1]))
        }
    }

    fn image() -> ImageData {
        ImageData::new("AAAA", "image/jpeg")
    }

    #[tokio::test]
    async fn worked_example() {
        let key = AnswerKey::parse("DDA").unwrap();
        let config = GradingConfig::default();
        let report = grade_image(&Replies(vec!["D", "A", "A"]), &image(), &key, &config)
            .await
            .unwrap();

        assert_eq!(report.score, 2);
        let got: Vec<_> = report
            .rows
            .iter()
            .map(|r| (r.expected, r.detected, r.is_match))
            .collect();
        assert_eq!(
            got,
            vec![
                (Letter::D, Some(Detection::Mark(Letter::D)), true),
                (Letter::D, Some(Detection::Mark(Letter::A)), false),
                (Letter::A, Some(Detection::Mark(Letter::A)), true),
            ]
        );
    }

    #[tokio::test]
    async fn abort_policy_fails_the_run() {
        let key = AnswerKey::parse("AB").unwrap();
        let config = GradingConfig::builder()
            .ambiguous_policy(AmbiguousPolicy::Abort)
            .build()
            .unwrap();
        let err = grade_image(&Replies(vec!["A", "A/B"]), &image(), &key, &config)
            .await
            .unwrap_err();
        match err {
            GradeError::AmbiguousResponse { question, response } => {
                assert_eq!(question, 2);
                assert_eq!(response, "A/B");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_failed_is_fatal() {
        let key = AnswerKey::parse("AB").unwrap();
        let config = GradingConfig::builder()
            .ambiguous_policy(AmbiguousPolicy::MarkWrong)
            .build()
            .unwrap();
        let err = grade_image(&Replies(vec!["??", "!!"]), &image(), &key, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::AllQuestionsFailed { total: 2, .. }));
    }

    #[tokio::test]
    async fn detect_rejects_question_zero() {
        let err = detect_question("sheet.pdf", 0, 0, &GradingConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::InvalidConfig(_)));
    }
}
