//! Streaming grading API: emit rows as questions are read.
//!
//! A 40-question sheet means 40 model calls. [`grade_stream`] yields each
//! [`GradeRow`] as soon as it is ready so callers can show results live.
//! Rows always arrive in question order, including with `concurrency > 1`.
//!
//! Under [`AmbiguousPolicy::Abort`] the offending question is yielded as
//! `Err(GradeError::AmbiguousResponse)` and the stream ends.
//!
//! The run-level rules match [`grade_image`](crate::grade_image): if no
//! question could be read, every row is still yielded and the stream ends
//! with `Err(GradeError::AllQuestionsFailed)`. Progress callbacks see
//! `on_grading_start` when the stream is built and `on_grading_complete`
//! after the last row, except when the run ends in an error.

use crate::answer_key::AnswerKey;
use crate::config::{AmbiguousPolicy, GradingConfig};
use crate::error::{GradeError, QuestionError};
use crate::grade::{grade_question, render_and_encode, resolve_provider};
use crate::pipeline::analyze::{QuestionAnalyzer, VisionAnalyzer};
use crate::pipeline::input;
use crate::report::GradeRow;
use edgequake_llm::ImageData;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of grade rows.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<GradeRow, GradeError>> + Send>>;

/// Grade a sheet, streaming one row per question.
///
/// # Returns
/// - `Ok(RowStream)`: one item per question, in order, plus a trailing
///   `AllQuestionsFailed` error when nothing could be read
/// - `Err(GradeError)`: fatal error before any question was asked
///   (file not found, not a PDF, no provider, etc.)
pub async fn grade_stream(
    input_str: impl AsRef<str>,
    key: &AnswerKey,
    config: &GradingConfig,
) -> Result<RowStream, GradeError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming grading: {}", input_str);

    let source = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let provider = resolve_provider(config)?;
    let image = render_and_encode(&source, config).await?;

    let analyzer = Arc::new(VisionAnalyzer::new(provider, config));
    Ok(grade_image_stream(analyzer, image, key, config))
}

/// Stream rows for an already-encoded sheet with any analyzer.
pub fn grade_image_stream<A>(
    analyzer: Arc<A>,
    image: ImageData,
    key: &AnswerKey,
    config: &GradingConfig,
) -> RowStream
where
    A: QuestionAnalyzer + 'static,
{
    let total = key.len();
    let policy = config.ambiguous_policy;
    let callback = config.progress_callback.clone();
    let items: Vec<_> = key.iter().collect();

    if let Some(cb) = &callback {
        cb.on_grading_start(total);
    }
    let done_callback = callback.clone();

    let rows = stream::iter(items)
        .map(move |(question, expected)| {
            let analyzer = Arc::clone(&analyzer);
            let image = image.clone();
            let callback = callback.clone();
            async move {
                grade_question(
                    analyzer.as_ref(),
                    &image,
                    question,
                    expected,
                    total,
                    policy,
                    callback.as_ref(),
                )
                .await
            }
        })
        .buffered(config.concurrency.max(1))
        .boxed();

    let s = stream::unfold(Some((rows, Tally::default())), move |state| {
        let callback = done_callback.clone();
        async move {
            let (mut rows, mut tally) = state?;
            let Some(row) = rows.next().await else {
                if tally.read == 0 {
                    let first_error = tally
                        .first_error
                        .unwrap_or_else(|| "Unknown error".to_string());
                    return Some((
                        Err(GradeError::AllQuestionsFailed { total, first_error }),
                        None,
                    ));
                }
                if let Some(cb) = &callback {
                    cb.on_grading_complete(tally.score, total);
                }
                return None;
            };

            match &row.error {
                Some(QuestionError::AmbiguousResponse { question, response })
                    if policy == AmbiguousPolicy::Abort =>
                {
                    let err = GradeError::AmbiguousResponse {
                        question: *question,
                        response: response.clone(),
                    };
                    Some((Err(err), None))
                }
                _ => {
                    tally.record(&row);
                    Some((Ok(row), Some((rows, tally))))
                }
            }
        }
    });

    Box::pin(s)
}

/// Running score kept while rows stream past.
#[derive(Default)]
struct Tally {
    score: usize,
    read: usize,
    first_error: Option<String>,
}

impl Tally {
    fn record(&mut self, row: &GradeRow) {
        if row.is_match {
            self.score += 1;
        }
        match &row.error {
            None => self.read += 1,
            Some(e) => {
                if self.first_error.is_none() {
                    self.first_error = Some(e.to_string());
                }
            }
        }
    }
}
