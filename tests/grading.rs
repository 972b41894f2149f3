//! Grading-loop integration tests driven by stub analyzers.
//!
//! No PDF engine and no network: every test hands `grade_image` an encoded
//! placeholder image and an in-process `QuestionAnalyzer`.

use edgequake_llm::ImageData;
use omr_grader::{
    grade_image, AmbiguousPolicy, AnalyzerReply, AnswerKey, Detection, GradeError,
    GradingConfig, GradingProgressCallback, Letter, QuestionAnalyzer, QuestionError, RowStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Stubs ────────────────────────────────────────────────────────────────────

/// Replies with a fixed string per question; missing questions fail.
struct Sheet {
    replies: HashMap<usize, String>,
    calls: AtomicUsize,
}

impl Sheet {
    /// `marks` is read left to right as questions 1..=N.
    fn from_marks(marks: &str) -> Self {
        let replies = marks
            .chars()
            .enumerate()
            .map(|(i, c)| (i + 1, c.to_string()))
            .collect();
        Self {
            replies,
            calls: AtomicUsize::new(0),
        }
    }
}

impl QuestionAnalyzer for Sheet {
    async fn ask(
        &self,
        _image: &ImageData,
        question: usize,
        _previous: Option<&str>,
    ) -> Result<AnalyzerReply, QuestionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.replies.get(&question) {
            Some(text) => Ok(AnalyzerReply {
                text: text.clone(),
                input_tokens: 1000,
                output_tokens: 1,
                retries: 0,
            }),
            None => Err(QuestionError::AnalyzerFailed {
                question,
                retries: 2,
                detail: "HTTP 503".into(),
            }),
        }
    }
}

/// Sleeps longer for early questions so completions arrive out of order.
struct SlowStart;

impl QuestionAnalyzer for SlowStart {
    async fn ask(
        &self,
        _image: &ImageData,
        question: usize,
        _previous: Option<&str>,
    ) -> Result<AnalyzerReply, QuestionError> {
        let delay = 40u64.saturating_sub(question as u64 * 5);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(AnalyzerReply::text("A"))
    }
}

/// Every reply costs 1000 input tokens and one transport retry; question 2
/// never gets a clear answer.
struct Hesitant {
    calls: AtomicUsize,
}

impl QuestionAnalyzer for Hesitant {
    async fn ask(
        &self,
        _image: &ImageData,
        question: usize,
        _previous: Option<&str>,
    ) -> Result<AnalyzerReply, QuestionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if question == 2 { "B or C" } else { "A" };
        Ok(AnalyzerReply {
            text: text.into(),
            input_tokens: 1000,
            output_tokens: 1,
            retries: 1,
        })
    }
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    final_score: Mutex<Option<(usize, usize)>>,
}

impl GradingProgressCallback for Recorder {
    fn on_grading_start(&self, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_question_complete(&self, _q: usize, _total: usize, _answer: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_question_error(&self, _q: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_grading_complete(&self, score: usize, total: usize) {
        *self.final_score.lock().unwrap() = Some((score, total));
    }
}

fn image() -> ImageData {
    ImageData::new("/9j/AAAA", "image/jpeg")
}

fn config(policy: AmbiguousPolicy) -> GradingConfig {
    GradingConfig::builder()
        .ambiguous_policy(policy)
        .build()
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sheet_matching_the_key_scores_full_marks() {
    let key = AnswerKey::parse("DDACBCBBCCACBCBADAAA").unwrap();
    let sheet = Sheet::from_marks("DDACBCBBCCACBCBADAAA");
    let report = grade_image(&sheet, &image(), &key, &GradingConfig::default())
        .await
        .unwrap();

    assert_eq!(report.score, key.len());
    assert_eq!(report.total, key.len());
    assert!(report.rows.iter().all(|r| r.status() == RowStatus::Correct));
    assert_eq!(report.stats.total_input_tokens, 20_000);
    assert_eq!(sheet.calls.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn blank_sheet_scores_zero_without_errors() {
    let key = AnswerKey::parse("ABCD").unwrap();
    let report = grade_image(&Sheet::from_marks("––––"), &image(), &key, &GradingConfig::default())
        .await
        .unwrap();

    assert_eq!(report.score, 0);
    assert_eq!(report.stats.blank_questions, 4);
    assert_eq!(report.stats.failed_questions, 0);
    assert!(report
        .rows
        .iter()
        .all(|r| r.detected == Some(Detection::Blank) && r.error.is_none()));
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn rows_align_with_the_key() {
    let key = AnswerKey::parse("DDA").unwrap();
    let report = grade_image(&Sheet::from_marks("DAA"), &image(), &key, &GradingConfig::default())
        .await
        .unwrap();

    assert_eq!(report.rows.len(), key.len());
    for (row, (q, expected)) in report.rows.iter().zip(key.iter()) {
        assert_eq!(row.question, q);
        assert_eq!(row.expected, expected);
        assert_eq!(
            row.is_match,
            row.detected == Some(Detection::Mark(expected))
        );
    }
    assert_eq!(report.score, 2);
    assert_eq!(report.rows[1].detected, Some(Detection::Mark(Letter::A)));
}

#[tokio::test]
async fn failed_question_is_recorded_and_grading_continues() {
    let key = AnswerKey::parse("ABC").unwrap();
    // No reply scripted for question 3.
    let report = grade_image(&Sheet::from_marks("AB"), &image(), &key, &GradingConfig::default())
        .await
        .unwrap();

    assert_eq!(report.score, 2);
    assert_eq!(report.stats.failed_questions, 1);
    let failed = &report.rows[2];
    assert_eq!(failed.status(), RowStatus::Error);
    assert!(!failed.is_match);
    assert!(matches!(
        failed.error,
        Some(QuestionError::AnalyzerFailed { question: 3, .. })
    ));
    assert!(matches!(
        report.into_result(),
        Err(GradeError::PartialFailure {
            graded: 2,
            failed: 1,
            total: 3
        })
    ));
}

#[tokio::test]
async fn every_question_failing_is_fatal() {
    let key = AnswerKey::parse("ABCD").unwrap();
    let err = grade_image(&Sheet::from_marks(""), &image(), &key, &GradingConfig::default())
        .await
        .unwrap_err();

    match err {
        GradeError::AllQuestionsFailed { total, first_error } => {
            assert_eq!(total, 4);
            assert!(first_error.contains("HTTP 503"), "got: {first_error}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn ambiguous_reply_marked_wrong_keeps_raw_text() {
    let key = AnswerKey::parse("AB").unwrap();
    let sheet = Sheet::from_marks("AX");
    let report = grade_image(&sheet, &image(), &key, &config(AmbiguousPolicy::MarkWrong))
        .await
        .unwrap();

    assert_eq!(report.score, 1);
    assert_eq!(report.rows[1].raw_response.as_deref(), Some("X"));
    assert_eq!(report.rows[1].detected_label(), "?");
    // MarkWrong never re-asks.
    assert_eq!(sheet.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_once_asks_again_before_giving_up() {
    let key = AnswerKey::parse("AB").unwrap();
    let sheet = Sheet::from_marks("AX");
    let report = grade_image(&sheet, &image(), &key, &config(AmbiguousPolicy::RetryOnce))
        .await
        .unwrap();

    assert_eq!(report.stats.failed_questions, 1);
    assert_eq!(sheet.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unreadable_question_still_counts_its_tokens() {
    let key = AnswerKey::parse("AB").unwrap();
    let sheet = Hesitant {
        calls: AtomicUsize::new(0),
    };
    let report = grade_image(&sheet, &image(), &key, &config(AmbiguousPolicy::RetryOnce))
        .await
        .unwrap();

    assert_eq!(sheet.calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.total_input_tokens, 3000);
    assert_eq!(report.stats.total_output_tokens, 3);

    let unread = &report.rows[1];
    assert_eq!(unread.status(), RowStatus::Error);
    assert_eq!(unread.input_tokens, 2000);
    assert_eq!(unread.output_tokens, 2);
    // One transport retry per ask plus the re-ask.
    assert_eq!(unread.retries, 3);
    assert_eq!(unread.raw_response.as_deref(), Some("B or C"));
}

#[tokio::test]
async fn transport_failure_row_records_its_retries() {
    let key = AnswerKey::parse("AB").unwrap();
    let report = grade_image(&Sheet::from_marks("A"), &image(), &key, &GradingConfig::default())
        .await
        .unwrap();

    assert_eq!(report.rows[1].retries, 2);
    assert_eq!(report.rows[1].input_tokens, 0);
}

#[tokio::test]
async fn abort_policy_stops_the_run() {
    let key = AnswerKey::parse("ABCD").unwrap();
    let err = grade_image(
        &Sheet::from_marks("AB?D"),
        &image(),
        &key,
        &config(AmbiguousPolicy::Abort),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        GradeError::AmbiguousResponse { question: 3, .. }
    ));
}

#[tokio::test]
async fn concurrent_grading_keeps_question_order() {
    let key = AnswerKey::parse("AAAAAAAA").unwrap();
    let config = GradingConfig::builder().concurrency(8).build().unwrap();
    let report = grade_image(&SlowStart, &image(), &key, &config)
        .await
        .unwrap();

    let order: Vec<usize> = report.rows.iter().map(|r| r.question).collect();
    assert_eq!(order, (1..=8).collect::<Vec<_>>());
    assert_eq!(report.score, 8);
}

#[tokio::test]
async fn progress_events_cover_every_question() {
    let recorder = Arc::new(Recorder::default());
    let config = GradingConfig::builder()
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let key = AnswerKey::parse("ABCDA").unwrap();

    let report = grade_image(&Sheet::from_marks("ABCD"), &image(), &key, &config)
        .await
        .unwrap();

    assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 4);
    assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    assert_eq!(
        *recorder.final_score.lock().unwrap(),
        Some((report.score, 5))
    );
}
