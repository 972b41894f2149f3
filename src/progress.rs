//! Progress-callback trait for per-question grading events.
//!
//! Inject an [`Arc<dyn GradingProgressCallback>`] via
//! [`crate::config::GradingConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through the sheet. A terminal progress
//! bar, a web socket, or a test counter can all sit behind the same trait.
//!
//! # Example
//!
//! ```rust
//! use omr_grader::{GradingConfig, GradingProgressCallback, ProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl GradingProgressCallback for Counter {
//!     fn on_question_complete(&self, _question: usize, _total: usize, _answer: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = GradingConfig::builder()
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))) as ProgressCallback)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it grades each question.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the events
/// for different questions may arrive from different tasks. All methods
/// default to no-ops.
pub trait GradingProgressCallback: Send + Sync {
    /// Called once, after the page is rendered and before the first question.
    fn on_grading_start(&self, total_questions: usize) {
        let _ = total_questions;
    }

    /// Called just before the model is asked about `question` (1-indexed).
    fn on_question_start(&self, question: usize, total_questions: usize) {
        let _ = (question, total_questions);
    }

    /// Called when a question was read. `answer` is the letter or the
    /// blank marker.
    fn on_question_complete(&self, question: usize, total_questions: usize, answer: &str) {
        let _ = (question, total_questions, answer);
    }

    /// Called when a question could not be read.
    fn on_question_error(&self, question: usize, total_questions: usize, error: &str) {
        let _ = (question, total_questions, error);
    }

    /// Called once after every question has been attempted.
    fn on_grading_complete(&self, score: usize, total_questions: usize) {
        let _ = (score, total_questions);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GradingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GradingConfig`].
pub type ProgressCallback = Arc<dyn GradingProgressCallback>;
