//! Question analysis: ask a vision model which bubble is filled for one
//! question, and hold its reply to a strict grammar.
//!
//! The network call sits behind [`QuestionAnalyzer`] so the orchestrator can
//! be driven by a stub in tests. [`VisionAnalyzer`] is the production
//! implementation over an injected `edgequake_llm` provider.
//!
//! ## Reply grammar
//!
//! After trimming surrounding whitespace the reply must be exactly one
//! character:
//!
//! | Reply | Meaning |
//! |-------|---------|
//! | `A` `B` `C` `D` (any case) | that bubble is filled |
//! | `–` `-` `—` | no bubble filled |
//! | anything else, including empty | ambiguous |
//!
//! ## Retry Strategy
//!
//! Transport failures and timeouts are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). Ambiguous replies are not transport
//! failures; they follow [`AmbiguousPolicy`] instead.

use crate::answer_key::{Detection, Letter};
use crate::config::{AmbiguousPolicy, GradingConfig};
use crate::error::QuestionError;
use crate::prompts::{clarification_prompt, question_prompt, DEFAULT_SYSTEM_PROMPT};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Characters accepted as "no bubble filled".
pub const BLANK_MARKERS: [char; 3] = ['–', '-', '—'];

/// Raw model reply for one question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerReply {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Transport retries spent getting this reply.
    pub retries: u8,
}

impl AnalyzerReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Something that can be asked about one question on a sheet image.
///
/// `previous` carries the last ambiguous reply when the question is being
/// re-asked, so the implementation can tighten its instruction.
pub trait QuestionAnalyzer: Send + Sync {
    fn ask(
        &self,
        image: &ImageData,
        question: usize,
        previous: Option<&str>,
    ) -> impl Future<Output = Result<AnalyzerReply, QuestionError>> + Send;
}

/// A validated reading of one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub detection: Detection,
    /// The reply the detection was parsed from.
    pub raw_response: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Transport retries plus any re-ask after an ambiguous reply.
    pub retries: u8,
}

/// Parse a model reply against the reply grammar.
pub fn parse_response(question: usize, raw: &str) -> Result<Detection, QuestionError> {
    let trimmed = raw.trim();
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(letter) = Letter::from_char(c) {
            return Ok(Detection::Mark(letter));
        }
        if BLANK_MARKERS.contains(&c) {
            return Ok(Detection::Blank);
        }
    }
    Err(QuestionError::AmbiguousResponse {
        question,
        response: raw.to_string(),
    })
}

/// A question that could not be read, with what it cost to find out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisFailure {
    pub error: QuestionError,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Transport retries plus any re-ask after an ambiguous reply.
    pub retries: u8,
}

impl From<AnalysisFailure> for QuestionError {
    fn from(f: AnalysisFailure) -> Self {
        f.error
    }
}

/// Tokens and retries accumulated across the asks for one question.
#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
    retries: u8,
}

impl Usage {
    fn add_reply(&mut self, reply: &AnalyzerReply) {
        self.input_tokens += reply.input_tokens;
        self.output_tokens += reply.output_tokens;
        self.retries = self.retries.saturating_add(reply.retries);
    }

    fn fail(self, error: QuestionError) -> AnalysisFailure {
        AnalysisFailure {
            retries: self.retries.saturating_add(error.retries()),
            error,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }
}

/// Read one question: ask, validate, and apply the ambiguous-reply policy.
///
/// With [`AmbiguousPolicy::RetryOnce`] an ambiguous reply is re-asked once.
/// A reply that stays ambiguous is returned as
/// [`QuestionError::AmbiguousResponse`] under every policy; the orchestrator
/// decides whether that fails the row or the run. Failures still report the
/// tokens and retries spent on the question.
pub async fn analyze<A: QuestionAnalyzer>(
    analyzer: &A,
    image: &ImageData,
    question: usize,
    policy: AmbiguousPolicy,
) -> Result<Analysis, AnalysisFailure> {
    let mut usage = Usage::default();

    let first = analyzer
        .ask(image, question, None)
        .await
        .map_err(|e| usage.fail(e))?;
    usage.add_reply(&first);

    let (reply, parsed) = match parse_response(question, &first.text) {
        Err(QuestionError::AmbiguousResponse { .. }) if policy == AmbiguousPolicy::RetryOnce => {
            warn!(
                "Question {}: ambiguous reply {:?}, asking again",
                question, first.text
            );
            usage.retries = usage.retries.saturating_add(1);
            let second = analyzer
                .ask(image, question, Some(&first.text))
                .await
                .map_err(|e| usage.fail(e))?;
            usage.add_reply(&second);
            let parsed = parse_response(question, &second.text);
            (second, parsed)
        }
        parsed => (first, parsed),
    };

    let detection = parsed.map_err(|e| usage.fail(e))?;
    debug!("Question {}: read {}", question, detection);

    Ok(Analysis {
        detection,
        raw_response: reply.text,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        retries: usage.retries,
    })
}

/// Production analyzer: one chat-completion call per question.
///
/// The provider is constructed once per process and injected here; the
/// analyzer itself holds no other state.
#[derive(Clone)]
pub struct VisionAnalyzer {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl VisionAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &GradingConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    /// Message layout: the system prompt, then one user turn carrying the
    /// question instruction and the page image.
    fn build_messages(
        &self,
        image: &ImageData,
        question: usize,
        previous: Option<&str>,
    ) -> Vec<ChatMessage> {
        let instruction = match previous {
            Some(prev) => clarification_prompt(question, prev),
            None => question_prompt(question),
        };
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(instruction, vec![image.clone()]),
        ]
    }
}

impl QuestionAnalyzer for VisionAnalyzer {
    async fn ask(
        &self,
        image: &ImageData,
        question: usize,
        previous: Option<&str>,
    ) -> Result<AnalyzerReply, QuestionError> {
        let messages = self.build_messages(image, question, previous);
        let options = self.build_options();
        let call_timeout = Duration::from_secs(self.api_timeout_secs);

        let mut last_err: Option<String> = None;
        let mut timed_out = false;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Question {}: retry {}/{} after {}ms",
                    question, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "Question {}: reply {:?} ({} in / {} out tokens)",
                        question,
                        response.content,
                        response.prompt_tokens,
                        response.completion_tokens
                    );
                    return Ok(AnalyzerReply {
                        text: response.content,
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                        retries: attempt as u8,
                    });
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!(
                        "Question {}: attempt {} failed: {}",
                        question,
                        attempt + 1,
                        err_msg
                    );
                    timed_out = false;
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    warn!(
                        "Question {}: attempt {} timed out after {}s",
                        question,
                        attempt + 1,
                        self.api_timeout_secs
                    );
                    timed_out = true;
                    last_err = Some(format!("timed out after {}s", self.api_timeout_secs));
                }
            }
        }

        if timed_out {
            return Err(QuestionError::Timeout {
                question,
                secs: self.api_timeout_secs,
            });
        }

        Err(QuestionError::AnalyzerFailed {
            question,
            retries: self.max_retries as u8,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}
