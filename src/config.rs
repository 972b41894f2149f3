//! Configuration types for grading an answer sheet.
//!
//! All grading behaviour is controlled through [`GradingConfig`], built via
//! its [`GradingConfigBuilder`]. The answer key is deliberately *not* part of
//! the config: it is an input of each run, passed next to the PDF.

use crate::error::GradeError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Model used when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Configuration for a grading run.
///
/// Built via [`GradingConfig::builder()`] or using
/// [`GradingConfig::default()`].
///
/// # Example
/// ```rust
/// use omr_grader::{AmbiguousPolicy, GradingConfig};
///
/// let config = GradingConfig::builder()
///     .dpi(200)
///     .model("gpt-4.1")
///     .ambiguous_policy(AmbiguousPolicy::Abort)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct GradingConfig {
    /// Rendering DPI used when rasterising the sheet. Range: 72–600. Default: 300.
    ///
    /// Bubbles are small; 300 DPI keeps a lightly pencilled mark visible
    /// after JPEG compression.
    pub dpi: u32,

    /// Optional cap on the longest rendered edge, in pixels. Default: None.
    pub max_rendered_pixels: Option<u32>,

    /// 0-indexed page holding the answer grid. Default: 0.
    pub page: usize,

    /// Transport encoding of the page image. Default: JPEG.
    pub image_format: ImageFormat,

    /// JPEG quality, 1–100. Ignored for PNG. Default: 85.
    pub jpeg_quality: u8,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may return per question. Default: 1.
    ///
    /// The answer grammar is a single character; anything longer is
    /// ambiguous anyway.
    pub max_tokens: usize,

    /// Retry attempts on a transport failure (not on ambiguous replies). Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// What to do when the model's reply is outside the answer grammar.
    pub ambiguous_policy: AmbiguousPolicy,

    /// Questions in flight at once. Default: 1 (one call at a time).
    ///
    /// Rows are always produced in question order regardless of this value.
    pub concurrency: usize,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per-question model call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Receives per-question progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: None,
            page: 0,
            image_format: ImageFormat::default(),
            jpeg_quality: 85,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1,
            max_retries: 2,
            retry_backoff_ms: 500,
            ambiguous_policy: AmbiguousPolicy::default(),
            concurrency: 1,
            password: None,
            system_prompt: None,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GradingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GradingConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("page", &self.page)
            .field("image_format", &self.image_format)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("ambiguous_policy", &self.ambiguous_policy)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn GradingProgressCallback>"),
            )
            .finish()
    }
}

impl GradingConfig {
    /// Create a new builder for `GradingConfig`.
    pub fn builder() -> GradingConfigBuilder {
        GradingConfigBuilder {
            config: Self::default(),
        }
    }

    /// The model this run will ask, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`GradingConfig`].
#[derive(Debug)]
pub struct GradingConfigBuilder {
    config: GradingConfig,
}

impl GradingConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = Some(px.max(100));
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.config.page = page;
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn ambiguous_policy(mut self, policy: AmbiguousPolicy) -> Self {
        self.config.ambiguous_policy = policy;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GradingConfig, GradeError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(GradeError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.max_tokens == 0 {
            return Err(GradeError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(GradeError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding used to ship the page image to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Lossy, small payload. (default)
    #[default]
    Jpeg,
    /// Lossless, larger payload.
    Png,
}

impl ImageFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Jpeg => f.write_str("jpeg"),
            ImageFormat::Png => f.write_str("png"),
        }
    }
}

/// Handling of a model reply that is neither A–D nor the no-mark marker.
///
/// | Policy | Effect |
/// |--------|--------|
/// | `MarkWrong` | the row is recorded as wrong, with the reply attached |
/// | `RetryOnce` | ask once more; if still ambiguous, as `MarkWrong` (default) |
/// | `Abort` | the whole run fails with [`GradeError::AmbiguousResponse`] |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AmbiguousPolicy {
    MarkWrong,
    #[default]
    RetryOnce,
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_grading_script() {
        let c = GradingConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.page, 0);
        assert_eq!(c.image_format, ImageFormat::Jpeg);
        assert_eq!(c.jpeg_quality, 85);
        assert_eq!(c.max_tokens, 1);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.ambiguous_policy, AmbiguousPolicy::RetryOnce);
        assert_eq!(c.model_or_default(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_clamps_values() {
        let c = GradingConfig::builder()
            .dpi(10)
            .jpeg_quality(0)
            .concurrency(0)
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 72);
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn builder_rejects_zero_tokens() {
        let err = GradingConfig::builder().max_tokens(0).build().unwrap_err();
        assert!(matches!(err, GradeError::InvalidConfig(_)));
    }

    #[test]
    fn debug_hides_provider() {
        let c = GradingConfig::builder().model("gpt-4.1").build().unwrap();
        let s = format!("{c:?}");
        assert!(s.contains("gpt-4.1"));
        assert!(s.contains("GradingConfig"));
    }

    #[test]
    fn mime_types() {
        assert_eq!(ImageFormat::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
    }
}
