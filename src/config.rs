//! Configuration types for document-to-script generation.
//!
//! All generation behaviour is controlled through [`GenerationConfig`], built
//! via its [`GenerationConfigBuilder`]. The caller-facing knobs (content style
//! and target duration) live in [`GenerationOptions`]; everything else tunes
//! extraction, chunking, the conversation window and the retry policy.

use crate::error::ScriptError;
use crate::pipeline::chunk::{Chunker, SizeMetric};
use crate::pipeline::conversation::{FeedFailurePolicy, SynthesisContext};
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for a document-to-script generation.
///
/// Built via [`GenerationConfig::builder()`] or using
/// [`GenerationConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2script::{ContentStyle, GenerationConfig, TargetDuration};
///
/// let config = GenerationConfig::builder()
///     .content_style(ContentStyle::Elaborate)
///     .duration(TargetDuration::Lengthy)
///     .chunk_size(3000)
///     .chunk_overlap(300)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// Style and length of the script. Default: concise / moderate.
    pub options: GenerationOptions,

    /// Nucleus-sampling parameter sent with every turn. Default: 0.88.
    pub top_p: f32,

    /// Maximum chunk size, measured with `size_metric`. Default: 2500.
    pub chunk_size: usize,

    /// Trailing content repeated at the start of the next chunk. Must be
    /// smaller than `chunk_size`. Default: 300.
    pub chunk_overlap: usize,

    /// Unit of `chunk_size` and `chunk_overlap`. Default: characters.
    pub size_metric: SizeMetric,

    /// Completed turns kept in the live window besides the pinned
    /// instruction. Default: 2 (one supplied/produced pair).
    pub window_turns: usize,

    /// Context sent with the synthesis turn. Default: [`SynthesisContext::Window`].
    pub synthesis_context: SynthesisContext,

    /// What happens when a context-building turn exhausts its retries.
    /// Default: [`FeedFailurePolicy::Abort`].
    pub feed_failure: FeedFailurePolicy,

    /// Attempts per backend call, including the first. Default: 3.
    pub max_attempts: u32,

    /// Backoff base in milliseconds. After failed attempt `a` (1-based) the
    /// driver waits `retry_backoff_ms * 2^a`. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-backend-call timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Per-page OCR timeout in seconds. Default: 120.
    pub ocr_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Pages extracted concurrently within one document. Default: 4.
    pub extraction_concurrency: usize,

    /// OCR fallback used for pages without machine text. Default: vision model.
    pub ocr: OcrEngine,

    /// Longest edge, in pixels, of a page rasterised for OCR. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Custom pinned instruction. If None, built from `options`.
    pub system_prompt: Option<String>,

    /// Remove stage-direction markers such as "(short pause)". Default: true.
    pub strip_stage_directions: bool,

    /// Receives extraction and conversation events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            options: GenerationOptions::default(),
            top_p: 0.88,
            chunk_size: 2500,
            chunk_overlap: 300,
            size_metric: SizeMetric::default(),
            window_turns: 2,
            synthesis_context: SynthesisContext::default(),
            feed_failure: FeedFailurePolicy::default(),
            max_attempts: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 90,
            ocr_timeout_secs: 120,
            download_timeout_secs: 120,
            extraction_concurrency: 4,
            ocr: OcrEngine::default(),
            max_rendered_pixels: 2000,
            password: None,
            model: None,
            provider_name: None,
            provider: None,
            system_prompt: None,
            strip_stage_directions: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("options", &self.options)
            .field("top_p", &self.top_p)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("size_metric", &self.size_metric)
            .field("window_turns", &self.window_turns)
            .field("synthesis_context", &self.synthesis_context)
            .field("feed_failure", &self.feed_failure)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("extraction_concurrency", &self.extraction_concurrency)
            .field("ocr", &self.ocr)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("strip_stage_directions", &self.strip_stage_directions)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn GenerationProgressCallback>"),
            )
            .finish()
    }
}

impl GenerationConfig {
    /// Create a new builder for `GenerationConfig`.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }

    /// Sampling parameters derived from the target duration and `top_p`.
    pub fn sampling(&self) -> crate::backend::SamplingOptions {
        let (temperature, max_tokens) = self.options.duration.sampling();
        crate::backend::SamplingOptions {
            temperature,
            max_tokens,
            top_p: self.top_p,
        }
    }
}

/// Builder for [`GenerationConfig`].
#[derive(Debug)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn content_style(mut self, style: ContentStyle) -> Self {
        self.config.options.content_style = style;
        self
    }

    pub fn duration(mut self, duration: TargetDuration) -> Self {
        self.config.options.duration = duration;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn chunk_size(mut self, n: usize) -> Self {
        self.config.chunk_size = n;
        self
    }

    pub fn chunk_overlap(mut self, n: usize) -> Self {
        self.config.chunk_overlap = n;
        self
    }

    pub fn size_metric(mut self, metric: SizeMetric) -> Self {
        self.config.size_metric = metric;
        self
    }

    pub fn window_turns(mut self, n: usize) -> Self {
        self.config.window_turns = n;
        self
    }

    pub fn synthesis_context(mut self, context: SynthesisContext) -> Self {
        self.config.synthesis_context = context;
        self
    }

    pub fn feed_failure(mut self, policy: FeedFailurePolicy) -> Self {
        self.config.feed_failure = policy;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn extraction_concurrency(mut self, n: usize) -> Self {
        self.config.extraction_concurrency = n.max(1);
        self
    }

    pub fn ocr(mut self, engine: OcrEngine) -> Self {
        self.config.ocr = engine;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
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

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn strip_stage_directions(mut self, v: bool) -> Self {
        self.config.strip_stage_directions = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GenerationConfig, ScriptError> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(ScriptError::InvalidConfig(
                "Chunk size must be ≥ 1".into(),
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(ScriptError::InvalidConfig(format!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        Chunker::new(c.chunk_size, c.chunk_overlap, c.size_metric)?;
        if c.max_attempts == 0 {
            return Err(ScriptError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        if c.extraction_concurrency == 0 {
            return Err(ScriptError::InvalidConfig(
                "Extraction concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Caller-facing options ────────────────────────────────────────────────

/// What the caller asks for: a style and a target length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub content_style: ContentStyle,
    pub duration: TargetDuration,
}

/// Tone and depth of the generated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentStyle {
    #[default]
    Concise,
    Elaborate,
    Balanced,
    Formal,
    Casual,
    Professional,
}

impl ContentStyle {
    pub const ALL: [ContentStyle; 6] = [
        ContentStyle::Concise,
        ContentStyle::Elaborate,
        ContentStyle::Balanced,
        ContentStyle::Formal,
        ContentStyle::Casual,
        ContentStyle::Professional,
    ];

    /// Style instruction placed in the pinned turn.
    pub fn instruction(self) -> &'static str {
        match self {
            ContentStyle::Concise => "Create a concise script focusing on the key findings.",
            ContentStyle::Elaborate => {
                "Provide detailed explanations with concrete examples from the material."
            }
            ContentStyle::Balanced => {
                "Balance the key findings with enough explanation to follow them."
            }
            ContentStyle::Formal => "Use a formal, academic register and precise terminology.",
            ContentStyle::Casual => {
                "Keep it relaxed and conversational, as if talking to a curious friend."
            }
            ContentStyle::Professional => {
                "Keep a polished, professional tone suited to an industry audience."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContentStyle::Concise => "concise",
            ContentStyle::Elaborate => "elaborate",
            ContentStyle::Balanced => "balanced",
            ContentStyle::Formal => "formal",
            ContentStyle::Casual => "casual",
            ContentStyle::Professional => "professional",
        }
    }
}

impl fmt::Display for ContentStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStyle {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ContentStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| ScriptError::InvalidConfig(format!("Unknown content style '{s}'")))
    }
}

/// Target length of the script.
///
/// Each value maps to a fixed (temperature, max output tokens) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetDuration {
    Small,
    #[default]
    Moderate,
    Lengthy,
}

impl TargetDuration {
    pub const ALL: [TargetDuration; 3] = [
        TargetDuration::Small,
        TargetDuration::Moderate,
        TargetDuration::Lengthy,
    ];

    /// `(temperature, max_tokens)` used for every turn.
    pub fn sampling(self) -> (f32, usize) {
        match self {
            TargetDuration::Small => (0.85, 1200),
            TargetDuration::Moderate => (0.78, 1500),
            TargetDuration::Lengthy => (0.70, 2000),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetDuration::Small => "small",
            TargetDuration::Moderate => "moderate",
            TargetDuration::Lengthy => "lengthy",
        }
    }
}

impl fmt::Display for TargetDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetDuration {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TargetDuration::ALL
            .into_iter()
            .find(|d| d.as_str() == wanted)
            .ok_or_else(|| ScriptError::InvalidConfig(format!("Unknown duration '{s}'")))
    }
}

/// Which recognizer reads pages that have no machine text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrEngine {
    /// Send the rasterised page to the configured vision-capable model.
    #[default]
    Vision,
    /// Run the `tesseract` binary found at the given path (or on `PATH`).
    Tesseract { binary: Option<String>, language: Option<String> },
    /// Pages without machine text contribute nothing.
    Disabled,
}
