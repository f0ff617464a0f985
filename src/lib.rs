//! # pdf2script
//!
//! Turn one or more PDF documents into a spoken-word script using an LLM.
//!
//! Long documents do not fit in one request, so the text is split into
//! overlapping chunks and fed to the model over a multi-turn conversation.
//! A pinned instruction turn is sent with every request alongside a sliding
//! window of recent turns; once every chunk has been fed, a final synthesis
//! turn asks for the complete script. The output is cleaned of formatting
//! artefacts so it can go straight to text-to-speech.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF(s)
//!  │
//!  ├─ 1. Input     resolve local files, URLs or byte buffers
//!  ├─ 2. Extract   machine text per page, OCR fallback, page order kept
//!  ├─ 3. Chunk     overlapping, paragraph/sentence-aligned chunks
//!  ├─ 4. Converse  pinned instruction + sliding window, retry with backoff
//!  ├─ 5. Clean     rule table run to a fixed point
//!  └─ 6. Store     GenerationResult retrievable by id
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2script::{ContentStyle, GenerationConfig, ScriptPipeline, TargetDuration};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = GenerationConfig::builder()
//!         .content_style(ContentStyle::Casual)
//!         .duration(TargetDuration::Small)
//!         .build()?;
//!     let pipeline = ScriptPipeline::from_config(config)?;
//!     let result = pipeline.generate(&["paper.pdf"]).await?;
//!     println!("{}", result.script);
//!
//!     // Later, by id:
//!     let again = pipeline.get(&result.id)?;
//!     assert_eq!(again.script, result.script);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2script` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{resolve_provider, Generation, GenerationBackend, LlmBackend, SamplingOptions};
pub use cache::{InMemoryResultStore, ResultStore};
pub use config::{
    ContentStyle, GenerationConfig, GenerationConfigBuilder, GenerationOptions, OcrEngine,
    TargetDuration,
};
pub use error::{BackendError, ErrorCategory, ExtractionError, ScriptError};
pub use generate::{write_atomic, ScriptPipeline};
pub use output::{ExtractionMethod, GenerationResult, GenerationStats, PageOutcome};
pub use pipeline::chunk::{Boundary, Chunk, Chunker, SizeMetric};
pub use pipeline::clean::ResponseCleaner;
pub use pipeline::conversation::{
    AbortSignal, ConversationDriver, DriverState, FeedFailurePolicy, RetryPolicy, Role, Sleeper,
    SynthesisContext, Turn,
};
pub use pipeline::extract::{DocumentExtractor, ExtractedDocument, PageExtractor};
pub use pipeline::ocr::{TesseractRecognizer, TextRecognizer, VisionRecognizer};
pub use pipeline::source::{PageSource, PdfiumDocument};
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
