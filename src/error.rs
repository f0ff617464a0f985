//! Error types for the pdf2script library.
//!
//! Three error types map onto three failure modes:
//!
//! * [`ScriptError`] is fatal: the generation cannot proceed (bad input
//!   file, provider not configured, synthesis failed). Returned as
//!   `Err(ScriptError)` from the pipeline entry points.
//!
//! * [`ExtractionError`] is non-fatal: one page could not be read. It is
//!   recorded in the page outcome and the page contributes empty text; sibling
//!   pages are never affected.
//!
//! * [`BackendError`] is the outcome of a single call to the generation
//!   backend, classified as transient (retried with backoff) or permanent
//!   (surfaced immediately).
//!
//! [`ScriptError::category`] groups fatal errors so callers can tell
//! extraction problems from backend problems from configuration problems.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`ScriptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Input,
    Extraction,
    Backend,
    Configuration,
    Lookup,
    Cancelled,
    Internal,
}

/// All fatal errors returned by the pdf2script library.
#[derive(Debug, Error)]
pub enum ScriptError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Every page of every document came back empty.
    #[error("No text could be extracted from {documents:?}\nThe documents may be image-only with OCR disabled, or unreadable.")]
    NoTextExtracted { documents: Vec<String> },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── Backend errors ────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A context-building turn failed after all retries and the failure
    /// policy is to abort.
    #[error("Chunk {chunk}/{total} failed after {attempts} attempt(s): {source}")]
    FeedingFailed {
        chunk: usize,
        total: usize,
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// The final synthesis turn failed after all retries.
    #[error("Synthesis failed after {attempts} attempt(s): {source}")]
    SynthesisFailed {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    /// The synthesis succeeded but nothing was left after cleaning.
    #[error("Backend produced an empty script")]
    EmptyScript,

    // ── Control flow ──────────────────────────────────────────────────────
    /// The caller aborted the generation between two turns.
    #[error("Generation cancelled after {completed_turns} turn(s)")]
    Cancelled { completed_turns: usize },

    /// No result is stored under the requested id.
    #[error("Result not found: {id}")]
    ResultNotFound { id: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output script file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScriptError {
    /// Which part of the system this error came from.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScriptError::FileNotFound { .. }
            | ScriptError::PermissionDenied { .. }
            | ScriptError::InvalidInput { .. }
            | ScriptError::DownloadFailed { .. }
            | ScriptError::DownloadTimeout { .. }
            | ScriptError::NotAPdf { .. }
            | ScriptError::OutputWriteFailed { .. } => ErrorCategory::Input,
            ScriptError::NoTextExtracted { .. } | ScriptError::PdfiumBindingFailed(_) => {
                ErrorCategory::Extraction
            }
            ScriptError::ProviderNotConfigured { .. }
            | ScriptError::FeedingFailed { .. }
            | ScriptError::SynthesisFailed { .. }
            | ScriptError::EmptyScript => ErrorCategory::Backend,
            ScriptError::InvalidConfig(_) => ErrorCategory::Configuration,
            ScriptError::ResultNotFound { .. } => ErrorCategory::Lookup,
            ScriptError::Cancelled { .. } => ErrorCategory::Cancelled,
            ScriptError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// A non-fatal failure while reading one page (or opening one document).
///
/// Stored in [`crate::output::PageOutcome`]; the page contributes empty text.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The document could not be opened or its pages counted.
    #[error("Document '{document}' could not be opened: {detail}")]
    Open { document: String, detail: String },

    /// Machine text extraction failed.
    #[error("Page {page}: text extraction failed: {detail}")]
    MachineText { page: usize, detail: String },

    /// The page could not be rasterised for OCR.
    #[error("Page {page}: rasterisation failed: {detail}")]
    Rasterize { page: usize, detail: String },

    /// The recognizer failed on the rasterised page.
    #[error("Page {page}: OCR failed: {detail}")]
    Recognize { page: usize, detail: String },

    /// The recognizer did not answer within the OCR timeout.
    #[error("Page {page}: OCR timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// Outcome of one failed call to the generation backend.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    /// The call did not complete within the API timeout.
    #[error("backend call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// HTTP 429 or provider-specific quota exhaustion.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// 5xx, connection reset, DNS failure, model still loading.
    #[error("backend unavailable: {detail}")]
    Unavailable { detail: String },

    /// 4xx other than 429: bad key, bad request, content filter.
    #[error("request rejected: {detail}")]
    Rejected { detail: String },

    /// The backend answered but the answer is unusable.
    #[error("malformed response: {detail}")]
    MalformedResponse { detail: String },
}

impl BackendError {
    /// Transient errors are retried with backoff; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout { .. }
                | BackendError::RateLimited { .. }
                | BackendError::Unavailable { .. }
        )
    }
}
