//! Progress-callback trait for extraction and conversation events.
//!
//! Inject an [`Arc<dyn GenerationProgressCallback>`] via
//! [`crate::config::GenerationConfigBuilder::progress_callback`] to receive
//! events as the pipeline reads pages and drives the conversation.
//!
//! # Example
//!
//! ```rust
//! use pdf2script::{GenerationConfig, GenerationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct TurnCounter {
//!     turns: AtomicUsize,
//! }
//!
//! impl GenerationProgressCallback for TurnCounter {
//!     fn on_turn_complete(&self, chunk: usize, total: usize, produced_len: usize) {
//!         self.turns.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("chunk {chunk}/{total} done ({produced_len} chars)");
//!     }
//! }
//!
//! let counter = Arc::new(TurnCounter { turns: AtomicUsize::new(0) });
//!
//! let config = GenerationConfig::builder()
//!     .progress_callback(counter as Arc<dyn GenerationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ExtractionMethod;
use std::sync::Arc;

/// Called by the pipeline as it extracts pages and drives the conversation.
///
/// All methods have default no-op implementations.
///
/// # Thread safety
///
/// Page events may arrive concurrently from different tasks and out of page
/// order. Turn events are always sequential.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once before any document is opened.
    fn on_extraction_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called after each page has been read.
    ///
    /// # Arguments
    /// * `document`: document identifier
    /// * `page_num`: 1-indexed page number
    /// * `method`: how the text was obtained
    fn on_page_extracted(&self, document: &str, page_num: usize, method: ExtractionMethod) {
        let _ = (document, page_num, method);
    }

    /// Called once every document has been read.
    fn on_extraction_complete(&self, total_pages: usize, total_chars: usize) {
        let _ = (total_pages, total_chars);
    }

    /// Called once the extracted text has been split.
    fn on_chunking_complete(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before a chunk is sent to the backend (1-indexed).
    fn on_turn_start(&self, chunk: usize, total_chunks: usize) {
        let _ = (chunk, total_chunks);
    }

    /// Called when the backend answered a chunk turn. `produced_len` counts
    /// characters of the cleaned reply.
    fn on_turn_complete(&self, chunk: usize, total_chunks: usize, produced_len: usize) {
        let _ = (chunk, total_chunks, produced_len);
    }

    /// Called when a chunk turn failed after all retries.
    fn on_turn_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Called before the synthesis turn is sent.
    fn on_synthesis_start(&self) {}

    /// Called once the result has been stored; `script_len` is in characters.
    fn on_generation_complete(&self, result_id: &str, script_len: usize) {
        let _ = (result_id, script_len);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::GenerationConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;
