//! Pipeline stages for document-to-script generation.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ extract ──▶ chunk ──▶ conversation ──▶ clean
//! (path/URL)  (pdfium)  (text/OCR)  (overlap)  (window+retry)   (rules)
//! ```
//!
//! 1. [`input`]: resolve paths, URLs and byte buffers to local files
//! 2. [`source`]: per-page machine text and rasterisation via pdfium,
//!    on the blocking pool
//! 3. [`extract`]: OCR fallback per page, bounded concurrency per document,
//!    output re-assembled in page order; [`ocr`] and [`encode`] serve it
//! 4. [`chunk`]: boundary-preferring chunks with overlap
//! 5. [`conversation`]: pinned instruction, sliding window, retry with
//!    backoff, then the synthesis turn
//! 6. [`clean`]: rule table that strips formatting from produced text

pub mod chunk;
pub mod clean;
pub mod conversation;
pub mod encode;
pub mod extract;
pub mod input;
pub mod ocr;
pub mod source;
