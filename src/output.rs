//! Result and statistics types returned by the pipeline.

use crate::config::GenerationOptions;
use crate::error::ExtractionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finished script. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Opaque identifier used for later lookup.
    pub id: Uuid,
    /// Cleaned, synthesised script.
    pub script: String,
    /// Identifiers of the source documents, in caller order.
    pub sources: Vec<String>,
    /// Options the script was generated with.
    pub options: GenerationOptions,
    pub created_at: DateTime<Utc>,
    pub stats: GenerationStats,
}

impl GenerationResult {
    /// Stamp a new result with a fresh id and the current time.
    pub fn new(
        script: String,
        sources: Vec<String>,
        options: GenerationOptions,
        stats: GenerationStats,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            script,
            sources,
            options,
            created_at: Utc::now(),
            stats,
        }
    }
}

/// How one page's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// The PDF text layer had non-blank text.
    MachineText,
    /// The page was rasterised and recognised.
    Ocr,
    /// Nothing usable came back; the page contributes empty text.
    Failed,
}

/// Per-page extraction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 0-indexed page number.
    pub index: usize,
    pub method: ExtractionMethod,
    /// Length of the contributed text in characters.
    pub chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExtractionError>,
}

/// Aggregate counters for one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub documents: usize,
    pub pages: usize,
    pub ocr_pages: usize,
    pub failed_pages: usize,
    pub extracted_chars: usize,
    pub chunks: usize,
    pub feed_turns: usize,
    /// Chunk turns replaced by the placeholder segment.
    pub placeholder_turns: usize,
    /// Backend attempts beyond the first, summed over all turns.
    pub retries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub extraction_duration_ms: u64,
    pub conversation_duration_ms: u64,
    pub total_duration_ms: u64,
}
