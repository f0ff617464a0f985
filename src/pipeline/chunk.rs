//! Split extracted text into overlapping, boundary-aware chunks.
//!
//! Each chunk is at most `max_size` long under the configured [`SizeMetric`].
//! When a cut would land mid-text, the chunker looks backward for the nearest
//! paragraph break or sentence end, but only accepts one that lies past the
//! overlap region so every iteration makes forward progress. Offsets are in
//! Unicode scalar values, so a cut never splits a UTF-8 sequence.
//!
//! With [`SizeMetric::Tokens`] sizes are counted with the `cl100k_base` BPE;
//! the longest slice that fits a token budget is found by galloping and then
//! bisecting over character offsets.

use crate::error::ScriptError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::debug;

static CL100K: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| tiktoken_rs::cl100k_base().map_err(|e| e.to_string()));

/// Unit in which chunk size and overlap are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMetric {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// `cl100k_base` tokens.
    Tokens,
}

impl SizeMetric {
    /// Size of `text` in this unit.
    pub fn measure(self, text: &str) -> usize {
        match self {
            SizeMetric::Chars => text.chars().count(),
            SizeMetric::Tokens => count_tokens(text),
        }
    }

    fn measure_chars(self, chars: &[char]) -> usize {
        match self {
            SizeMetric::Chars => chars.len(),
            SizeMetric::Tokens => count_tokens(&chars.iter().collect::<String>()),
        }
    }
}

/// Number of `cl100k_base` tokens in `text`.
///
/// Falls back to the character count if the tokenizer failed to load;
/// [`Chunker::new`] refuses [`SizeMetric::Tokens`] in that case.
pub fn count_tokens(text: &str) -> usize {
    match &*CL100K {
        Ok(bpe) => bpe.encode_with_special_tokens(text).len(),
        Err(_) => text.chars().count(),
    }
}

/// Why a chunk ends where it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Right after a blank line.
    Paragraph,
    /// Right after `.`, `!` or `?` followed by whitespace.
    Sentence,
    /// No acceptable boundary; cut at the size limit.
    Forced,
    /// The chunk reaches the end of the text.
    EndOfText,
}

/// One contiguous slice of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the emitted sequence.
    pub index: usize,
    /// Start offset in characters, inclusive.
    pub start: usize,
    /// End offset in characters, exclusive.
    pub end: usize,
    pub boundary: Boundary,
    pub text: String,
}

/// Boundary-preferring chunker with overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
    metric: SizeMetric,
}

impl Chunker {
    /// Validate the parameters: `max_size ≥ 1` and `overlap < max_size`.
    pub fn new(max_size: usize, overlap: usize, metric: SizeMetric) -> Result<Self, ScriptError> {
        if max_size == 0 {
            return Err(ScriptError::InvalidConfig("Chunk size must be ≥ 1".into()));
        }
        if overlap >= max_size {
            return Err(ScriptError::InvalidConfig(format!(
                "Chunk overlap ({overlap}) must be smaller than chunk size ({max_size})"
            )));
        }
        if metric == SizeMetric::Tokens {
            if let Err(e) = &*CL100K {
                return Err(ScriptError::InvalidConfig(format!(
                    "cl100k_base tokenizer unavailable: {e}"
                )));
            }
        }
        Ok(Self {
            max_size,
            overlap,
            metric,
        })
    }

    /// Character-measured chunker.
    pub fn chars(max_size: usize, overlap: usize) -> Result<Self, ScriptError> {
        Self::new(max_size, overlap, SizeMetric::Chars)
    }

    /// Split `text` into chunks. Whitespace-only chunks are dropped.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < len {
            let limit = self.fit_after(&chars, start, self.max_size).max(start + 1);
            let (end, boundary) = if limit == len {
                (len, Boundary::EndOfText)
            } else {
                let floor = self.fit_after(&chars, start, self.overlap);
                find_boundary(&chars, floor, limit).unwrap_or((limit, Boundary::Forced))
            };

            let slice: String = chars[start..end].iter().collect();
            if !slice.trim().is_empty() {
                chunks.push(Chunk {
                    index: chunks.len(),
                    start,
                    end,
                    boundary,
                    text: slice,
                });
            }

            if end == len {
                break;
            }

            let next = self.fit_before(&chars, end, self.overlap).max(start + 1);
            debug_assert!(next > start, "chunker failed to advance at {start}");
            start = next;
        }

        debug!("Chunked {} chars into {} chunks ({:?})", len, chunks.len(), self.metric);
        chunks
    }

    /// End of the longest slice starting at `start` that fits in `budget`.
    fn fit_after(&self, chars: &[char], start: usize, budget: usize) -> usize {
        let remaining = chars.len() - start;
        match self.metric {
            SizeMetric::Chars => start + budget.min(remaining),
            SizeMetric::Tokens => {
                start
                    + longest_within(remaining, budget, |n| {
                        self.metric.measure_chars(&chars[start..start + n])
                    })
            }
        }
    }

    /// Start of the longest slice ending at `end` that fits in `budget`.
    fn fit_before(&self, chars: &[char], end: usize, budget: usize) -> usize {
        match self.metric {
            SizeMetric::Chars => end.saturating_sub(budget),
            SizeMetric::Tokens => {
                end - longest_within(end, budget, |n| {
                    self.metric.measure_chars(&chars[end - n..end])
                })
            }
        }
    }
}

/// Largest `n <= max_n` with `size(n) <= budget`, for `size` growing with `n`.
fn longest_within(max_n: usize, budget: usize, size: impl Fn(usize) -> usize) -> usize {
    if max_n == 0 || budget == 0 {
        return 0;
    }
    // Gallop from `budget` characters to bracket the answer, then bisect.
    let mut lo = 0;
    let mut hi = budget.min(max_n);
    while size(hi) <= budget {
        if hi == max_n {
            return max_n;
        }
        lo = hi;
        hi = hi.saturating_mul(2).min(max_n);
    }
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if size(mid) <= budget {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Search backward from `limit` for a cut position strictly after `floor`.
///
/// Returns the exclusive end of the chunk: just past a `\n\n` pair, or just
/// past a sentence terminator whose next character is whitespace.
fn find_boundary(chars: &[char], floor: usize, limit: usize) -> Option<(usize, Boundary)> {
    let mut pos = limit;
    while pos > floor {
        if pos >= 2 && chars[pos - 1] == '\n' && chars[pos - 2] == '\n' {
            return Some((pos, Boundary::Paragraph));
        }
        if matches!(chars[pos - 1], '.' | '!' | '?')
            && chars.get(pos).is_some_and(|c| c.is_whitespace())
        {
            return Some((pos, Boundary::Sentence));
        }
        pos -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    /// Rebuild the source by dropping each chunk's overlap with its predecessor.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for chunk in chunks {
            let skip = covered - chunk.start;
            out.extend(chunk.text.chars().skip(skip));
            covered = chunk.end;
        }
        out
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(Chunker::chars(10, 10).is_err());
        assert!(Chunker::chars(0, 0).is_err());
        assert!(Chunker::chars(10, 9).is_ok());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(Chunker::chars(10, 2).unwrap().chunk("").is_empty());
        assert!(Chunker::chars(10, 2).unwrap().chunk("   \n\n  ").is_empty());
    }

    #[test]
    fn short_text_is_single_chunk() {
        let chunks = Chunker::chars(100, 10).unwrap().chunk("Hello world.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].boundary, Boundary::EndOfText);
        assert_eq!(chunks[0].text, "Hello world.");
    }

    #[test]
    fn starts_strictly_increase_and_last_reaches_end() {
        let text = "Alpha beta gamma. Delta epsilon zeta! Eta theta iota? Kappa lambda mu.\n\n"
            .repeat(20);
        let chunks = Chunker::chars(120, 30).unwrap().chunk(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].start <= pair[0].end, "gap between chunks");
        }
        assert_eq!(chunks.last().unwrap().end, char_len(&text));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(char_len(&chunk.text) <= 120);
        }
    }

    #[test]
    fn reconstruction_with_overlap_removed_matches_source() {
        let text = "First sentence here. Second one follows! Does a third?\n\nNew paragraph starts. "
            .repeat(15);
        let chunks = Chunker::chars(90, 20).unwrap().chunk(&text);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let text = "One two three. Four five six seven eight nine ten eleven twelve.";
        let chunks = Chunker::chars(30, 5).unwrap().chunk(text);
        assert_eq!(chunks[0].boundary, Boundary::Sentence);
        assert!(chunks[0].text.ends_with("three."));
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = "aaaa aaaa aaaa\n\nbbbb bbbb bbbb bbbb bbbb";
        let chunks = Chunker::chars(24, 4).unwrap().chunk(text);
        assert_eq!(chunks[0].boundary, Boundary::Paragraph);
        assert_eq!(chunks[0].text, "aaaa aaaa aaaa\n\n");
    }

    #[test]
    fn boundary_inside_overlap_is_ignored() {
        // The only sentence end sits within the overlap region, so the cut is forced.
        let text = format!("Hi. {}", "x".repeat(60));
        let chunks = Chunker::chars(20, 10).unwrap().chunk(&text);
        assert_eq!(chunks[0].boundary, Boundary::Forced);
        assert_eq!(chunks[0].end, 20);
    }

    #[test]
    fn boundary_free_text_terminates_within_bound() {
        let max = 50;
        let overlap = 10;
        let text = "x".repeat(max * 10);
        let chunks = Chunker::chars(max, overlap).unwrap().chunk(&text);
        let bound = (text.len() + (max - overlap) - 1) / (max - overlap) + 1;
        assert!(chunks.len() <= bound, "{} > {}", chunks.len(), bound);
        assert_eq!(chunks.last().unwrap().end, text.len());
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn multibyte_text_is_never_split_mid_character() {
        let text = "Ünïcödé façade naïve résumé ✓ 日本語のテキスト。".repeat(10);
        let chunks = Chunker::chars(37, 7).unwrap().chunk(&text);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn token_metric_bounds_every_chunk() {
        let text = "The encoder maps tokens to vectors. Attention mixes them! Why? \
                    Because context matters.\n\n"
            .repeat(30);
        let chunks = Chunker::new(40, 8, SizeMetric::Tokens).unwrap().chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(count_tokens(&chunk.text) <= 40, "{} tokens", count_tokens(&chunk.text));
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start > pair[0].start);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn token_metric_holds_for_cjk_text() {
        // CJK text runs at roughly one token per character, far from 4 chars per token.
        let text = "日本語のテキストを分割します。".repeat(300);
        let chunks = Chunker::new(100, 10, SizeMetric::Tokens).unwrap().chunk(&text);
        for chunk in &chunks {
            assert!(count_tokens(&chunk.text) <= 100);
        }
        assert!(chunks.len() > char_len(&text) / 400);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn longest_within_finds_the_boundary() {
        assert_eq!(longest_within(100, 7, |n| n), 7);
        assert_eq!(longest_within(5, 7, |n| n), 5);
        assert_eq!(longest_within(100, 10, |n| n * 3), 3);
        assert_eq!(longest_within(100, 0, |n| n), 0);
        assert_eq!(longest_within(100, 10, |n| (n + 1) / 2), 20);
    }

    #[test]
    fn whitespace_only_chunks_are_dropped_and_indices_stay_contiguous() {
        let text = format!("{}{}{}", "a".repeat(10), " ".repeat(40), "b".repeat(10));
        let chunks = Chunker::chars(12, 2).unwrap().chunk(&text);
        assert!(chunks.iter().all(|c| !c.text.trim().is_empty()));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }
}
