//! Document-to-script entry points.
//!
//! [`ScriptPipeline`] wires extraction, chunking, the conversation driver and
//! the result store together. Collaborators are injected, so tests swap in
//! in-memory page sources, recognizers and backends; [`ScriptPipeline::from_config`]
//! builds the production set from a [`GenerationConfig`].

use crate::backend::{resolve_provider, GenerationBackend, LlmBackend};
use crate::cache::{InMemoryResultStore, ResultStore};
use crate::config::GenerationConfig;
use crate::error::ScriptError;
use crate::output::{GenerationResult, GenerationStats};
use crate::pipeline::chunk::Chunker;
use crate::pipeline::conversation::{AbortSignal, ConversationDriver, Sleeper, TokioSleeper};
use crate::pipeline::extract::{concatenate, DocumentExtractor, PageExtractor};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::ocr::{recognizer_for, TextRecognizer};
use crate::pipeline::source::{PageSource, PdfiumDocument};
use crate::prompts::instruction_prompt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// The full pipeline with its collaborators.
pub struct ScriptPipeline {
    config: GenerationConfig,
    backend: Arc<dyn GenerationBackend>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    store: Arc<dyn ResultStore>,
    sleeper: Arc<dyn Sleeper>,
}

impl ScriptPipeline {
    /// Pipeline over `backend` with OCR disabled and an in-memory store.
    pub fn new(config: GenerationConfig, backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            config,
            backend,
            recognizer: None,
            store: Arc::new(InMemoryResultStore::new()),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Resolve the LLM provider and OCR engine from `config`.
    pub fn from_config(config: GenerationConfig) -> Result<Self, ScriptError> {
        let provider = resolve_provider(&config)?;
        info!("Using provider {} ({})", provider.name(), provider.model());
        let recognizer = recognizer_for(&config.ocr, Some(&provider));
        let backend: Arc<dyn GenerationBackend> = Arc::new(LlmBackend::new(provider));
        Ok(Self::new(config, backend).with_recognizer(recognizer))
    }

    pub fn with_recognizer(mut self, recognizer: Option<Arc<dyn TextRecognizer>>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Look up a stored result.
    pub fn get(&self, id: &Uuid) -> Result<Arc<GenerationResult>, ScriptError> {
        self.store.get(id)
    }

    /// Extract, chunk, converse, clean and store.
    ///
    /// # Errors
    /// * [`ScriptError::NoTextExtracted`] when every page came back empty.
    /// * [`ScriptError::FeedingFailed`] / [`ScriptError::SynthesisFailed`]
    ///   when the backend gives up.
    /// * [`ScriptError::Cancelled`] when `abort` is raised between turns.
    pub async fn run(
        &self,
        sources: &[Arc<dyn PageSource>],
        abort: Option<AbortSignal>,
    ) -> Result<Arc<GenerationResult>, ScriptError> {
        let total_start = Instant::now();
        let config = &self.config;
        let progress = config.progress_callback.clone();

        if sources.is_empty() {
            return Err(ScriptError::InvalidInput {
                input: "no documents".to_string(),
            });
        }

        // ── Step 1: Extract text ─────────────────────────────────────────
        if let Some(ref cb) = progress {
            cb.on_extraction_start(sources.len());
        }
        let extract_start = Instant::now();
        let pages = PageExtractor::new(
            self.recognizer.clone(),
            Duration::from_secs(config.ocr_timeout_secs),
        );
        let extracted = DocumentExtractor::new(pages, config.extraction_concurrency)
            .with_progress(progress.clone())
            .extract_all(sources)
            .await;
        let text = concatenate(&extracted);
        let extraction_duration_ms = extract_start.elapsed().as_millis() as u64;

        let mut stats = GenerationStats {
            documents: extracted.len(),
            pages: extracted.iter().map(|d| d.pages.len()).sum(),
            ocr_pages: extracted.iter().map(|d| d.ocr_pages()).sum(),
            failed_pages: extracted.iter().map(|d| d.failed_pages()).sum(),
            extracted_chars: text.chars().count(),
            extraction_duration_ms,
            ..Default::default()
        };
        let sources_ids: Vec<String> = extracted.iter().map(|d| d.id.clone()).collect();

        info!(
            "Extracted {} chars from {} pages ({} OCR, {} failed) in {}ms",
            stats.extracted_chars, stats.pages, stats.ocr_pages, stats.failed_pages,
            extraction_duration_ms
        );
        if let Some(ref cb) = progress {
            cb.on_extraction_complete(stats.pages, stats.extracted_chars);
        }

        if text.trim().is_empty() {
            return Err(ScriptError::NoTextExtracted {
                documents: sources_ids,
            });
        }

        // ── Step 2: Chunk ────────────────────────────────────────────────
        let chunks = Chunker::new(config.chunk_size, config.chunk_overlap, config.size_metric)?
            .chunk(&text);
        stats.chunks = chunks.len();
        debug!("{} chunks of ≤{} ({:?})", chunks.len(), config.chunk_size, config.size_metric);
        if let Some(ref cb) = progress {
            cb.on_chunking_complete(chunks.len());
        }

        // ── Step 3: Converse ─────────────────────────────────────────────
        let instruction = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| instruction_prompt(&config.options));

        let mut driver = ConversationDriver::from_config(Arc::clone(&self.backend), config)
            .with_sleeper(Arc::clone(&self.sleeper));
        if let Some(signal) = abort {
            driver = driver.with_abort_signal(signal);
        }

        let conversation_start = Instant::now();
        let outcome = driver.run(&instruction, &chunks).await?;

        stats.feed_turns = chunks.len();
        stats.placeholder_turns = outcome.placeholder_turns();
        stats.retries = outcome.retries();
        stats.input_tokens = outcome.input_tokens;
        stats.output_tokens = outcome.output_tokens;
        stats.conversation_duration_ms = conversation_start.elapsed().as_millis() as u64;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        // ── Step 4: Store ────────────────────────────────────────────────
        let result = Arc::new(GenerationResult::new(
            outcome.script,
            sources_ids,
            config.options,
            stats,
        ));
        let id = self.store.put(Arc::clone(&result));

        let script_chars = result.script.chars().count();
        info!(
            "Generated script {} ({} chars, {} turns, {} placeholders) in {}ms",
            id,
            script_chars,
            result.stats.feed_turns + 1,
            result.stats.placeholder_turns,
            result.stats.total_duration_ms
        );
        if let Some(ref cb) = progress {
            cb.on_generation_complete(&id.to_string(), script_chars);
        }

        Ok(result)
    }

    /// Generate a script from local PDF paths or HTTP(S) URLs.
    pub async fn generate<S: AsRef<str>>(
        &self,
        inputs: &[S],
    ) -> Result<Arc<GenerationResult>, ScriptError> {
        let mut resolved = Vec::with_capacity(inputs.len());
        for input in inputs {
            resolved.push(input::resolve_input(input.as_ref(), self.config.download_timeout_secs).await?);
        }
        self.run_resolved(&resolved).await
    }

    /// Generate a script from in-memory PDFs given as `(name, bytes)` pairs.
    pub async fn generate_from_bytes(
        &self,
        documents: &[(String, Vec<u8>)],
    ) -> Result<Arc<GenerationResult>, ScriptError> {
        let resolved = documents
            .iter()
            .map(|(name, bytes)| input::from_bytes(name, bytes))
            .collect::<Result<Vec<_>, _>>()?;
        self.run_resolved(&resolved).await
    }

    /// Generate a script and write it to `output_path`.
    ///
    /// The text goes to a sibling temp file first and is renamed into place,
    /// so readers never see a partial script.
    pub async fn generate_to_file<S: AsRef<str>>(
        &self,
        inputs: &[S],
        output_path: impl AsRef<Path>,
    ) -> Result<Arc<GenerationResult>, ScriptError> {
        let result = self.generate(inputs).await?;
        write_atomic(output_path.as_ref(), &result.script).await?;
        Ok(result)
    }

    async fn run_resolved(
        &self,
        resolved: &[ResolvedInput],
    ) -> Result<Arc<GenerationResult>, ScriptError> {
        let mut sources: Vec<Arc<dyn PageSource>> = Vec::with_capacity(resolved.len());
        for input in resolved {
            let doc = PdfiumDocument::open(
                input.id(),
                input.path(),
                self.config.password.clone(),
                self.config.max_rendered_pixels,
            )
            .await?;
            sources.push(Arc::new(doc));
        }
        // `resolved` owns any temp files and outlives the run.
        self.run(&sources, None).await
    }
}

/// Write `contents` to `path` via a temp file and rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), ScriptError> {
    let write_err = |source| ScriptError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/out/script.txt");
        write_atomic(&path, "hello").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(!dir.path().join("nested/out/script.txt.tmp").exists());
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("script.txt");
        std::fs::write(&path, "old").unwrap();
        write_atomic(&path, "new").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }
}
