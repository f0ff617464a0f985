//! Pipeline integration tests with in-process fakes.
//!
//! No PDF library, network or API key is needed: pages come from
//! `FakeDocument`, OCR from `FakeRecognizer`, the model from `FakeBackend`.

use async_trait::async_trait;
use image::DynamicImage;
use pdf2script::pipeline::ocr::RecognitionError;
use pdf2script::{
    AbortSignal, BackendError, ContentStyle, ErrorCategory, ExtractionError, ExtractionMethod,
    FeedFailurePolicy, Generation, GenerationBackend, GenerationConfig,
    GenerationProgressCallback, PageSource, Role, SamplingOptions, ScriptError, ScriptPipeline,
    Sleeper, TargetDuration, TextRecognizer, Turn,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeDocument {
    id: String,
    pages: Vec<String>,
}

impl FakeDocument {
    fn new(id: &str, pages: &[&str]) -> Arc<dyn PageSource> {
        Arc::new(Self {
            id: id.to_string(),
            pages: pages.iter().map(|p| p.to_string()).collect(),
        })
    }
}

#[async_trait]
impl PageSource for FakeDocument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn page_count(&self) -> Result<usize, ExtractionError> {
        Ok(self.pages.len())
    }

    async fn machine_text(&self, index: usize) -> Result<String, ExtractionError> {
        Ok(self.pages[index].clone())
    }

    async fn rasterize(&self, _index: usize) -> Result<DynamicImage, ExtractionError> {
        Ok(DynamicImage::new_rgb8(8, 8))
    }
}

struct FakeRecognizer {
    text: String,
    calls: AtomicUsize,
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn recognize(&self, _image: &DynamicImage) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// Replies from a queue first, then echoes a markdown-laden reply.
#[derive(Default)]
struct FakeBackend {
    replies: Mutex<VecDeque<Result<Generation, BackendError>>>,
    requests: Mutex<Vec<(Vec<Turn>, SamplingOptions)>>,
}

impl FakeBackend {
    fn with_replies(replies: Vec<Result<Generation, BackendError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        })
    }

    fn requests(&self) -> Vec<(Vec<Turn>, SamplingOptions)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(
        &self,
        turns: &[Turn],
        options: &SamplingOptions,
    ) -> Result<Generation, BackendError> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push((turns.to_vec(), *options));
            requests.len()
        };
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(Generation {
                text: format!("## Segment {n}\n\n**Key point** [3] here \\n and more."),
                prompt_tokens: 100,
                completion_tokens: 20,
            })
        })
    }
}

#[derive(Default)]
struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl GenerationProgressCallback for EventLog {
    fn on_page_extracted(&self, document: &str, page_num: usize, method: ExtractionMethod) {
        self.events
            .lock()
            .unwrap()
            .push(format!("page {document}#{page_num} {method:?}"));
    }

    fn on_chunking_complete(&self, total_chunks: usize) {
        self.events.lock().unwrap().push(format!("chunks {total_chunks}"));
    }

    fn on_turn_complete(&self, chunk: usize, total_chunks: usize, _produced_len: usize) {
        self.events.lock().unwrap().push(format!("turn {chunk}/{total_chunks}"));
    }

    fn on_synthesis_start(&self) {
        self.events.lock().unwrap().push("synthesis".into());
    }

    fn on_generation_complete(&self, _result_id: &str, _script_len: usize) {
        self.events.lock().unwrap().push("done".into());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const PAGE_ONE: &str = "Transformers replace recurrence with attention. \
    The model relies entirely on self-attention to draw global dependencies. \
    Training is parallel across positions, which shortens training time. \
    Results on translation benchmarks set a new state of the art.";

const PAGE_TWO_OCR: &str = "Scanned appendix. The ablation shows that multi-head \
    attention outperforms single-head attention. Positional encodings matter. \
    Larger models improve quality further.";

fn small_chunks() -> GenerationConfig {
    GenerationConfig::builder()
        .chunk_size(120)
        .chunk_overlap(20)
        .retry_backoff_ms(10)
        .build()
        .unwrap()
}

fn pipeline(config: GenerationConfig, backend: Arc<FakeBackend>) -> ScriptPipeline {
    ScriptPipeline::new(config, backend).with_sleeper(Arc::new(RecordingSleeper::default()))
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_document_with_ocr_page_produces_stored_script() {
    let backend = FakeBackend::with_replies(vec![]);
    let recognizer = Arc::new(FakeRecognizer {
        text: PAGE_TWO_OCR.to_string(),
        calls: AtomicUsize::new(0),
    });
    let pipeline = pipeline(small_chunks(), backend.clone())
        .with_recognizer(Some(recognizer.clone() as Arc<dyn TextRecognizer>));

    let doc = FakeDocument::new("paper.pdf", &[PAGE_ONE, "   \n  "]);
    let result = pipeline.run(&[doc], None).await.unwrap();

    // Page 2 went through OCR exactly once.
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.stats.pages, 2);
    assert_eq!(result.stats.ocr_pages, 1);
    assert_eq!(result.stats.failed_pages, 0);

    // N chunk turns plus one synthesis turn.
    let n = result.stats.chunks;
    assert!(n >= 3, "expected several chunks, got {n}");
    let requests = backend.requests();
    assert_eq!(requests.len(), n + 1);
    assert_eq!(result.stats.feed_turns, n);

    // The OCR text reached the conversation after page 1's text.
    let fed: String = requests[..n]
        .iter()
        .map(|(turns, _)| turns.last().unwrap().text.clone())
        .collect();
    let p1 = fed.find("Transformers").unwrap();
    let p2 = fed.find("Scanned appendix").unwrap();
    assert!(p1 < p2);

    // Cleaned, non-empty, retrievable by id.
    assert!(!result.script.is_empty());
    assert!(!result.script.contains("**"));
    assert!(!result.script.contains('#'));
    assert!(!result.script.contains("[3]"));
    assert!(!result.script.contains("\\n"));
    assert_eq!(result.sources, vec!["paper.pdf".to_string()]);

    let fetched = pipeline.get(&result.id).unwrap();
    assert_eq!(fetched.script, result.script);
    assert_eq!(fetched.id, result.id);
}

#[tokio::test]
async fn every_request_carries_the_pinned_instruction_and_sampling() {
    let backend = FakeBackend::with_replies(vec![]);
    let config = GenerationConfig::builder()
        .content_style(ContentStyle::Formal)
        .duration(TargetDuration::Small)
        .chunk_size(120)
        .chunk_overlap(20)
        .build()
        .unwrap();
    let pipeline = pipeline(config, backend.clone());

    let doc = FakeDocument::new("a.pdf", &[PAGE_ONE]);
    pipeline.run(&[doc], None).await.unwrap();

    for (turns, options) in backend.requests() {
        assert_eq!(turns[0].role, Role::Instruction);
        assert!(turns[0].text.contains(ContentStyle::Formal.instruction()));
        assert!(turns.len() <= 1 + 2 + 1, "window exceeded: {}", turns.len());
        assert_eq!(options.temperature, 0.85);
        assert_eq!(options.max_tokens, 1200);
        assert_eq!(options.top_p, 0.88);
    }
}

#[tokio::test]
async fn documents_are_combined_in_caller_order() {
    let backend = FakeBackend::with_replies(vec![]);
    let config = GenerationConfig::builder()
        .chunk_size(5000)
        .chunk_overlap(0)
        .build()
        .unwrap();
    let pipeline = pipeline(config, backend.clone());

    let a = FakeDocument::new("a.pdf", &["Alpha document text."]);
    let b = FakeDocument::new("b.pdf", &["Beta document text."]);
    let result = pipeline.run(&[a, b], None).await.unwrap();

    assert_eq!(result.sources, vec!["a.pdf".to_string(), "b.pdf".to_string()]);
    let first = &backend.requests()[0].0;
    let text = &first.last().unwrap().text;
    assert!(text.find("Alpha").unwrap() < text.find("Beta").unwrap());
    assert!(text.contains("Alpha document text.\n\nBeta document text."));
}

// ── Failure handling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_feed_failures_are_retried() {
    let backend = FakeBackend::with_replies(vec![
        Err(BackendError::Unavailable { detail: "503".into() }),
        Err(BackendError::RateLimited { detail: "429".into() }),
    ]);
    let sleeper = Arc::new(RecordingSleeper::default());
    let pipeline = ScriptPipeline::new(small_chunks(), backend.clone()).with_sleeper(sleeper.clone());

    let doc = FakeDocument::new("a.pdf", &[PAGE_ONE]);
    let result = pipeline.run(&[doc], None).await.unwrap();

    assert_eq!(result.stats.retries, 2);
    let slept = sleeper.slept.lock().unwrap().clone();
    assert_eq!(slept, vec![Duration::from_millis(20), Duration::from_millis(40)]);
}

#[tokio::test]
async fn permanent_feed_failure_aborts_with_chunk_number() {
    let backend = FakeBackend::with_replies(vec![
        Ok(Generation::new("first")),
        Err(BackendError::Rejected { detail: "401".into() }),
    ]);
    let pipeline = pipeline(small_chunks(), backend);

    let doc = FakeDocument::new("a.pdf", &[PAGE_ONE]);
    let err = pipeline.run(&[doc], None).await.unwrap_err();
    assert!(matches!(err, ScriptError::FeedingFailed { chunk: 2, .. }));
    assert_eq!(err.category(), ErrorCategory::Backend);
    assert!(pipeline.store().is_empty());
}

#[tokio::test]
async fn placeholder_policy_completes_and_reports_placeholders() {
    let backend = FakeBackend::with_replies(vec![Err(BackendError::Rejected {
        detail: "content filter".into(),
    })]);
    let config = GenerationConfig::builder()
        .chunk_size(120)
        .chunk_overlap(20)
        .feed_failure(FeedFailurePolicy::placeholder())
        .build()
        .unwrap();
    let pipeline = pipeline(config, backend);

    let doc = FakeDocument::new("a.pdf", &[PAGE_ONE]);
    let result = pipeline.run(&[doc], None).await.unwrap();
    assert_eq!(result.stats.placeholder_turns, 1);
    assert!(!result.script.is_empty());
}

#[tokio::test]
async fn empty_extraction_is_an_extraction_error() {
    let backend = FakeBackend::with_replies(vec![]);
    let pipeline = pipeline(small_chunks(), backend.clone());

    // Blank page, OCR disabled.
    let doc = FakeDocument::new("blank.pdf", &["  "]);
    let err = pipeline.run(&[doc], None).await.unwrap_err();
    assert!(matches!(err, ScriptError::NoTextExtracted { .. }));
    assert_eq!(err.category(), ErrorCategory::Extraction);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn raised_abort_signal_cancels_before_first_turn() {
    let backend = FakeBackend::with_replies(vec![]);
    let pipeline = pipeline(small_chunks(), backend.clone());
    let signal = AbortSignal::new();
    signal.abort();

    let doc = FakeDocument::new("a.pdf", &[PAGE_ONE]);
    let err = pipeline.run(&[doc], Some(signal)).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Cancelled);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn unknown_id_is_a_lookup_error() {
    let pipeline = pipeline(small_chunks(), FakeBackend::with_replies(vec![]));
    let err = pipeline.get(&Uuid::new_v4()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Lookup);
}

// ── Progress and concurrency ─────────────────────────────────────────────────

#[tokio::test]
async fn progress_events_follow_pipeline_order() {
    let log = Arc::new(EventLog::default());
    let config = GenerationConfig::builder()
        .chunk_size(5000)
        .chunk_overlap(0)
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let pipeline = pipeline(config, FakeBackend::with_replies(vec![]));

    let doc = FakeDocument::new("a.pdf", &["Only page."]);
    pipeline.run(&[doc], None).await.unwrap();

    let events = log.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "page a.pdf#1 MachineText",
            "chunks 1",
            "turn 1/1",
            "synthesis",
            "done",
        ]
    );
}

#[tokio::test]
async fn concurrent_runs_share_one_store() {
    let pipeline = Arc::new(pipeline(small_chunks(), FakeBackend::with_replies(vec![])));

    let mut tasks = Vec::new();
    for i in 0..4 {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            let doc = FakeDocument::new(&format!("doc{i}.pdf"), &[PAGE_ONE]);
            pipeline.run(&[doc], None).await.map(|r| r.id)
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    assert_eq!(pipeline.store().len(), 4);
    for id in ids {
        assert!(pipeline.get(&id).is_ok());
    }
}
