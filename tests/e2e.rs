//! End-to-end tests against real PDFs and a live LLM provider.
//!
//! PDFs live in `./test_cases/`. The tests are gated behind `E2E_ENABLED`
//! and need pdfium plus provider credentials (`OPENAI_API_KEY`, or
//! `PDF2SCRIPT_PROVIDER` / `PDF2SCRIPT_MODEL`).
//!
//! Run with:
//!   E2E_ENABLED=1 DYLD_LIBRARY_PATH=. cargo test --test e2e -- --nocapture

use pdf2script::{
    ContentStyle, GenerationConfig, PageSource, PdfiumDocument, ScriptPipeline, TargetDuration,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip unless E2E_ENABLED is set and the PDF at `path` exists.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// A script meant for speech has no markup left in it.
fn assert_speakable(script: &str, context: &str) {
    assert!(!script.trim().is_empty(), "[{context}] script is empty");
    for marker in ["```", "**", "##", "<", "[", "\\n"] {
        assert!(
            !script.contains(marker),
            "[{context}] script still contains {marker:?}"
        );
    }
    assert!(
        !script.contains("\n\n\n"),
        "[{context}] script has runs of blank lines"
    );
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_single_paper_small_casual() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("attention.pdf"));

    let config = GenerationConfig::builder()
        .content_style(ContentStyle::Casual)
        .duration(TargetDuration::Small)
        .build()
        .unwrap();
    let pipeline = ScriptPipeline::from_config(config).unwrap();

    let out = output_dir().join("attention.txt");
    let result = pipeline
        .generate_to_file(&[pdf.to_string_lossy()], &out)
        .await
        .unwrap();

    assert_speakable(&result.script, "attention");
    assert_eq!(std::fs::read_to_string(&out).unwrap(), result.script);
    assert!(result.stats.chunks >= 1);
    assert_eq!(pipeline.get(&result.id).unwrap().script, result.script);
    println!("{} chars, {:?}", result.script.len(), result.stats);
}

#[tokio::test]
async fn e2e_two_documents_from_bytes() {
    let a = e2e_skip_unless_ready!(test_cases_dir().join("attention.pdf"));
    let b = e2e_skip_unless_ready!(test_cases_dir().join("bert.pdf"));

    let config = GenerationConfig::builder()
        .content_style(ContentStyle::Elaborate)
        .duration(TargetDuration::Small)
        .build()
        .unwrap();
    let pipeline = ScriptPipeline::from_config(config).unwrap();

    let docs = vec![
        ("attention.pdf".to_string(), std::fs::read(a).unwrap()),
        ("bert.pdf".to_string(), std::fs::read(b).unwrap()),
    ];
    let result = pipeline.generate_from_bytes(&docs).await.unwrap();

    assert_speakable(&result.script, "two documents");
    assert_eq!(result.stats.documents, 2);
    assert_eq!(result.sources, vec!["attention.pdf", "bert.pdf"]);
}

#[tokio::test]
async fn e2e_text_layer_is_read_in_one_load() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("attention.pdf"));

    let doc = PdfiumDocument::open("attention.pdf", &pdf, None, 2000)
        .await
        .unwrap();
    let pages = doc.page_count().await.unwrap();
    assert!(pages > 1);
    for index in 0..pages {
        doc.machine_text(index).await.unwrap();
    }
    assert_eq!(doc.document_loads(), 1);
}
