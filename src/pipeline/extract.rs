//! Text extraction with OCR fallback and bounded page concurrency.
//!
//! [`PageExtractor`] reads one page: machine text when the text layer has
//! anything besides whitespace, otherwise rasterise and recognise. Failures
//! never escape a page; they are logged, recorded in the page's
//! [`PageOutcome`], and the page contributes empty text.
//!
//! [`DocumentExtractor`] fans pages out over a bounded pool
//! (`buffer_unordered`) and re-assembles them by page index, so completion
//! order never leaks into the text.

use crate::error::ExtractionError;
use crate::output::{ExtractionMethod, PageOutcome};
use crate::pipeline::ocr::TextRecognizer;
use crate::pipeline::source::PageSource;
use crate::progress::ProgressCallback;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Text contributed by one page.
#[derive(Debug, Clone)]
pub struct PageText {
    pub text: String,
    pub outcome: PageOutcome,
}

impl PageText {
    fn failed(index: usize, error: Option<ExtractionError>) -> Self {
        Self {
            text: String::new(),
            outcome: PageOutcome {
                index,
                method: ExtractionMethod::Failed,
                chars: 0,
                error,
            },
        }
    }

    fn ok(index: usize, method: ExtractionMethod, text: String) -> Self {
        let chars = text.chars().count();
        Self {
            text,
            outcome: PageOutcome {
                index,
                method,
                chars,
                error: None,
            },
        }
    }
}

/// Reads a single page, falling back to OCR.
#[derive(Clone)]
pub struct PageExtractor {
    recognizer: Option<Arc<dyn TextRecognizer>>,
    ocr_timeout: Duration,
}

impl PageExtractor {
    /// `recognizer = None` disables OCR fallback.
    pub fn new(recognizer: Option<Arc<dyn TextRecognizer>>, ocr_timeout: Duration) -> Self {
        Self {
            recognizer,
            ocr_timeout,
        }
    }

    pub async fn extract(&self, doc: &dyn PageSource, index: usize) -> PageText {
        let page_num = index + 1;

        let machine_error = match doc.machine_text(index).await {
            Ok(text) if !text.trim().is_empty() => {
                return PageText::ok(index, ExtractionMethod::MachineText, text);
            }
            Ok(_) => None,
            Err(e) => {
                warn!("{} page {}: {}", doc.id(), page_num, e);
                Some(e)
            }
        };

        let Some(ref recognizer) = self.recognizer else {
            debug!("{} page {}: no text layer and OCR disabled", doc.id(), page_num);
            return PageText::failed(index, machine_error);
        };

        debug!("{} page {}: falling back to {} OCR", doc.id(), page_num, recognizer.name());

        let recognized = {
            let image = match doc.rasterize(index).await {
                Ok(image) => image,
                Err(e) => {
                    warn!("{} page {}: {}", doc.id(), page_num, e);
                    return PageText::failed(index, Some(e));
                }
            };
            tokio::time::timeout(self.ocr_timeout, recognizer.recognize(&image)).await
        };

        match recognized {
            Ok(Ok(text)) if !text.trim().is_empty() => PageText::ok(index, ExtractionMethod::Ocr, text),
            Ok(Ok(_)) => {
                warn!("{} page {}: OCR found no text", doc.id(), page_num);
                PageText::failed(index, machine_error)
            }
            Ok(Err(e)) => {
                warn!("{} page {}: OCR failed: {}", doc.id(), page_num, e);
                PageText::failed(
                    index,
                    Some(ExtractionError::Recognize {
                        page: page_num,
                        detail: e.to_string(),
                    }),
                )
            }
            Err(_) => {
                let secs = self.ocr_timeout.as_secs();
                warn!("{} page {}: OCR timed out after {}s", doc.id(), page_num, secs);
                PageText::failed(index, Some(ExtractionError::Timeout { page: page_num, secs }))
            }
        }
    }
}

/// All text from one document, in page order.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub id: String,
    /// Page texts in ascending page order, each followed by a newline.
    pub text: String,
    pub pages: Vec<PageOutcome>,
    /// Set when the document could not be opened at all.
    pub error: Option<ExtractionError>,
}

impl ExtractedDocument {
    pub fn ocr_pages(&self) -> usize {
        self.count(ExtractionMethod::Ocr)
    }

    pub fn failed_pages(&self) -> usize {
        self.count(ExtractionMethod::Failed)
    }

    fn count(&self, method: ExtractionMethod) -> usize {
        self.pages.iter().filter(|p| p.method == method).count()
    }
}

/// Extracts whole documents with bounded page concurrency.
#[derive(Clone)]
pub struct DocumentExtractor {
    page: PageExtractor,
    concurrency: usize,
    progress: Option<ProgressCallback>,
}

impl DocumentExtractor {
    pub fn new(page: PageExtractor, concurrency: usize) -> Self {
        Self {
            page,
            concurrency: concurrency.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn extract(&self, doc: &dyn PageSource) -> ExtractedDocument {
        let id = doc.id().to_string();

        let count = match doc.page_count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Skipping document {}: {}", id, e);
                return ExtractedDocument {
                    id,
                    text: String::new(),
                    pages: Vec::new(),
                    error: Some(e),
                };
            }
        };
        info!("Extracting {} pages from {}", count, id);

        let mut results: Vec<PageText> = stream::iter(0..count)
            .map(|index| async move {
                let page = self.page.extract(doc, index).await;
                if let Some(ref cb) = self.progress {
                    cb.on_page_extracted(doc.id(), index + 1, page.outcome.method);
                }
                page
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.sort_by_key(|page| page.outcome.index);

        let mut text = String::new();
        let mut pages = Vec::with_capacity(results.len());
        for page in results {
            text.push_str(&page.text);
            text.push('\n');
            pages.push(page.outcome);
        }

        ExtractedDocument {
            id,
            text,
            pages,
            error: None,
        }
    }

    /// Extract several documents concurrently; output keeps caller order.
    pub async fn extract_all(&self, docs: &[Arc<dyn PageSource>]) -> Vec<ExtractedDocument> {
        join_all(docs.iter().map(|doc| self.extract(doc.as_ref()))).await
    }
}

/// Concatenate extracted documents, separated by a blank line.
pub fn concatenate(docs: &[ExtractedDocument]) -> String {
    docs.iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::RecognitionError;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pages with fixed machine text; later pages answer faster.
    struct FakeDoc {
        id: String,
        pages: Vec<&'static str>,
        fail_open: bool,
        fail_raster: bool,
    }

    impl FakeDoc {
        fn new(pages: Vec<&'static str>) -> Self {
            Self {
                id: "fake.pdf".into(),
                pages,
                fail_open: false,
                fail_raster: false,
            }
        }
    }

    #[async_trait]
    impl PageSource for FakeDoc {
        fn id(&self) -> &str {
            &self.id
        }

        async fn page_count(&self) -> Result<usize, ExtractionError> {
            if self.fail_open {
                return Err(ExtractionError::Open {
                    document: self.id.clone(),
                    detail: "corrupt".into(),
                });
            }
            Ok(self.pages.len())
        }

        async fn machine_text(&self, index: usize) -> Result<String, ExtractionError> {
            let delay = (self.pages.len() - index) as u64 * 15;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(self.pages[index].to_string())
        }

        async fn rasterize(&self, index: usize) -> Result<DynamicImage, ExtractionError> {
            if self.fail_raster {
                return Err(ExtractionError::Rasterize {
                    page: index + 1,
                    detail: "no bitmap".into(),
                });
            }
            Ok(DynamicImage::new_rgb8(2, 2))
        }
    }

    struct CountingRecognizer {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingRecognizer {
        fn new() -> Arc<Self> {
            Self::slow(Duration::ZERO)
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl TextRecognizer for CountingRecognizer {
        fn name(&self) -> &str {
            "counting"
        }

        async fn recognize(&self, _image: &DynamicImage) -> Result<String, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok("recognised".into())
        }
    }

    fn extractor(rec: Option<Arc<dyn TextRecognizer>>) -> PageExtractor {
        PageExtractor::new(rec, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn machine_text_skips_ocr() {
        let rec = CountingRecognizer::new();
        let doc = FakeDoc::new(vec!["Hello"]);
        let page = extractor(Some(rec.clone())).extract(&doc, 0).await;
        assert_eq!(page.text, "Hello");
        assert_eq!(page.outcome.method, ExtractionMethod::MachineText);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn whitespace_only_text_triggers_ocr() {
        let rec = CountingRecognizer::new();
        let doc = FakeDoc::new(vec!["  \n\t "]);
        let page = extractor(Some(rec.clone())).extract(&doc, 0).await;
        assert_eq!(page.text, "recognised");
        assert_eq!(page.outcome.method, ExtractionMethod::Ocr);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rasterise_failure_yields_empty_text() {
        let mut doc = FakeDoc::new(vec![""]);
        doc.fail_raster = true;
        let page = extractor(Some(CountingRecognizer::new())).extract(&doc, 0).await;
        assert_eq!(page.text, "");
        assert_eq!(page.outcome.method, ExtractionMethod::Failed);
        assert!(matches!(page.outcome.error, Some(ExtractionError::Rasterize { .. })));
    }

    #[tokio::test]
    async fn ocr_timeout_counts_as_failure() {
        let doc = FakeDoc::new(vec![""]);
        let rec = CountingRecognizer::slow(Duration::from_millis(500));
        let page = PageExtractor::new(Some(rec), Duration::from_millis(20))
            .extract(&doc, 0)
            .await;
        assert_eq!(page.text, "");
        assert!(matches!(page.outcome.error, Some(ExtractionError::Timeout { page: 1, .. })));
    }

    #[tokio::test]
    async fn disabled_ocr_leaves_blank_pages_empty() {
        let doc = FakeDoc::new(vec![" "]);
        let page = extractor(None).extract(&doc, 0).await;
        assert_eq!(page.text, "");
        assert_eq!(page.outcome.method, ExtractionMethod::Failed);
        assert!(page.outcome.error.is_none());
    }

    #[tokio::test]
    async fn pages_are_assembled_in_index_order() {
        let doc = FakeDoc::new(vec!["p1", "p2", "p3", "p4", "p5", "p6"]);
        let extracted = DocumentExtractor::new(extractor(None), 6).extract(&doc).await;
        assert_eq!(extracted.text, "p1\np2\np3\np4\np5\np6\n");
        let indices: Vec<_> = extracted.pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn failed_page_does_not_affect_siblings() {
        let mut doc = FakeDoc::new(vec!["first", "", "third"]);
        doc.fail_raster = true;
        let extracted = DocumentExtractor::new(extractor(Some(CountingRecognizer::new())), 2)
            .extract(&doc)
            .await;
        assert_eq!(extracted.text, "first\n\nthird\n");
        assert_eq!(extracted.failed_pages(), 1);
    }

    #[tokio::test]
    async fn unreadable_document_contributes_nothing() {
        let mut bad = FakeDoc::new(vec!["x"]);
        bad.fail_open = true;
        bad.id = "bad.pdf".into();
        let good = FakeDoc::new(vec!["good"]);
        let docs: Vec<Arc<dyn PageSource>> = vec![Arc::new(bad), Arc::new(good)];

        let extracted = DocumentExtractor::new(extractor(None), 2).extract_all(&docs).await;
        assert_eq!(extracted.len(), 2);
        assert!(extracted[0].error.is_some());
        assert_eq!(extracted[0].text, "");
        assert_eq!(concatenate(&extracted), "\ngood\n");
    }

    #[tokio::test]
    async fn documents_keep_caller_order() {
        let mut a = FakeDoc::new(vec!["a1", "a2", "a3"]);
        a.id = "a.pdf".into();
        let mut b = FakeDoc::new(vec!["b1"]);
        b.id = "b.pdf".into();
        let docs: Vec<Arc<dyn PageSource>> = vec![Arc::new(a), Arc::new(b)];

        let extracted = DocumentExtractor::new(extractor(None), 4).extract_all(&docs).await;
        assert_eq!(concatenate(&extracted), "a1\na2\na3\n\nb1\n");
    }
}
