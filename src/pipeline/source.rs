//! Page access: machine text and rasterisation for one document.
//!
//! [`PageSource`] is what the extractors consume. [`PdfiumDocument`] is the
//! production implementation over `pdfium-render`. pdfium is synchronous and
//! keeps thread-local state, so the document is opened inside
//! `tokio::task::spawn_blocking` and released before the task returns. The
//! whole text layer is read in one such task and kept; only pages that need
//! OCR cause a further load to rasterise them.
//! Rasterisation caps the longest edge at `max_rendered_pixels` so an A0
//! poster does not turn into a 200-megapixel bitmap.

use crate::error::{ExtractionError, ScriptError};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::debug;

/// A document whose pages can be read by index (0-based).
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Identifier reported with the result (usually the file name).
    fn id(&self) -> &str;

    /// Number of pages. An error means the document cannot be read at all.
    async fn page_count(&self) -> Result<usize, ExtractionError>;

    /// Text from the PDF text layer; empty for scanned pages.
    async fn machine_text(&self, index: usize) -> Result<String, ExtractionError>;

    /// Render one page to an image for OCR.
    async fn rasterize(&self, index: usize) -> Result<DynamicImage, ExtractionError>;
}

/// Bind to the pdfium shared library.
///
/// `PDFIUM_LIB_PATH` (a library file or the directory holding it) wins;
/// otherwise the current directory is tried, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            if path.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            } else {
                Pdfium::bind_to_library(path)
            }
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }?;
    Ok(Pdfium::new(bindings))
}

/// Per-page machine text, in page order.
type TextLayer = Vec<Result<String, ExtractionError>>;

/// A PDF on disk read through pdfium.
#[derive(Debug)]
pub struct PdfiumDocument {
    id: String,
    path: PathBuf,
    password: Option<String>,
    max_pixels: u32,
    text_layer: OnceCell<TextLayer>,
    loads: AtomicUsize,
}

impl PdfiumDocument {
    /// Check that pdfium can be bound, then wrap `path`.
    ///
    /// The document itself is only opened on first use, so an unreadable file
    /// surfaces as a per-document extraction failure.
    pub async fn open(
        id: impl Into<String>,
        path: impl AsRef<Path>,
        password: Option<String>,
        max_pixels: u32,
    ) -> Result<Self, ScriptError> {
        tokio::task::spawn_blocking(|| bind_pdfium().map(|_| ()))
            .await
            .map_err(|e| ScriptError::Internal(format!("pdfium bind task panicked: {e}")))?
            .map_err(|e| ScriptError::PdfiumBindingFailed(format!("{e:?}")))?;

        Ok(Self {
            id: id.into(),
            path: path.as_ref().to_path_buf(),
            password,
            max_pixels,
            text_layer: OnceCell::new(),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many times the file has been loaded by pdfium so far.
    pub fn document_loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Text of every page, read in a single load on first use.
    async fn text_layer(&self) -> Result<&TextLayer, ExtractionError> {
        self.text_layer
            .get_or_try_init(|| {
                self.with_document(|doc| {
                    let layer: TextLayer = doc
                        .pages()
                        .iter()
                        .enumerate()
                        .map(|(index, page)| {
                            page.text()
                                .map(|text| text.all())
                                .map_err(|e| ExtractionError::MachineText {
                                    page: index + 1,
                                    detail: format!("{e:?}"),
                                })
                        })
                        .collect();
                    Ok(layer)
                })
            })
            .await
    }

    /// Run `f` against the opened document on the blocking pool.
    async fn with_document<T, F>(&self, f: F) -> Result<T, ExtractionError>
    where
        T: Send + 'static,
        F: FnOnce(&PdfDocument<'_>) -> Result<T, ExtractionError> + Send + 'static,
    {
        let id = self.id.clone();
        let path = self.path.clone();
        let password = self.password.clone();
        self.loads.fetch_add(1, Ordering::Relaxed);

        tokio::task::spawn_blocking(move || {
            let open_err = |detail: String| ExtractionError::Open {
                document: id.clone(),
                detail,
            };
            let pdfium = bind_pdfium().map_err(|e| open_err(format!("{e:?}")))?;
            let document = pdfium
                .load_pdf_from_file(&path, password.as_deref())
                .map_err(|e| open_err(format!("{e:?}")))?;
            f(&document)
        })
        .await
        .map_err(|e| ExtractionError::Open {
            document: self.id.clone(),
            detail: format!("pdfium task panicked: {e}"),
        })?
    }
}

#[async_trait]
impl PageSource for PdfiumDocument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn page_count(&self) -> Result<usize, ExtractionError> {
        let count = self.text_layer().await?.len();
        debug!("{}: {} pages", self.id, count);
        Ok(count)
    }

    async fn machine_text(&self, index: usize) -> Result<String, ExtractionError> {
        match self.text_layer().await?.get(index) {
            Some(page) => page.clone(),
            None => Err(ExtractionError::MachineText {
                page: index + 1,
                detail: "page index out of range".into(),
            }),
        }
    }

    async fn rasterize(&self, index: usize) -> Result<DynamicImage, ExtractionError> {
        let max_pixels = self.max_pixels as i32;
        self.with_document(move |doc| {
            let err = |e: PdfiumError| ExtractionError::Rasterize {
                page: index + 1,
                detail: format!("{e:?}"),
            };
            let render_config = PdfRenderConfig::new()
                .set_target_width(max_pixels)
                .set_maximum_height(max_pixels);
            let page = doc.pages().get(index as u16).map_err(err)?;
            let image = page.render_with_config(&render_config).map_err(err)?.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                index + 1,
                image.width(),
                image.height()
            );
            Ok(image)
        })
        .await
    }
}
