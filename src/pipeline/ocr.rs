//! Text recognition for pages without a usable text layer.
//!
//! Two recognizers are provided:
//!
//! * [`VisionRecognizer`] sends the page PNG to a vision-capable model
//!   through `edgequake-llm`.
//! * [`TesseractRecognizer`] runs the `tesseract` CLI on a temporary PNG. The
//!   temp file is owned by a `NamedTempFile` and removed on every exit path.

use crate::pipeline::encode;
use crate::prompts::OCR_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recognizer exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("vision model call failed: {0}")]
    Model(String),
}

/// Turns a page image into text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &DynamicImage) -> Result<String, RecognitionError>;
}

/// Vision-model OCR.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl VisionRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(&self, image: &DynamicImage) -> Result<String, RecognitionError> {
        let attachment = encode::image_attachment(image)?;
        let messages = vec![
            ChatMessage::system(OCR_PROMPT),
            ChatMessage::user_with_images("", vec![attachment]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.1),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| RecognitionError::Model(e.to_string()))?;

        debug!(
            "Vision OCR: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// OCR through the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: String,
    language: Option<String>,
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: None,
        }
    }
}

impl TesseractRecognizer {
    pub fn new(binary: Option<String>, language: Option<String>) -> Self {
        Self {
            binary: binary.unwrap_or_else(|| "tesseract".to_string()),
            language,
        }
    }

    fn command(&self, image_path: &std::path::Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg(image_path).arg("stdout");
        if let Some(ref lang) = self.language {
            cmd.arg("-l").arg(lang);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &DynamicImage) -> Result<String, RecognitionError> {
        let png = encode::png_bytes(image)?;
        let file = tempfile::Builder::new()
            .prefix("pdf2script-page-")
            .suffix(".png")
            .tempfile()?;
        tokio::fs::write(file.path(), &png).await?;

        let output = self.command(file.path()).output().await?;
        if !output.status.success() {
            return Err(RecognitionError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("tesseract recognised {} chars", text.chars().count());
        Ok(text)
    }
}

/// Build the recognizer for the configured engine, if any.
pub fn recognizer_for(
    engine: &crate::config::OcrEngine,
    provider: Option<&Arc<dyn LLMProvider>>,
) -> Option<Arc<dyn TextRecognizer>> {
    use crate::config::OcrEngine;
    match engine {
        OcrEngine::Vision => provider
            .map(|p| Arc::new(VisionRecognizer::new(Arc::clone(p))) as Arc<dyn TextRecognizer>),
        OcrEngine::Tesseract { binary, language } => Some(Arc::new(TesseractRecognizer::new(
            binary.clone(),
            language.clone(),
        ))),
        OcrEngine::Disabled => None,
    }
}
