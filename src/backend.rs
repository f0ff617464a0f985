//! Generation backend abstraction and the `edgequake-llm` adapter.
//!
//! The conversation driver depends only on [`GenerationBackend`]: an ordered
//! list of turns plus [`SamplingOptions`] in, produced text or a classified
//! [`BackendError`] out. [`LlmBackend`] maps that contract onto any
//! [`edgequake_llm::LLMProvider`], and [`resolve_provider`] picks the provider
//! from the configuration and the environment.

use crate::config::GenerationConfig;
use crate::error::{BackendError, ScriptError};
use crate::pipeline::conversation::{Role, Turn};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Per-request generation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub top_p: f32,
}

/// One successful backend answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A request/response text generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Send the turns in order and return the produced text.
    async fn generate(
        &self,
        turns: &[Turn],
        options: &SamplingOptions,
    ) -> Result<Generation, BackendError>;
}

/// [`GenerationBackend`] over an `edgequake-llm` chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        let name = provider.name().to_string();
        Self { provider, name }
    }

    /// The wrapped provider, shared with the vision recognizer.
    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }
}

#[async_trait]
impl GenerationBackend for LlmBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        turns: &[Turn],
        options: &SamplingOptions,
    ) -> Result<Generation, BackendError> {
        let messages: Vec<ChatMessage> = turns.iter().map(to_chat_message).collect();
        let completion = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
            top_p: Some(options.top_p),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&completion))
            .await
            .map_err(|e| classify_error(&e.to_string()))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(BackendError::MalformedResponse {
                detail: "response has no content".into(),
            });
        }

        Ok(Generation {
            text: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

fn to_chat_message(turn: &Turn) -> ChatMessage {
    match turn.role {
        Role::Instruction => ChatMessage::system(turn.text.as_str()),
        Role::Supplied => ChatMessage::user(turn.text.as_str()),
        Role::Produced => ChatMessage::assistant(turn.text.as_str()),
    }
}

/// Classify a provider error message as transient or permanent.
///
/// Providers surface HTTP status and transport failures only through their
/// error text, so classification goes by well-known markers. Unrecognised
/// messages classify as [`BackendError::Unavailable`].
pub fn classify_error(message: &str) -> BackendError {
    let lower = message.to_ascii_lowercase();
    let detail = message.to_string();

    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["429", "rate limit", "rate_limit", "too many requests", "quota"]) {
        BackendError::RateLimited { detail }
    } else if has(&["timed out", "timeout", "deadline"]) {
        BackendError::Timeout { secs: 0 }
    } else if has(&[
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "authentication",
        "400",
        "bad request",
        "404",
        "not found",
        "content_filter",
        "content filter",
    ]) {
        BackendError::Rejected { detail }
    } else if has(&["parse", "deserializ", "invalid json", "missing field", "unexpected response"]) {
        BackendError::MalformedResponse { detail }
    } else {
        BackendError::Unavailable { detail }
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ScriptError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ScriptError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`, `config.model`).
/// 3. **Environment pair** `PDF2SCRIPT_PROVIDER` + `PDF2SCRIPT_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &GenerationConfig) -> Result<Arc<dyn LLMProvider>, ScriptError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("PDF2SCRIPT_PROVIDER"),
        std::env::var("PDF2SCRIPT_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ScriptError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
