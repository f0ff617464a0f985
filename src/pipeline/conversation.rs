//! Stateful multi-turn conversation that turns chunks into a script.
//!
//! ```text
//! Init ──▶ Feeding(1) ──▶ … ──▶ Feeding(N) ──▶ Synthesizing ──▶ Done
//!              │                    │               │
//!              └────────────────────┴───────────────┴──▶ Failed
//! ```
//!
//! Every request carries the pinned instruction turn plus the most recent
//! `window_turns` completed turns, so the request size stays bounded however
//! long the document is. Each backend call runs under a timeout and is
//! retried with exponential backoff (`base * 2^attempt`) while the error is
//! transient. Exhausted retries come back as a [`CallFailure`] value; the
//! driver then applies the [`FeedFailurePolicy`] for chunk turns and always
//! aborts for the synthesis turn.

use crate::backend::{Generation, GenerationBackend, SamplingOptions};
use crate::config::GenerationConfig;
use crate::error::{BackendError, ScriptError};
use crate::pipeline::chunk::Chunk;
use crate::pipeline::clean::ResponseCleaner;
use crate::progress::ProgressCallback;
use crate::prompts::{chunk_turn, DEFAULT_PLACEHOLDER, SYNTHESIS_PROMPT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ── Turns and the window ─────────────────────────────────────────────────────

/// Who a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The pinned instruction, sent with every request.
    Instruction,
    /// Content supplied by the pipeline (a chunk or the synthesis request).
    Supplied,
    /// Text produced by the backend.
    Produced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn instruction(text: impl Into<String>) -> Self {
        Self::new(Role::Instruction, text)
    }

    pub fn supplied(text: impl Into<String>) -> Self {
        Self::new(Role::Supplied, text)
    }

    pub fn produced(text: impl Into<String>) -> Self {
        Self::new(Role::Produced, text)
    }
}

/// Pinned instruction plus the most recent `capacity` completed turns.
///
/// The window never opens on a produced turn: eviction drops a dangling
/// produced turn together with the supplied turn it answered, so an odd
/// capacity keeps one turn fewer.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    pinned: Turn,
    recent: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationWindow {
    pub fn new(pinned: Turn, capacity: usize) -> Self {
        Self {
            pinned,
            recent: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn pinned(&self) -> &Turn {
        &self.pinned
    }

    /// Record a completed turn, evicting the oldest beyond capacity.
    pub fn push(&mut self, turn: Turn) {
        self.recent.push_back(turn);
        while self.recent.len() > self.capacity
            || self.recent.front().is_some_and(|t| t.role == Role::Produced)
        {
            self.recent.pop_front();
        }
    }

    /// Completed turns currently in the window, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &Turn> {
        self.recent.iter()
    }

    /// The live request: pinned, window, then `next`.
    pub fn request(&self, next: &Turn) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(self.recent.len() + 2);
        turns.push(self.pinned.clone());
        turns.extend(self.recent.iter().cloned());
        turns.push(next.clone());
        turns
    }
}

// ── Retry plumbing ───────────────────────────────────────────────────────────

/// Attempts per call and the backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first. At least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): `base * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Suspends the driver between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Cooperative cancellation flag, checked before every turn.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A call that exhausted its attempts or hit a permanent error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub attempts: u32,
    pub last_error: BackendError,
}

/// A call that eventually succeeded.
#[derive(Debug, Clone)]
pub struct CallSuccess {
    pub generation: Generation,
    pub attempts: u32,
}

// ── Policies and state ───────────────────────────────────────────────────────

/// What to do when a chunk turn fails after all retries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFailurePolicy {
    /// Stop and report which chunk failed.
    #[default]
    Abort,
    /// Record the given text as the produced turn and keep going.
    Placeholder(String),
}

impl FeedFailurePolicy {
    /// Placeholder policy with the standard transition segment.
    pub fn placeholder() -> Self {
        FeedFailurePolicy::Placeholder(DEFAULT_PLACEHOLDER.to_string())
    }
}

/// Context sent along with the synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisContext {
    /// Pinned instruction plus the live window.
    #[default]
    Window,
    /// Pinned instruction plus every recorded turn.
    FullTranscript,
    /// Pinned instruction only.
    PinnedOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    /// Feeding chunk `i` (1-based).
    Feeding(usize),
    Synthesizing,
    Done,
    Failed,
}

/// What happened on one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-based chunk number; `None` for the synthesis turn.
    pub chunk: Option<usize>,
    pub attempts: u32,
    /// The produced turn is the failure placeholder.
    pub placeholder: bool,
    pub produced_chars: usize,
}

/// Output of a completed conversation.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    /// Cleaned synthesis text, never empty.
    pub script: String,
    pub turns: Vec<TurnRecord>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ConversationOutcome {
    /// Chunk turns recorded as placeholders.
    pub fn placeholder_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.placeholder).count()
    }

    /// Attempts beyond the first, over all turns.
    pub fn retries(&self) -> u32 {
        self.turns.iter().map(|t| t.attempts.saturating_sub(1)).sum()
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Drives one conversation from the pinned instruction to the final script.
pub struct ConversationDriver {
    backend: Arc<dyn GenerationBackend>,
    sleeper: Arc<dyn Sleeper>,
    cleaner: ResponseCleaner,
    sampling: SamplingOptions,
    retry: RetryPolicy,
    api_timeout: Duration,
    window_turns: usize,
    synthesis_context: SynthesisContext,
    feed_failure: FeedFailurePolicy,
    abort: Option<AbortSignal>,
    progress: Option<ProgressCallback>,
    state: DriverState,
    script: Option<String>,
}

impl ConversationDriver {
    /// Driver with default window, retry and failure settings.
    pub fn new(backend: Arc<dyn GenerationBackend>, sampling: SamplingOptions) -> Self {
        Self {
            backend,
            sleeper: Arc::new(TokioSleeper),
            cleaner: ResponseCleaner::default(),
            sampling,
            retry: RetryPolicy::default(),
            api_timeout: Duration::from_secs(90),
            window_turns: 2,
            synthesis_context: SynthesisContext::default(),
            feed_failure: FeedFailurePolicy::default(),
            abort: None,
            progress: None,
            state: DriverState::Init,
            script: None,
        }
    }

    /// Driver configured from a [`GenerationConfig`].
    pub fn from_config(backend: Arc<dyn GenerationBackend>, config: &GenerationConfig) -> Self {
        let mut driver = Self::new(backend, config.sampling())
            .with_retry(RetryPolicy {
                max_attempts: config.max_attempts,
                base_delay: Duration::from_millis(config.retry_backoff_ms),
            })
            .with_api_timeout(Duration::from_secs(config.api_timeout_secs))
            .with_window_turns(config.window_turns)
            .with_synthesis_context(config.synthesis_context)
            .with_feed_failure(config.feed_failure.clone())
            .with_cleaner(ResponseCleaner::new(config.strip_stage_directions));
        driver.progress = config.progress_callback.clone();
        driver
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cleaner(mut self, cleaner: ResponseCleaner) -> Self {
        self.cleaner = cleaner;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            max_attempts: retry.max_attempts.max(1),
            ..retry
        };
        self
    }

    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    pub fn with_window_turns(mut self, k: usize) -> Self {
        self.window_turns = k;
        self
    }

    pub fn with_synthesis_context(mut self, context: SynthesisContext) -> Self {
        self.synthesis_context = context;
        self
    }

    pub fn with_feed_failure(mut self, policy: FeedFailurePolicy) -> Self {
        self.feed_failure = policy;
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// The synthesised script once the driver is `Done`.
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Feed every chunk, then request the synthesis.
    pub async fn run(
        &mut self,
        instruction: &str,
        chunks: &[Chunk],
    ) -> Result<ConversationOutcome, ScriptError> {
        self.state = DriverState::Init;
        self.script = None;

        let result = self.drive(instruction, chunks).await;
        match &result {
            Ok(outcome) => {
                self.state = DriverState::Done;
                self.script = Some(outcome.script.clone());
            }
            Err(e) => {
                warn!("Conversation failed: {}", e);
                self.state = DriverState::Failed;
            }
        }
        result
    }

    async fn drive(
        &mut self,
        instruction: &str,
        chunks: &[Chunk],
    ) -> Result<ConversationOutcome, ScriptError> {
        let total = chunks.len();
        let mut window = ConversationWindow::new(Turn::instruction(instruction), self.window_turns);
        let mut transcript: Vec<Turn> = Vec::with_capacity(total * 2);
        let mut records = Vec::with_capacity(total + 1);
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        info!("Feeding {} chunks to {}", total, self.backend.name());

        for (i, chunk) in chunks.iter().enumerate() {
            let n = i + 1;
            self.check_abort(records.len())?;
            self.state = DriverState::Feeding(n);
            if let Some(ref cb) = self.progress {
                cb.on_turn_start(n, total);
            }

            let supplied = Turn::supplied(chunk_turn(n, total, &chunk.text));
            let request = window.request(&supplied);

            let (produced, record) = match self.call_with_retry(&request).await {
                Ok(success) => {
                    input_tokens += success.generation.prompt_tokens as u64;
                    output_tokens += success.generation.completion_tokens as u64;
                    let text = self.cleaner.clean(&success.generation.text);
                    let produced_chars = text.chars().count();
                    debug!("Chunk {}/{}: {} chars produced", n, total, produced_chars);
                    if let Some(ref cb) = self.progress {
                        cb.on_turn_complete(n, total, produced_chars);
                    }
                    let record = TurnRecord {
                        chunk: Some(n),
                        attempts: success.attempts,
                        placeholder: false,
                        produced_chars,
                    };
                    (text, record)
                }
                Err(failure) => {
                    if let Some(ref cb) = self.progress {
                        cb.on_turn_error(n, total, &failure.last_error.to_string());
                    }
                    match &self.feed_failure {
                        FeedFailurePolicy::Abort => {
                            return Err(ScriptError::FeedingFailed {
                                chunk: n,
                                total,
                                attempts: failure.attempts,
                                source: failure.last_error,
                            });
                        }
                        FeedFailurePolicy::Placeholder(text) => {
                            warn!(
                                "Chunk {}/{}: substituting placeholder after {} attempt(s): {}",
                                n, total, failure.attempts, failure.last_error
                            );
                            let record = TurnRecord {
                                chunk: Some(n),
                                attempts: failure.attempts,
                                placeholder: true,
                                produced_chars: text.chars().count(),
                            };
                            (text.clone(), record)
                        }
                    }
                }
            };

            let produced = Turn::produced(produced);
            window.push(supplied.clone());
            window.push(produced.clone());
            transcript.push(supplied);
            transcript.push(produced);
            records.push(record);
        }

        self.check_abort(records.len())?;
        self.state = DriverState::Synthesizing;
        if let Some(ref cb) = self.progress {
            cb.on_synthesis_start();
        }

        let synthesis = Turn::supplied(SYNTHESIS_PROMPT);
        let request = match self.synthesis_context {
            SynthesisContext::Window => window.request(&synthesis),
            SynthesisContext::FullTranscript => {
                let mut turns = Vec::with_capacity(transcript.len() + 2);
                turns.push(window.pinned().clone());
                turns.extend(transcript);
                turns.push(synthesis);
                turns
            }
            SynthesisContext::PinnedOnly => vec![window.pinned().clone(), synthesis],
        };
        info!("Requesting synthesis with {} turns of context", request.len());

        let success = self
            .call_with_retry(&request)
            .await
            .map_err(|failure| ScriptError::SynthesisFailed {
                attempts: failure.attempts,
                source: failure.last_error,
            })?;

        input_tokens += success.generation.prompt_tokens as u64;
        output_tokens += success.generation.completion_tokens as u64;

        let script = self.cleaner.clean(&success.generation.text);
        if script.is_empty() {
            return Err(ScriptError::EmptyScript);
        }

        records.push(TurnRecord {
            chunk: None,
            attempts: success.attempts,
            placeholder: false,
            produced_chars: script.chars().count(),
        });

        Ok(ConversationOutcome {
            script,
            turns: records,
            input_tokens,
            output_tokens,
        })
    }

    fn check_abort(&self, completed_turns: usize) -> Result<(), ScriptError> {
        match self.abort {
            Some(ref signal) if signal.is_aborted() => {
                Err(ScriptError::Cancelled { completed_turns })
            }
            _ => Ok(()),
        }
    }

    /// Call the backend, retrying transient errors with exponential backoff.
    pub async fn call_with_retry(&self, turns: &[Turn]) -> Result<CallSuccess, CallFailure> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.call_once(turns).await {
                Ok(generation) => {
                    return Ok(CallSuccess {
                        generation,
                        attempts: attempt,
                    })
                }
                Err(e) if !e.is_transient() || attempt >= self.retry.max_attempts => {
                    warn!("Backend call failed on attempt {}: {}", attempt, e);
                    return Err(CallFailure {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.retry.max_attempts, e, delay
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    async fn call_once(&self, turns: &[Turn]) -> Result<Generation, BackendError> {
        match tokio::time::timeout(self.api_timeout, self.backend.generate(turns, &self.sampling))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                secs: self.api_timeout.as_secs(),
            }),
        }
    }
}
