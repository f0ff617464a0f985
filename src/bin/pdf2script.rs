//! CLI binary for pdf2script.
//!
//! Maps flags onto `GenerationConfig`, runs the pipeline and prints the
//! script (or the full JSON result).

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2script::{
    ContentStyle, ExtractionMethod, FeedFailurePolicy, GenerationConfig,
    GenerationProgressCallback, OcrEngine, ProgressCallback, ScriptPipeline, SizeMetric,
    SynthesisContext, TargetDuration,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while pages are read, then a bar over the conversation turns.
struct CliProgressCallback {
    bar: ProgressBar,
    pages: AtomicUsize,
    ocr_pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Reading");
        bar.set_message("Opening documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            pages: AtomicUsize::new(0),
            ocr_pages: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, turns: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} turns  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(turns as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix("Writing");
        self.bar.reset_eta();
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_documents: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Reading {total_documents} document(s)…"))
        ));
    }

    fn on_page_extracted(&self, document: &str, page_num: usize, method: ExtractionMethod) {
        let n = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
        match method {
            ExtractionMethod::Ocr => {
                self.ocr_pages.fetch_add(1, Ordering::SeqCst);
            }
            ExtractionMethod::Failed => self.bar.println(format!(
                "  {} {} page {}  {}",
                red("✗"),
                document,
                page_num,
                dim("no text")
            )),
            ExtractionMethod::MachineText => {}
        }
        self.bar.set_message(format!("{n} pages"));
    }

    fn on_extraction_complete(&self, total_pages: usize, total_chars: usize) {
        self.bar.println(format!(
            "  {} {} pages  {}  {}",
            green("✓"),
            total_pages,
            dim(&format!("{total_chars} chars")),
            dim(&format!("{} via OCR", self.ocr_pages.load(Ordering::SeqCst))),
        ));
    }

    fn on_chunking_complete(&self, total_chunks: usize) {
        self.activate_bar(total_chunks + 1);
    }

    fn on_turn_start(&self, chunk: usize, total_chunks: usize) {
        self.bar.set_message(format!("section {chunk}/{total_chunks}"));
    }

    fn on_turn_complete(&self, _chunk: usize, _total_chunks: usize, _produced_len: usize) {
        self.bar.inc(1);
    }

    fn on_turn_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Section {:>3}/{:<3}  {}",
            red("✗"),
            chunk,
            total_chunks,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_synthesis_start(&self) {
        self.bar.set_message("synthesising script");
    }

    fn on_generation_complete(&self, result_id: &str, script_len: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} script {} ({} chars)",
            green("✔"),
            dim(result_id),
            bold(&script_len.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Script to stdout
  pdf2script paper.pdf

  # Several papers, elaborate and long, written to a file
  pdf2script --style elaborate --duration lengthy a.pdf b.pdf -o episode.txt

  # From a URL, tesseract for scanned pages
  pdf2script --ocr tesseract https://arxiv.org/pdf/1706.03762

  # Keep going when one section fails
  pdf2script --on-section-failure placeholder long-report.pdf

  # Full JSON result (id, sources, stats)
  pdf2script --json paper.pdf > result.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        OpenAI API key
  ANTHROPIC_API_KEY     Anthropic API key
  GEMINI_API_KEY        Google Gemini API key
  PDF2SCRIPT_PROVIDER   Provider (openai, anthropic, gemini, ollama, …)
  PDF2SCRIPT_MODEL      Model ID
  PDFIUM_LIB_PATH       Path to libpdfium (file or directory)
"#;

/// Turn PDF documents into a spoken-word script with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2script",
    version,
    about = "Turn PDF documents into a podcast-style script using an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF paths or HTTP/HTTPS URLs, combined in order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the script to this file instead of stdout.
    #[arg(short, long, env = "PDF2SCRIPT_OUTPUT")]
    output: Option<PathBuf>,

    /// Content style: concise, elaborate, balanced, formal, casual, professional.
    #[arg(long, env = "PDF2SCRIPT_STYLE", default_value = "concise")]
    style: ContentStyle,

    /// Target duration: small, moderate, lengthy.
    #[arg(long, env = "PDF2SCRIPT_DURATION", default_value = "moderate")]
    duration: TargetDuration,

    /// LLM model ID.
    #[arg(long, env = "PDF2SCRIPT_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "PDF2SCRIPT_PROVIDER")]
    provider: Option<String>,

    /// Maximum chunk size (characters, or tokens with --token-sizes).
    #[arg(long, env = "PDF2SCRIPT_CHUNK_SIZE", default_value_t = 2500)]
    chunk_size: usize,

    /// Overlap between consecutive chunks, same unit as --chunk-size.
    #[arg(long, env = "PDF2SCRIPT_CHUNK_OVERLAP", default_value_t = 300)]
    chunk_overlap: usize,

    /// Measure chunk sizes in cl100k_base tokens instead of characters.
    #[arg(long)]
    token_sizes: bool,

    /// Completed turns kept in the sliding window.
    #[arg(long, env = "PDF2SCRIPT_WINDOW", default_value_t = 2)]
    window: usize,

    /// Context for the final synthesis request.
    #[arg(long, value_enum, default_value = "window")]
    synthesis_context: SynthesisArg,

    /// What to do when a section fails after all retries.
    #[arg(long, value_enum, default_value = "abort")]
    on_section_failure: FailureArg,

    /// Attempts per LLM call, including the first.
    #[arg(long, env = "PDF2SCRIPT_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Backoff base in milliseconds (waits base·2^attempt).
    #[arg(long, default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// OCR engine for pages without a text layer.
    #[arg(long, value_enum, env = "PDF2SCRIPT_OCR", default_value = "vision")]
    ocr: OcrArg,

    /// Path to the tesseract binary.
    #[arg(long)]
    tesseract_bin: Option<String>,

    /// Tesseract language code(s), e.g. eng or eng+deu.
    #[arg(long)]
    ocr_lang: Option<String>,

    /// Pages read concurrently per document.
    #[arg(short, long, env = "PDF2SCRIPT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2SCRIPT_PASSWORD")]
    password: Option<String>,

    /// Path to a text file replacing the pinned instruction.
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// Keep markers such as "(short pause)" in the script.
    #[arg(long)]
    keep_stage_directions: bool,

    /// Output the JSON result instead of the plain script.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDF2SCRIPT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2SCRIPT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, default_value_t = 90)]
    api_timeout: u64,

    /// Per-page OCR timeout in seconds.
    #[arg(long, default_value_t = 120)]
    ocr_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SynthesisArg {
    Window,
    Full,
    Pinned,
}

impl From<SynthesisArg> for SynthesisContext {
    fn from(v: SynthesisArg) -> Self {
        match v {
            SynthesisArg::Window => SynthesisContext::Window,
            SynthesisArg::Full => SynthesisContext::FullTranscript,
            SynthesisArg::Pinned => SynthesisContext::PinnedOnly,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FailureArg {
    Abort,
    Placeholder,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OcrArg {
    Vision,
    Tesseract,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;
    let pipeline = ScriptPipeline::from_config(config).context("Failed to set up the LLM provider")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = if let Some(ref output_path) = cli.output {
        pipeline
            .generate_to_file(&cli.inputs, output_path)
            .await
            .context("Script generation failed")?
    } else {
        pipeline
            .generate(&cli.inputs)
            .await
            .context("Script generation failed")?
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&*result).context("Failed to serialise result")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(result.script.as_bytes())
            .context("Failed to write to stdout")?;
        if !result.script.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet && !cli.json {
        let stats = &result.stats;
        eprintln!(
            "{}  {} sections  {} pages  {}ms{}",
            if stats.placeholder_turns == 0 { green("✔") } else { cyan("⚠") },
            stats.chunks,
            stats.pages,
            stats.total_duration_ms,
            cli.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out  /  {} retries",
            dim(&stats.input_tokens.to_string()),
            dim(&stats.output_tokens.to_string()),
            dim(&stats.retries.to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `GenerationConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<GenerationConfig> {
    let ocr = match cli.ocr {
        OcrArg::Vision => OcrEngine::Vision,
        OcrArg::Tesseract => OcrEngine::Tesseract {
            binary: cli.tesseract_bin.clone(),
            language: cli.ocr_lang.clone(),
        },
        OcrArg::Off => OcrEngine::Disabled,
    };
    let feed_failure = match cli.on_section_failure {
        FailureArg::Abort => FeedFailurePolicy::Abort,
        FailureArg::Placeholder => FeedFailurePolicy::placeholder(),
    };
    let size_metric = if cli.token_sizes {
        SizeMetric::Tokens
    } else {
        SizeMetric::Chars
    };

    let mut builder = GenerationConfig::builder()
        .content_style(cli.style)
        .duration(cli.duration)
        .chunk_size(cli.chunk_size)
        .chunk_overlap(cli.chunk_overlap)
        .size_metric(size_metric)
        .window_turns(cli.window)
        .synthesis_context(cli.synthesis_context.into())
        .feed_failure(feed_failure)
        .max_attempts(cli.max_attempts)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .ocr(ocr)
        .extraction_concurrency(cli.concurrency)
        .strip_stage_directions(!cli.keep_stage_directions)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout)
        .ocr_timeout_secs(cli.ocr_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
