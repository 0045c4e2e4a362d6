//! CLI binary for edgequake-pdf2report.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints where the report landed.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2report::{
    generate_report, Architecture, PerspectiveSource, PipelineConfig, PipelineProgressCallback,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

/// Terminal progress callback: a spinner while a stage runs, switching to a
/// page bar for the stages that walk pages one by one.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times, keyed by page number.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Pages that fell back after a model failure.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS)
    }

    /// Switch to the page bar once a stage announces its page count.
    fn activate_bar(&self, stage: &str, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(title(stage));
        self.bar.reset_eta();
    }

    fn elapsed(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn title(stage: &str) -> String {
    let mut chars = stage.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: &str) {
        // Length 0 makes the next page event switch to a fresh bar.
        self.bar.set_style(Self::spinner_style());
        self.bar.set_length(0);
        self.bar.set_position(0);
        self.bar.set_prefix(title(stage));
        self.bar.set_message("working…");
        self.bar
            .println(format!("{} {}", cyan("◆"), bold(&title(stage))));
    }

    fn on_stage_skipped(&self, stage: &str) {
        self.bar
            .println(format!("{} {}", dim("◇"), dim(&format!("{} skipped", title(stage)))));
    }

    fn on_page_start(&self, stage: &str, page_num: usize, total_pages: usize) {
        if self.bar.length() != Some(total_pages as u64) {
            self.activate_bar(stage, total_pages);
        }
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, _stage: &str, page_num: usize, total_pages: usize, detail: &str) {
        let secs = self.elapsed(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<24}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(detail),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, _stage: &str, page_num: usize, total_pages: usize, error: &str) {
        let secs = self.elapsed(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_pipeline_complete(&self, word_count: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        if errors == 0 {
            eprintln!("{} report written ({} words)", green("✔"), bold(&word_count.to_string()));
        } else {
            eprintln!(
                "{} report written ({} words, {} pages fell back)",
                cyan("⚠"),
                bold(&word_count.to_string()),
                red(&errors.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Default synthesis report from ./input into ./output/report.txt
  pdf2report

  # Another folder, tighter word limit
  pdf2report --input-dir incidents/ --output-dir out/ --max-words 800

  # Custom report shape and extraction format
  pdf2report --preferences prefs.txt --format format.txt

  # Incremental document with a per-section rewrite
  pdf2report --architecture legacy --perspective-sections perspective.yaml

  # Resume an interrupted legacy run from its checkpoint
  pdf2report --architecture legacy --resume

  # Cheap vision model for pages, stronger model for synthesis
  pdf2report --vision-model gpt-4.1-nano --text-model gpt-4.1

ARCHITECTURES:
  synthesis (default)  extract every page, then one bounded synthesis call → report.txt
  legacy               route each page ADD/UPDATE/SKIP into a live document,
                       compress when near the word limit, optional perspective → report.md

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding an existing libpdfium
  PDF2REPORT_*            Any flag below, e.g. PDF2REPORT_MAX_WORDS=1000

SETUP:
  1. Set API key:     export OPENAI_API_KEY=sk-...
  2. Drop PDFs into:  ./input
  3. Run:             pdf2report
"#;

/// Synthesize a bounded report from a folder of PDFs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2report",
    version,
    about = "Synthesize a bounded report from a folder of PDFs using Vision LLMs",
    long_about = "Rasterise every page of every PDF in a folder, extract structured content \
with a Vision Language Model, and synthesize a natural-language report that stays within a \
word limit while keeping key dates and names. Supports OpenAI, Anthropic, Google Gemini, \
Azure OpenAI, and any OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Folder scanned for *.pdf files.
    #[arg(short, long, env = "PDF2REPORT_INPUT_DIR", default_value = "input")]
    input_dir: PathBuf,

    /// Folder receiving the report, checkpoint and debug dumps.
    #[arg(short, long, env = "PDF2REPORT_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Extraction format guide (plain text).
    #[arg(long, env = "PDF2REPORT_FORMAT")]
    format: Option<PathBuf>,

    /// Report preferences text used by the synthesis prompt.
    #[arg(long, env = "PDF2REPORT_PREFERENCES")]
    preferences: Option<PathBuf>,

    /// Free-text perspective applied to the whole document (legacy only).
    #[arg(long, env = "PDF2REPORT_PERSPECTIVE", conflicts_with = "perspective_sections")]
    perspective: Option<PathBuf>,

    /// YAML file with per-section rewrite goals (legacy only).
    #[arg(long, env = "PDF2REPORT_PERSPECTIVE_SECTIONS")]
    perspective_sections: Option<PathBuf>,

    /// Upper bound on report length, in words.
    #[arg(long, env = "PDF2REPORT_MAX_WORDS", default_value_t = 1500)]
    max_words: usize,

    /// How extractions become a report.
    #[arg(long, env = "PDF2REPORT_ARCHITECTURE", value_enum, default_value = "synthesis")]
    architecture: ArchitectureArg,

    /// LLM model ID used for every call unless overridden below.
    #[arg(long, env = "EDGEQUAKE_MODEL", default_value = "gpt-4.1-nano")]
    model: String,

    /// Model for per-page vision extraction.
    #[arg(long, env = "PDF2REPORT_VISION_MODEL")]
    vision_model: Option<String>,

    /// Model for text calls (routing, compression, synthesis).
    #[arg(long, env = "PDF2REPORT_TEXT_MODEL")]
    text_model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2REPORT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2REPORT_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2REPORT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per LLM call on transport failure.
    #[arg(long, env = "PDF2REPORT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Fraction of max-words at which the legacy document is compressed.
    #[arg(long, env = "PDF2REPORT_COMPRESSION_THRESHOLD", default_value_t = 0.85)]
    compression_threshold: f64,

    /// Continue from the checkpoint in the output folder.
    #[arg(long, env = "PDF2REPORT_RESUME")]
    resume: bool,

    /// Dump each page extraction as JSON next to the report.
    #[arg(long, env = "PDF2REPORT_DEBUG")]
    debug: bool,

    /// Year assumed for dates that omit one.
    #[arg(long, env = "PDF2REPORT_YEAR")]
    year: Option<i32>,

    /// Disable progress bar.
    #[arg(long, env = "PDF2REPORT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2REPORT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2REPORT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ArchitectureArg {
    Synthesis,
    Legacy,
}

impl From<ArchitectureArg> for Architecture {
    fn from(v: ArchitectureArg) -> Self {
        match v {
            ArchitectureArg::Synthesis => Architecture::Synthesis,
            ArchitectureArg::Legacy => Architecture::Legacy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the user-facing feedback, so library INFO
    // logs are hidden while it is active.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
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
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    // An interrupt abandons the run; the checkpoint written after each
    // page is what `--resume` picks up.
    let output = tokio::select! {
        result = generate_report(config) => result.context("Report generation failed")?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{} interrupted; rerun with --resume to continue", red("✘"));
            std::process::exit(130);
        }
    };

    if !cli.quiet {
        eprintln!(
            "{}  {} words from {} pages  →  {}",
            green("✔"),
            output.word_count,
            output.pages,
            bold(&output.path.display().to_string()),
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .input_dir(&cli.input_dir)
        .output_dir(&cli.output_dir)
        .max_words(cli.max_words)
        .architecture(cli.architecture.clone().into())
        .model(&cli.model)
        .dpi(cli.dpi)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .compression_threshold(cli.compression_threshold)
        .resume(cli.resume)
        .debug(cli.debug);

    if let Some(ref path) = cli.format {
        builder = builder.format_spec_path(path);
    }
    if let Some(ref path) = cli.preferences {
        builder = builder.preferences_path(path);
    }
    if let Some(ref path) = cli.perspective {
        builder = builder.perspective(PerspectiveSource::Global(path.clone()));
    }
    if let Some(ref path) = cli.perspective_sections {
        builder = builder.perspective(PerspectiveSource::Sections(path.clone()));
    }
    if let Some(ref model) = cli.vision_model {
        builder = builder.vision_model(model);
    }
    if let Some(ref model) = cli.text_model {
        builder = builder.text_model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(year) = cli.year {
        builder = builder.document_year(year);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
