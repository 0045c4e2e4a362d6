//! Configuration types for PDF-to-report synthesis.
//!
//! Every pipeline knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One struct makes it easy to share a config
//! across stages, log it, and diff two runs.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::budget::TokenBudget;
use crate::error::ReportError;
use crate::llm::ChatClient;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default word budget of the final report.
pub const DEFAULT_MAX_WORDS: usize = 1500;

/// Default model for both vision and text calls.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Default fraction of `max_words` that triggers compression.
pub const DEFAULT_COMPRESSION_THRESHOLD: f64 = 0.85;

/// Configuration for a report run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2report::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("pdfs")
///     .output_dir("out")
///     .max_words(1200)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory scanned for `*.pdf` files.
    pub input_dir: PathBuf,

    /// Directory receiving the report, checkpoint and debug artefacts.
    pub output_dir: PathBuf,

    /// Optional `format.md` (title, word budget, section headers).
    pub format_spec_path: Option<PathBuf>,

    /// Optional free-text preferences injected into the synthesis prompt.
    pub preferences_path: Option<PathBuf>,

    /// Optional perspective rewrite input (legacy path only).
    pub perspective: Option<PerspectiveSource>,

    /// Word budget of the final report. Default: 1500.
    ///
    /// A `max_words` line in `format.md` overrides this.
    pub max_words: usize,

    /// Which consumer builds the report. Default: [`Architecture::Synthesis`].
    pub architecture: Architecture,

    /// Default model for every call. Default: `gpt-4.1-nano`.
    pub model: String,

    /// Model for the per-page vision calls; falls back to `model`.
    pub vision_model: Option<String>,

    /// Model for text-only calls; falls back to `model`.
    pub text_model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed chat client. Takes precedence over every provider
    /// setting; used by tests and by callers that wrap their own backend.
    pub client: Option<Arc<dyn ChatClient>>,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Longest rendered edge in pixels. Default: 2000.
    ///
    /// Caps memory on oversized pages independently of DPI.
    pub max_rendered_pixels: u32,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction and synthesis both want faithful, repeatable answers.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a transient provider failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Fraction of `max_words` above which the legacy path compresses.
    /// Default: 0.85.
    pub compression_threshold: f64,

    /// Consolidation tuning.
    pub compression: CompressionConfig,

    /// Prompt token budget.
    pub token_budget: TokenBudget,

    /// Restore state from `checkpoint.json` before running. Default: false.
    pub resume: bool,

    /// Write per-page extraction JSON under `extractions/`. Default: false.
    pub debug: bool,

    /// Year used when a date carries none; defaults to the current year.
    pub document_year: Option<i32>,

    /// Optional progress callback for stage and page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            format_spec_path: None,
            preferences_path: None,
            perspective: None,
            max_words: DEFAULT_MAX_WORDS,
            architecture: Architecture::default(),
            model: DEFAULT_MODEL.to_string(),
            vision_model: None,
            text_model: None,
            provider_name: None,
            provider: None,
            client: None,
            dpi: 150,
            max_rendered_pixels: 2000,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression: CompressionConfig::default(),
            token_budget: TokenBudget::default(),
            resume: false,
            debug: false,
            document_year: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("input_dir", &self.input_dir)
            .field("output_dir", &self.output_dir)
            .field("format_spec_path", &self.format_spec_path)
            .field("preferences_path", &self.preferences_path)
            .field("perspective", &self.perspective)
            .field("max_words", &self.max_words)
            .field("architecture", &self.architecture)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .field("text_model", &self.text_model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("client", &self.client.as_ref().map(|_| "<dyn ChatClient>"))
            .field("dpi", &self.dpi)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("compression_threshold", &self.compression_threshold)
            .field("compression", &self.compression)
            .field("token_budget", &self.token_budget)
            .field("resume", &self.resume)
            .field("debug", &self.debug)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Model used for the per-page vision calls.
    pub fn vision_model(&self) -> &str {
        self.vision_model.as_deref().unwrap_or(&self.model)
    }

    /// Model used for text-only calls.
    pub fn text_model(&self) -> &str {
        self.text_model.as_deref().unwrap_or(&self.model)
    }

    /// Path of the checkpoint file inside `output_dir`.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(crate::checkpoint::CHECKPOINT_FILE)
    }

    /// Directory receiving debug extraction dumps.
    pub fn extraction_dir(&self) -> PathBuf {
        self.output_dir.join("extractions")
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineConfigBuilder {
    pub fn input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.input_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn format_spec_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.format_spec_path = Some(path.into());
        self
    }

    pub fn preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.preferences_path = Some(path.into());
        self
    }

    pub fn perspective(mut self, source: PerspectiveSource) -> Self {
        self.config.perspective = Some(source);
        self
    }

    pub fn max_words(mut self, n: usize) -> Self {
        self.config.max_words = n;
        self
    }

    pub fn architecture(mut self, arch: Architecture) -> Self {
        self.config.architecture = arch;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn text_model(mut self, model: impl Into<String>) -> Self {
        self.config.text_model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn client(mut self, client: Arc<dyn ChatClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn compression_threshold(mut self, threshold: f64) -> Self {
        self.config.compression_threshold = threshold;
        self
    }

    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.config.compression = compression;
        self
    }

    pub fn token_budget(mut self, budget: TokenBudget) -> Self {
        self.config.token_budget = budget;
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn debug(mut self, v: bool) -> Self {
        self.config.debug = v;
        self
    }

    pub fn document_year(mut self, year: i32) -> Self {
        self.config.document_year = Some(year);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ReportError> {
        let c = &self.config;
        if c.max_words == 0 {
            return Err(ReportError::InvalidConfig(
                "max_words must be ≥ 1".into(),
            ));
        }
        if !(c.compression_threshold > 0.0 && c.compression_threshold <= 1.0) {
            return Err(ReportError::InvalidConfig(format!(
                "compression_threshold must be in (0, 1], got {}",
                c.compression_threshold
            )));
        }
        if c.token_budget.chars_per_token == 0 {
            return Err(ReportError::InvalidConfig(
                "chars_per_token must be ≥ 1".into(),
            ));
        }
        if c.token_budget.content > c.token_budget.total {
            return Err(ReportError::InvalidConfig(format!(
                "content budget ({}) exceeds total budget ({})",
                c.token_budget.content, c.token_budget.total
            )));
        }
        if c.compression.group_cap < 2 {
            return Err(ReportError::InvalidConfig(
                "compression group_cap must be ≥ 2".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(ReportError::InvalidConfig("model must not be empty".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which consumer turns page extractions into the report.
///
/// | Architecture | Stages after extract | Output |
/// |--------------|----------------------|--------|
/// | `Synthesis`  | finalize | `report.txt` |
/// | `Legacy`     | integrate → compress → perspective | `report.md` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// One bounded synthesis prompt over every extraction. (default)
    #[default]
    Synthesis,
    /// Page-by-page ADD/UPDATE/SKIP routing with inline compression.
    Legacy,
}

/// Where the perspective rewrite gets its guidance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerspectiveSource {
    /// A free-text guide applied to the whole document in one call.
    Global(PathBuf),
    /// A YAML file with per-section goals.
    Sections(PathBuf),
}

impl PerspectiveSource {
    pub fn path(&self) -> &std::path::Path {
        match self {
            PerspectiveSource::Global(p) | PerspectiveSource::Sections(p) => p,
        }
    }
}

/// Tuning for the consolidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Shortest acceptable merged item, in words. Default: 8.
    pub min_words_per_item: usize,
    /// Token ceiling for one merge prompt. Default: 1500.
    pub max_prompt_tokens: usize,
    /// Most items merged in one group. Default: 5.
    pub group_cap: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_words_per_item: 8,
            max_prompt_tokens: 1500,
            group_cap: 5,
        }
    }
}
