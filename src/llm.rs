//! The oracle boundary: one `chat` capability and the provider adapter
//! behind it.
//!
//! Every stage talks to the model through [`ChatClient`]. The core never
//! names a backend; [`ProviderChat`] adapts any `edgequake-llm` provider,
//! and tests inject a scripted client instead.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) spaces the retries: with a 500 ms base
//! and 3 retries the wait sequence is 500 ms → 1 s → 2 s.
//!
//! ## JSON mode
//!
//! Providers differ in how (and whether) they enforce JSON output, so JSON
//! mode is expressed as a system instruction plus recovery of the first
//! JSON object from whatever the model actually wrote. Callers always get
//! either a parseable JSON document or [`LlmError::MalformedJson`].

use crate::config::PipelineConfig;
use crate::error::{LlmError, ReportError};
use crate::pipeline::postprocess::extract_json;
use crate::prompts::JSON_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// A fallible, non-deterministic prompt → text oracle.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send one prompt (plus optional page images) and return the answer.
    ///
    /// With `json_mode` set, the returned text parses as JSON.
    async fn chat(
        &self,
        prompt: &str,
        images: &[ImageData],
        json_mode: bool,
    ) -> Result<String, LlmError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str {
        "unknown"
    }
}

/// [`ChatClient`] over an `edgequake-llm` provider.
pub struct ProviderChat {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl fmt::Debug for ProviderChat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderChat")
            .field("provider", &"<dyn LLMProvider>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ProviderChat {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

/// Build `CompletionOptions` from the sampling settings.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl ChatClient for ProviderChat {
    async fn chat(
        &self,
        prompt: &str,
        images: &[ImageData],
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::with_capacity(2);
        if json_mode {
            messages.push(ChatMessage::system(JSON_SYSTEM_PROMPT));
        }
        messages.push(ChatMessage::user_with_images(prompt, images.to_vec()));

        let options = build_options(self.temperature, self.max_tokens);
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "LLM retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        self.model, response.prompt_tokens, response.completion_tokens
                    );
                    return finish_response(&response.content, json_mode);
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("LLM attempt {} failed: {}", attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(LlmError::Request {
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Validate a raw answer: reject blanks, and in JSON mode return the
/// recovered JSON document.
pub fn finish_response(content: &str, json_mode: bool) -> Result<String, LlmError> {
    if content.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    if !json_mode {
        return Ok(content.to_string());
    }
    extract_json(content)
        .map(|value| value.to_string())
        .ok_or_else(|| {
            let head: String = content.chars().take(80).collect();
            LlmError::MalformedJson(format!("no JSON object in response: {head}"))
        })
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ReportError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ReportError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider for `model`, from most-specific to
/// least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider** (`config.provider_name`) with `model`.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key** (`OPENAI_API_KEY`) with `model`.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(
    config: &PipelineConfig,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ReportError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ReportError::ProviderNotConfigured {
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

/// The text and vision clients for a run.
#[derive(Clone)]
pub struct Clients {
    pub text: Arc<dyn ChatClient>,
    pub vision: Arc<dyn ChatClient>,
}

impl fmt::Debug for Clients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clients")
            .field("text", &self.text.model())
            .field("vision", &self.vision.model())
            .finish()
    }
}

impl Clients {
    /// One client for every call.
    pub fn shared(client: Arc<dyn ChatClient>) -> Self {
        Self {
            text: Arc::clone(&client),
            vision: client,
        }
    }

    /// Build clients from the config; one client is shared when the vision
    /// and text models are the same.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ReportError> {
        if let Some(ref client) = config.client {
            return Ok(Self::shared(Arc::clone(client)));
        }

        let text_model = config.text_model();
        let vision_model = config.vision_model();

        let text: Arc<dyn ChatClient> = Arc::new(ProviderChat::new(
            resolve_provider(config, text_model)?,
            text_model,
            config,
        ));

        if vision_model == text_model {
            info!("Using model: {}", text_model);
            return Ok(Self::shared(text));
        }

        info!("Using dual models: vision={}, text={}", vision_model, text_model);
        let vision: Arc<dyn ChatClient> = Arc::new(ProviderChat::new(
            resolve_provider(config, vision_model)?,
            vision_model,
            config,
        ));
        Ok(Self { text, vision })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory client for stage tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Pops one canned answer per call; an exhausted script fails the call.
    #[derive(Default)]
    pub struct ScriptedClient {
        answers: Mutex<VecDeque<Result<String, LlmError>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub fn new<I, S>(answers: I) -> Arc<Self>
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Arc::new(Self {
                answers: Mutex::new(answers.into_iter().map(|a| Ok(a.into())).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn push(&self, answer: Result<String, LlmError>) {
            self.answers.lock().unwrap().push_back(answer);
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn chat(
            &self,
            prompt: &str,
            _images: &[ImageData],
            json_mode: bool,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self.answers.lock().unwrap().pop_front();
            match next {
                Some(Ok(text)) => finish_response(&text, json_mode),
                Some(Err(e)) => Err(e),
                None => Err(LlmError::Request {
                    retries: 0,
                    detail: "script exhausted".into(),
                }),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }
}
