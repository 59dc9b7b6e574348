//! Text generation backends and the per-note generation client.
//!
//! Defines the [`TextGenerator`] trait and two HTTP implementations:
//! - **[`GeminiGenerator`]**: `POST /v1beta/models/{model}:generateContent`
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions` on any
//!   OpenAI-compatible endpoint
//!
//! [`GenerationClient`] wraps a generator with the note-level contract:
//! render the prompt template from field values, call the backend, and
//! convert the Markdown reply into field HTML.
//!
//! # Provider Selection
//!
//! Use [`create_generator`] to build the configured provider. The API key
//! is read from the environment variable named by
//! [`GenerationConfig::api_key_env`]; a missing key is a configuration
//! error.
//!
//! # Retry Strategy
//!
//! Both providers share [`post_with_retry`]: rate limits, server errors and
//! transport failures are retried with jittered exponential backoff (see
//! [`crate::retry`]); any other client error surfaces on the first attempt.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::GenerationConfig;
use crate::error::AugmentError;
use crate::markup;
use crate::retry::{self, Backoff};
use crate::template::PromptTemplate;

/// A backend that turns a prompt into free-form text.
///
/// Implementations must be safe to share across concurrent calls.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-3-flash-preview"`).
    fn model_name(&self) -> &str;

    /// Generate a reply for `prompt`.
    ///
    /// Fails with [`AugmentError::GenerationService`] once retries are
    /// exhausted or on a non-retryable rejection.
    async fn complete(&self, prompt: &str) -> Result<String, AugmentError>;
}

/// Note-level generation: template in, field HTML out.
#[derive(Clone)]
pub struct GenerationClient {
    generator: Arc<dyn TextGenerator>,
}

impl GenerationClient {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Render `template` with `inputs`, generate, and convert to HTML.
    pub async fn generate(
        &self,
        template: &PromptTemplate,
        inputs: &HashMap<String, String>,
    ) -> Result<String, AugmentError> {
        let prompt = template.render(inputs)?;
        let reply = self.generator.complete(&prompt).await?;
        Ok(markup::markdown_to_html(reply.trim()))
    }
}

// ============ Gemini ============

pub struct GeminiGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    backoff: Backoff,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, AugmentError> {
        let model = config
            .model_name()
            .ok_or_else(|| AugmentError::config("generation.model required"))?;
        Ok(Self {
            client: http_client(config)?,
            model,
            base_url: config.base_url(),
            api_key,
            max_retries: config.max_retries,
            backoff: Backoff::new(config.backoff_base_ms, config.backoff_max_ms),
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, AugmentError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });

        let json = post_with_retry(self.max_retries, &self.backoff, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &Value) -> Result<String, AugmentError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array());

    let text: String = parts
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        let reason = json
            .pointer("/promptFeedback/blockReason")
            .or_else(|| json.pointer("/candidates/0/finishReason"))
            .and_then(|r| r.as_str())
            .unwrap_or("no text in response");
        return Err(AugmentError::GenerationService {
            reason: format!("empty Gemini response ({})", reason),
            attempts: 1,
        });
    }

    Ok(text)
}

// ============ OpenAI-compatible ============

pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    backoff: Backoff,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self, AugmentError> {
        let model = config
            .model_name()
            .ok_or_else(|| AugmentError::config("generation.model required for openai"))?;
        Ok(Self {
            client: http_client(config)?,
            model,
            base_url: config.base_url(),
            api_key,
            max_retries: config.max_retries,
            backoff: Backoff::new(config.backoff_base_ms, config.backoff_max_ms),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, AugmentError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let json = post_with_retry(self.max_retries, &self.backoff, || {
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
        })
        .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| AugmentError::GenerationService {
                reason: "empty chat completion response".to_string(),
                attempts: 1,
            })
    }
}

fn http_client(config: &GenerationConfig) -> Result<reqwest::Client, AugmentError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AugmentError::config(format!("failed to build HTTP client: {}", e)))
}

/// Send a JSON POST, retrying transient failures.
///
/// `request` is called once per attempt because a `RequestBuilder` is
/// consumed by `send`.
pub(crate) async fn post_with_retry<F>(
    max_retries: u32,
    backoff: &Backoff,
    request: F,
) -> Result<Value, AugmentError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = String::from("no attempt made");

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tracing::debug!(attempt, last_error = %last_err, "retrying generation request");
            backoff.sleep(attempt).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    match response.json::<Value>().await {
                        Ok(body) => return Ok(body),
                        // The body can stall after the headers arrive.
                        Err(e) if e.is_timeout() => {
                            last_err = format!("reading response body: {}", e);
                            continue;
                        }
                        Err(e) => {
                            return Err(AugmentError::GenerationService {
                                reason: format!("invalid response body: {}", e),
                                attempts: attempt + 1,
                            });
                        }
                    }
                }

                let body_text = response.text().await.unwrap_or_default();
                if retry::is_transient_status(status) {
                    last_err = format!("HTTP {}: {}", status, body_text);
                    continue;
                }

                return Err(AugmentError::GenerationService {
                    reason: format!("HTTP {}: {}", status, body_text),
                    attempts: attempt + 1,
                });
            }
            Err(e) if retry::is_transient_error(&e) => {
                last_err = e.to_string();
            }
            Err(e) => {
                return Err(AugmentError::GenerationService {
                    reason: e.to_string(),
                    attempts: attempt + 1,
                });
            }
        }
    }

    Err(AugmentError::GenerationService {
        reason: last_err,
        attempts: max_retries + 1,
    })
}

/// Create the configured [`TextGenerator`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"gemini"` | [`GeminiGenerator`] |
/// | `"openai"` | [`OpenAIGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>, AugmentError> {
    let key_var = config.api_key_env();
    let api_key = std::env::var(&key_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| AugmentError::config(format!("{} environment variable not set", key_var)))?;

    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(config, api_key)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config, api_key)?)),
        other => Err(AugmentError::config(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}
