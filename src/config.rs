use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub augment: AugmentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    32_000
}

impl GenerationConfig {
    /// Model name, falling back to the provider default.
    pub fn model_name(&self) -> Option<String> {
        match (&self.model, self.provider.as_str()) {
            (Some(model), _) => Some(model.clone()),
            (None, "gemini") => Some("gemini-3-flash-preview".to_string()),
            (None, _) => None,
        }
    }

    pub fn base_url(&self) -> String {
        let url = match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url.clone(),
            (None, "openai") => "https://api.openai.com".to_string(),
            (None, _) => "https://generativelanguage.googleapis.com".to_string(),
        };
        url.trim_end_matches('/').to_string()
    }

    /// Environment variable holding the API key.
    pub fn api_key_env(&self) -> String {
        match (&self.api_key_env, self.provider.as_str()) {
            (Some(var), _) => var.clone(),
            (None, "openai") => "OPENAI_API_KEY".to_string(),
            (None, _) => "GEMINI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_url")]
    pub url: String,
    #[serde(default = "default_remote_version")]
    pub version: u32,
    #[serde(default = "default_remote_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_remote_max_retries")]
    pub max_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            version: default_remote_version(),
            batch_size: default_remote_batch_size(),
            timeout_secs: default_remote_timeout_secs(),
            max_retries: default_remote_max_retries(),
        }
    }
}

fn default_remote_url() -> String {
    "http://localhost:8765".to_string()
}
fn default_remote_version() -> u32 {
    6
}
fn default_remote_batch_size() -> usize {
    500
}
fn default_remote_timeout_secs() -> u64 {
    30
}
fn default_remote_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct AugmentConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    15
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.generation.provider.as_str() {
        "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be gemini or openai.",
            other
        ),
    }

    if config.generation.model_name().is_none() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }

    if config.generation.backoff_base_ms > config.generation.backoff_max_ms {
        anyhow::bail!("generation.backoff_base_ms must not exceed generation.backoff_max_ms");
    }

    if config.remote.batch_size == 0 {
        anyhow::bail!("remote.batch_size must be > 0");
    }

    if config.augment.concurrency == 0 {
        anyhow::bail!("augment.concurrency must be >= 1");
    }

    Ok(())
}
