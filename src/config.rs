//! TOML configuration for `scout`.
//!
//! Every component receives its slice of [`Config`] through its constructor;
//! nothing below `main` reads process-wide state. All fields carry defaults,
//! so an empty file (or no file at all, see [`load_config_or_default`]) yields
//! a working configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub picklist: PicklistConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub refine: RefineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Base URL override for the provider API.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-3-flash-preview".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Read the credential named by `api_key_env`. Empty values count as missing.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_path")]
    pub path: PathBuf,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            path: default_prompt_path(),
        }
    }
}

fn default_prompt_path() -> PathBuf {
    PathBuf::from("prompts/few_shot.txt")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PicklistConfig {
    #[serde(default = "default_picklist_path")]
    pub path: PathBuf,
}

impl Default for PicklistConfig {
    fn default() -> Self {
        Self {
            path: default_picklist_path(),
        }
    }
}

fn default_picklist_path() -> PathBuf {
    PathBuf::from("data/picklist.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Classification attempts before giving up. `0` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefineConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Check that the refined answer names one of the candidates.
    #[serde(default = "default_validate")]
    pub validate: bool,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            validate: default_validate(),
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.95
}
fn default_validate() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_server_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_attempts: default_server_max_attempts(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_server_max_attempts() -> u32 {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

/// Like [`load_config`], but an absent file falls back to [`Config::default`].
///
/// A file that exists and fails to parse or validate is still an error.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!(
            path = %path.display(),
            "config file not found, using built-in defaults"
        );
        return Ok(Config::default());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if config.watcher.poll_interval_ms == 0 {
        anyhow::bail!("watcher.poll_interval_ms must be > 0");
    }

    let threshold = config.refine.confidence_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        anyhow::bail!("refine.confidence_threshold must be in (0.0, 1.0]");
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        anyhow::bail!("retry.base_delay_ms must be <= retry.max_delay_ms");
    }

    match config.model.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    Ok(())
}
