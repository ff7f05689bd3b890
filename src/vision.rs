//! Remote vision model backends.
//!
//! Defines the [`VisionModel`] trait (image bytes + prompt in, answer text
//! out) and the concrete HTTP backends:
//! - **[`GeminiModel`]**: Google Generative Language `generateContent`.
//! - **[`OpenAIModel`]**: OpenAI chat completions with an inline image.
//! - **[`DisabledModel`]**: never calls out; used when `model.provider = "disabled"`.
//!
//! Backends do not retry. A transport error, a non-success status, or a
//! missing credential is returned as `Err`; a well-formed response that
//! carries no text is `Ok(None)`. The classification gateway turns both into
//! sentinel answers and the resolver owns the retry policy.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// A remote model that answers a text prompt about one image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-3-flash-preview"`).
    fn model_name(&self) -> &str;

    /// Returns `false` when the backend has no credential and every call will fail.
    fn has_credentials(&self) -> bool {
        true
    }

    /// Returns `false` for a backend that never calls out; callers skip it.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Ask the model about `image`. `Ok(None)` means the model returned no text.
    async fn generate(&self, image: &[u8], mime_type: &str, prompt: &str)
        -> Result<Option<String>>;
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl VisionModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn generate(&self, _image: &[u8], _mime: &str, _prompt: &str) -> Result<Option<String>> {
        bail!("Vision model provider is disabled")
    }
}

// ============ Gemini ============

/// Google Gemini via `POST /v1beta/models/{model}:generateContent`.
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: base_url(config, GEMINI_BASE_URL),
            model: config.model.clone(),
            api_key: config.api_key(),
        })
    }
}

#[async_trait]
impl VisionModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<Option<String>> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("Gemini API key missing");
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [
                { "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(image) } },
                { "text": prompt }
            ]}]
        });

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = resp.json().await?;
        Ok(parse_gemini_response(&json))
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &serde_json::Value) -> Option<String> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ============ OpenAI ============

/// OpenAI chat completions with the image sent as a `data:` URL.
pub struct OpenAIModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAIModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            base_url: base_url(config, OPENAI_BASE_URL),
            model: config.model.clone(),
            api_key: config.api_key(),
        })
    }
}

#[async_trait]
impl VisionModel for OpenAIModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<Option<String>> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("OpenAI API key missing");
        };

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url",
                      "image_url": { "url": format!("data:{};base64,{}", mime_type, STANDARD.encode(image)) } }
                ]
            }]
        });

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = resp.json().await?;
        Ok(json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string))
    }
}

// ============ Construction ============

fn build_client(config: &ModelConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn base_url(config: &ModelConfig, default: &str) -> String {
    config
        .endpoint
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Create the [`VisionModel`] selected by `model.provider`.
///
/// A missing API key is not an error here; the backend is built without one
/// and logs a warning, and each call then fails.
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn VisionModel>> {
    let model: Arc<dyn VisionModel> = match config.provider.as_str() {
        "disabled" => Arc::new(DisabledModel),
        "gemini" => Arc::new(GeminiModel::new(config)?),
        "openai" => Arc::new(OpenAIModel::new(config)?),
        other => bail!("Unknown model provider: {}", other),
    };

    if config.is_enabled() && !model.has_credentials() {
        tracing::warn!(
            env = %config.api_key_env,
            "API key missing; every classification will fail"
        );
    }

    Ok(model)
}

/// Guess an image MIME type from its leading bytes. Defaults to `image/png`.
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/png",
    }
}
