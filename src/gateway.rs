//! Classification gateway.
//!
//! Wraps a [`VisionModel`] with the few-shot classification prompt and a
//! single-slot Session holding the last submitted image, so a follow-up
//! refinement question can be asked about the same picture.
//!
//! # Answer contract
//!
//! [`ClassificationGateway::classify`] and [`ClassificationGateway::refine`]
//! always hand back text. Remote failures become one of the `SENTINEL_*`
//! answers (`{"Error": "..."}`) instead of errors, and successful answers
//! have single quotes rewritten to double quotes because models sometimes
//! emit Python-style dicts. The result is JSON-shaped, not guaranteed JSON.
//!
//! The only error the gateway returns is [`GatewayError::NoSession`]: asking
//! for a refinement before any image was classified. Retrying cannot fix it.

use std::path::Path;
use std::sync::Arc;

use crate::vision::{sniff_mime_type, VisionModel};

pub const SENTINEL_MISSING_KEY: &str = r#"{"Error": "API Key missing"}"#;
pub const SENTINEL_NO_TEXT: &str = r#"{"Error": "Model Failed to run correctly"}"#;
pub const SENTINEL_ANALYSIS_FAILED: &str = r#"{"Error": "Exception during analysis"}"#;
pub const SENTINEL_REFINE_FAILED: &str = r#"{"Error": "Exception during refinement"}"#;
pub const SENTINEL_DISABLED: &str = r#"{"Error": "Model provider disabled"}"#;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("refine called before any image was classified")]
    NoSession,
}

/// `true` when the answer carries an error marker.
pub fn is_error(answer: &str) -> bool {
    answer.contains("Error")
}

/// `true` for the retryable failure shape: both an error and an exception marker.
pub fn is_transient_failure(answer: &str) -> bool {
    answer.contains("Error") && answer.contains("Exception")
}

/// Rewrite single quotes to double quotes.
pub fn normalize_quotes(answer: &str) -> String {
    answer.replace('\'', "\"")
}

/// Read the classification prompt. Failures log a warning and yield `""`.
pub fn load_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(prompt) => prompt,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "prompt could not be loaded");
            String::new()
        }
    }
}

/// The last image submitted for classification.
#[derive(Debug, Clone)]
struct Session {
    image: Vec<u8>,
    mime_type: &'static str,
}

pub struct ClassificationGateway {
    model: Arc<dyn VisionModel>,
    prompt: String,
    session: Option<Session>,
}

impl ClassificationGateway {
    pub fn new(model: Arc<dyn VisionModel>, prompt: impl Into<String>) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            session: None,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn clear_session(&mut self) {
        self.session = None;
    }

    /// Classify `image` with the few-shot prompt.
    ///
    /// The image replaces the Session before the remote call, so a later
    /// [`refine`](Self::refine) refers to it even when this call failed.
    pub async fn classify(&mut self, image: &[u8]) -> String {
        let session = Session {
            image: image.to_vec(),
            mime_type: sniff_mime_type(image),
        };
        self.session = Some(session);

        if !self.model.has_credentials() {
            return SENTINEL_MISSING_KEY.to_string();
        }

        self.ask(&self.prompt, SENTINEL_ANALYSIS_FAILED).await
    }

    /// Ask a narrower question about the image from the last [`classify`](Self::classify).
    pub async fn refine(&self, prompt: &str) -> Result<String, GatewayError> {
        if self.session.is_none() {
            return Err(GatewayError::NoSession);
        }
        Ok(self.ask(prompt, SENTINEL_REFINE_FAILED).await)
    }

    async fn ask(&self, prompt: &str, on_failure: &str) -> String {
        let Some(session) = self.session.as_ref() else {
            return on_failure.to_string();
        };
        if !self.model.is_enabled() {
            return SENTINEL_DISABLED.to_string();
        }

        match self
            .model
            .generate(&session.image, session.mime_type, prompt)
            .await
        {
            Ok(Some(text)) if !text.is_empty() => normalize_quotes(&text),
            Ok(_) => SENTINEL_NO_TEXT.to_string(),
            Err(e) => {
                tracing::warn!(model = %self.model.model_name(), error = %e, "vision model call failed");
                on_failure.to_string()
            }
        }
    }
}
