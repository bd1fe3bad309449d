use std::sync::OnceLock;
use std::time::Duration;

use log::{debug, trace};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[cfg(feature = "local")]
pub mod local;
pub mod ollama;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Every way a structured-generation call can fail. All of these are
/// recoverable: callers substitute a fallback node or message.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("model '{0}' is not known to the backend")]
    ModelNotFound(String),

    #[error("backend reply is not valid JSON: {0}")]
    MalformedResponse(String),

    #[error("backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Chat message helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

impl std::fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.role, self.content)
    }
}

// ---------------------------------------------------------------------------
// Backend configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.1";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the Ollama server.
    pub base_url: String,
    /// Model name, or a `.gguf` path for the in-process backend.
    pub model: String,
    /// Upper bound on a single generation call.
    pub timeout: Duration,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.into(),
            model: DEFAULT_MODEL.into(),
            timeout: Duration::from_secs(120),
            temperature: 0.8,
        }
    }
}

// ---------------------------------------------------------------------------
// Generator seam
// ---------------------------------------------------------------------------

/// One schema-constrained generation request per call. Implementations
/// return a JSON value that is expected (not guaranteed) to match `schema`;
/// shape checks beyond "is JSON" belong to the caller.
pub trait Generator {
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<Value, GenerationError>;

    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

fn think_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"))
}

/// Parse a raw model reply into JSON. Reasoning blocks are dropped first;
/// if the remainder is not JSON, one retry is made with markdown code
/// fences removed.
pub fn parse_structured(raw: &str) -> Result<Value, GenerationError> {
    for cap in think_block().captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }
    let cleaned = think_block().replace_all(raw, "");
    let cleaned = cleaned.trim();

    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(first) => {
            trace!("Direct JSON parse failed ({first}), stripping code fences");
            let unfenced = strip_fences(cleaned);
            serde_json::from_str(unfenced).map_err(|e| {
                GenerationError::MalformedResponse(format!("{e}; raw output:\n{raw}"))
            })
        }
    }
}

fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop an optional language tag such as ```json
        body = match rest.find('\n') {
            Some(idx) if !rest[..idx].trim_start().starts_with(['{', '[']) => &rest[idx + 1..],
            _ => rest,
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}
