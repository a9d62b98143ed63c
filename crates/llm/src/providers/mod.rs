use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::LlmError;

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Identity of an upstream AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKey {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::OpenAi => "openai",
            ProviderKey::Anthropic => "anthropic",
            ProviderKey::Gemini => "gemini",
        }
    }

    /// Registry order when nothing else breaks a tie.
    pub const ALL: [ProviderKey; 3] = [
        ProviderKey::OpenAi,
        ProviderKey::Anthropic,
        ProviderKey::Gemini,
    ];
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an adapter can do for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Complete,
    Stream,
}

/// Static description of one provider, built once from configuration
/// at process start and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub key: ProviderKey,
    pub enabled: bool,
    /// `None` means "no credential configured"; such a provider is
    /// never selected even when enabled.
    pub api_key: Option<String>,
    pub text_model: String,
    pub image_model: Option<String>,
}

impl ProviderSettings {
    pub fn new(key: ProviderKey, text_model: &str) -> Self {
        Self {
            key,
            enabled: true,
            api_key: None,
            text_model: text_model.to_string(),
            image_model: None,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn credential_present(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Configuration bag recognized by every adapter. Part of the cache
/// fingerprint, so every field participates in request identity.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub json_mode: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Per-call budget for the timeout race; falls back to the
    /// configured default when unset.
    pub timeout: Option<Duration>,
    pub preferred_provider: Option<ProviderKey>,
    pub enable_cache: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            json_mode: false,
            max_tokens: None,
            temperature: None,
            timeout: None,
            preferred_provider: None,
            enable_cache: false,
        }
    }
}

impl GenerationOptions {
    pub fn json_mode(mut self, on: bool) -> Self {
        self.json_mode = on;
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn preferred_provider(mut self, key: ProviderKey) -> Self {
        self.preferred_provider = Some(key);
        self
    }

    pub fn enable_cache(mut self, on: bool) -> Self {
        self.enable_cache = on;
        self
    }
}

/// The unit of work submitted to the orchestrator. Constructed per
/// call, discarded after completion.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationTask {
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: GenerationOptions,
}

impl GenerationTask {
    pub fn new(system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Deterministic cache key over the full request content: prompts
    /// plus the entire options bag. Two calls differing in any single
    /// option never collide.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Incremental output from a streaming call. The channel closes after
/// the final chunk on success; an `Err` chunk terminates the stream.
pub type StreamChunk = Result<String, LlmError>;

/// Uniform interface over upstream AI services.
///
/// Implementations translate the generic options into the provider's
/// native request shape and must surface every HTTP/auth/rate-limit
/// failure as [`LlmError`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn key(&self) -> ProviderKey;

    fn supports(&self, capability: Capability) -> bool {
        let _ = capability;
        true
    }

    /// Single-shot completion.
    async fn complete(&self, task: &GenerationTask) -> Result<String, LlmError>;

    /// Streaming completion. The default falls back to `complete` and
    /// delivers the whole response as one chunk.
    async fn stream(&self, task: &GenerationTask) -> Result<mpsc::Receiver<StreamChunk>, LlmError> {
        let text = self.complete(task).await?;
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tx.send(Ok(text)).await;
        });
        Ok(rx)
    }
}

/// Drain complete SSE lines out of `buffer`, returning the payload of
/// each `data:` line. Incomplete trailing lines stay buffered.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim();
            if !payload.is_empty() {
                events.push(payload.to_string());
            }
        }
    }
    events
}
