use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{drain_sse_data, GenerationTask, ProviderAdapter, ProviderKey, StreamChunk};
use crate::error::LlmError;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for the Anthropic messages API.
///
/// `json_mode` has no native switch here; the section pipeline enforces
/// JSON output at the prompt level instead.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicAdapter {
    pub fn new(api_key: &str, model: &str) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "Anthropic API key cannot be empty".into(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::InvalidRequest {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client,
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, task: &GenerationTask, stream: bool) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: task.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: (!task.system_prompt.is_empty()).then(|| task.system_prompt.clone()),
            messages: vec![Message {
                role: "user",
                content: task.user_prompt.clone(),
            }],
            temperature: task.options.temperature,
            stream,
        }
    }

    async fn send(&self, task: &GenerationTask, stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = self.build_request(task, stream);
        debug!(model = %self.model, stream, "sending Anthropic request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(ProviderKey::Anthropic, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Anthropic API error: {text}");
            return Err(LlmError::from_status(
                ProviderKey::Anthropic,
                status.as_u16(),
                text,
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Anthropic
    }

    async fn complete(&self, task: &GenerationTask) -> Result<String, LlmError> {
        let response = self.send(task, false).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(ProviderKey::Anthropic, e))?;

        parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| LlmError::CallFailed {
                provider: ProviderKey::Anthropic,
                message: "empty response".into(),
                status: None,
                retryable: true,
            })
    }

    async fn stream(&self, task: &GenerationTask) -> Result<mpsc::Receiver<StreamChunk>, LlmError> {
        let response = self.send(task, true).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::from_reqwest(ProviderKey::Anthropic, e)))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                for payload in drain_sse_data(&mut buffer) {
                    let Ok(event) = serde_json::from_str::<StreamEvent>(&payload) else {
                        continue;
                    };
                    match event.kind.as_str() {
                        "content_block_delta" => {
                            if let Some(text) = event.delta.and_then(|d| d.text) {
                                if tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        "message_stop" => return,
                        _ => {}
                    }
                }
            }
        });

        Ok(rx)
    }
}
