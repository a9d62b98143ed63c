use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{drain_sse_data, GenerationTask, ProviderAdapter, ProviderKey, StreamChunk};
use crate::error::LlmError;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(api_key: &str, model: &str) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "OpenAI API key cannot be empty".into(),
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

    /// Override the API endpoint (local gateways, tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, task: &GenerationTask, stream: bool) -> ChatRequest {
        let mut messages = Vec::new();
        if !task.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: task.system_prompt.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: task.user_prompt.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: task.options.max_tokens,
            temperature: task.options.temperature,
            response_format: task.options.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream,
        }
    }

    async fn send(&self, task: &GenerationTask, stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = self.build_request(task, stream);
        debug!(model = %self.model, stream, "sending OpenAI request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(ProviderKey::OpenAi, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "OpenAI API error: {text}");
            return Err(LlmError::from_status(ProviderKey::OpenAi, status.as_u16(), text));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::OpenAi
    }

    async fn complete(&self, task: &GenerationTask) -> Result<String, LlmError> {
        let response = self.send(task, false).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(ProviderKey::OpenAi, e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::CallFailed {
                provider: ProviderKey::OpenAi,
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
                            .send(Err(LlmError::from_reqwest(ProviderKey::OpenAi, e)))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                for payload in drain_sse_data(&mut buffer) {
                    if payload == "[DONE]" {
                        return;
                    }
                    if let Ok(event) = serde_json::from_str::<StreamResponse>(&payload) {
                        if let Some(text) = event
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content)
                        {
                            if tx.send(Ok(text)).await.is_err() {
                                // Receiver dropped: caller cancelled.
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
