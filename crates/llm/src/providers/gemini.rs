use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{drain_sse_data, GenerationTask, ProviderAdapter, ProviderKey, StreamChunk};
use crate::error::LlmError;

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Google Gemini generateContent API.
#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    api_key: String,
    model: String,
    endpoint: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

impl GeminiAdapter {
    pub fn new(api_key: &str, model: &str) -> Result<Self, LlmError> {
        if api_key.is_empty() {
            return Err(LlmError::InvalidRequest {
                message: "Gemini API key cannot be empty".into(),
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

    fn build_request(&self, task: &GenerationTask) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: task.user_prompt.clone(),
                }],
            }],
            system_instruction: (!task.system_prompt.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: task.system_prompt.clone(),
                }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: task.options.max_tokens,
                temperature: task.options.temperature,
                response_mime_type: task.options.json_mode.then_some("application/json"),
            },
        }
    }

    async fn send(&self, task: &GenerationTask, method: &str, query: &str) -> Result<reqwest::Response, LlmError> {
        let body = self.build_request(task);
        debug!(model = %self.model, method, "sending Gemini request");

        let response = self
            .client
            .post(format!(
                "{}/models/{}:{}?key={}{}",
                self.endpoint, self.model, method, self.api_key, query
            ))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(ProviderKey::Gemini, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Gemini API error: {text}");
            return Err(LlmError::from_status(ProviderKey::Gemini, status.as_u16(), text));
        }
        Ok(response)
    }

    fn first_text(parsed: GenerateResponse) -> Option<String> {
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Gemini
    }

    async fn complete(&self, task: &GenerationTask) -> Result<String, LlmError> {
        let response = self.send(task, "generateContent", "").await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(ProviderKey::Gemini, e))?;

        Self::first_text(parsed).ok_or_else(|| LlmError::CallFailed {
            provider: ProviderKey::Gemini,
            message: "empty response".into(),
            status: None,
            retryable: true,
        })
    }

    async fn stream(&self, task: &GenerationTask) -> Result<mpsc::Receiver<StreamChunk>, LlmError> {
        let response = self.send(task, "streamGenerateContent", "&alt=sse").await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::from_reqwest(ProviderKey::Gemini, e)))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                for payload in drain_sse_data(&mut buffer) {
                    let Ok(event) = serde_json::from_str::<GenerateResponse>(&payload) else {
                        continue;
                    };
                    if let Some(text) = Self::first_text(event) {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
