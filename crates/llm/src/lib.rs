//! Multi-provider AI generation with resilience built in.
//!
//! The [`GenerationOrchestrator`] fans a generation task out across the
//! configured providers (OpenAI, Anthropic, Gemini) with per-provider
//! circuit breaking, success-rate-aware ordering, a short-TTL response
//! cache and a timeout race per attempt. [`retry::execute_with_retry`]
//! wraps whole orchestrated calls in exponential backoff with jitter.

pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod registry;
pub mod retry;

pub use cache::{CacheSettings, ResponseCache};
pub use circuit_breaker::{BreakerSettings, CircuitBreakerBoard};
pub use config::ResilienceConfig;
pub use error::LlmError;
pub use metrics::{MetricsTracker, ProviderMetrics};
pub use orchestrator::GenerationOrchestrator;
pub use providers::{
    AnthropicAdapter, Capability, GeminiAdapter, GenerationOptions, GenerationTask, OpenAiAdapter,
    ProviderAdapter, ProviderKey, ProviderSettings, StreamChunk,
};
pub use registry::ProviderRegistry;
pub use retry::{execute_with_retry, RetryConfig, RetryableError};
pub use tokio_util::sync::CancellationToken;
