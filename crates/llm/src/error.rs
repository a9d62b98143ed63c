use std::time::Duration;

use thiserror::Error;

use crate::providers::ProviderKey;
use crate::retry::RetryableError;

/// Unified error type for the generation layer.
///
/// Provider adapters translate every HTTP/auth/rate-limit failure into
/// this type before it crosses the adapter boundary, so the orchestrator
/// never sees a `reqwest` error directly.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No enabled provider with a credential supports the requested
    /// capability.
    #[error("no enabled provider with credentials is available")]
    NoProviderAvailable,

    /// A single provider call failed (network, rate limit, 5xx, bad
    /// payload). Recovered locally by falling through to the next
    /// provider in the try-order.
    #[error("{provider} call failed: {message}")]
    CallFailed {
        provider: ProviderKey,
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// The provider did not settle within the per-call timeout budget.
    #[error("{provider} timed out after {waited:?}")]
    Timeout {
        provider: ProviderKey,
        waited: Duration,
    },

    /// Every usable provider was tried (or skipped on an open breaker)
    /// and none produced a response.
    #[error("all providers exhausted, last error: {last}")]
    AllProvidersExhausted {
        #[source]
        last: Box<LlmError>,
    },

    /// Caller-initiated cancellation. Distinct from failure: does not
    /// increment failure metrics and does not trip circuit breakers.
    #[error("generation aborted by caller")]
    Aborted,

    /// The request itself is malformed (empty credential, oversized
    /// prompt). Never retried.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl LlmError {
    /// Classify an HTTP status into a uniform call failure.
    pub fn from_status(provider: ProviderKey, status: u16, message: impl Into<String>) -> Self {
        let retryable = matches!(status, 408 | 429 | 500..=599);
        LlmError::CallFailed {
            provider,
            message: message.into(),
            status: Some(status),
            retryable,
        }
    }

    /// Translate a transport-level error at the adapter boundary.
    pub fn from_reqwest(provider: ProviderKey, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return LlmError::Timeout {
                provider,
                waited: Duration::ZERO,
            };
        }
        let retryable = err.is_connect() || err.is_request();
        LlmError::CallFailed {
            provider,
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
            retryable,
        }
    }

    /// Whether a whole-call retry (with backoff) may help.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::CallFailed { retryable, .. } => *retryable,
            LlmError::Timeout { .. } => true,
            LlmError::AllProvidersExhausted { last } => last.is_transient(),
            LlmError::NoProviderAvailable
            | LlmError::Aborted
            | LlmError::InvalidRequest { .. } => false,
        }
    }

    /// Short tag used in logs and per-section failure reports.
    pub fn category(&self) -> &'static str {
        match self {
            LlmError::NoProviderAvailable => "provider_unavailable",
            LlmError::CallFailed { .. } => "provider_call_failed",
            LlmError::Timeout { .. } => "timeout",
            LlmError::AllProvidersExhausted { .. } => "all_providers_exhausted",
            LlmError::Aborted => "aborted",
            LlmError::InvalidRequest { .. } => "invalid_request",
        }
    }
}

impl RetryableError for LlmError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn error_type(&self) -> String {
        self.category().to_string()
    }

    fn error_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let err = LlmError::from_status(ProviderKey::OpenAi, 429, "rate limited");
        assert!(err.is_transient());

        let err = LlmError::from_status(ProviderKey::OpenAi, 503, "overloaded");
        assert!(err.is_transient());

        let err = LlmError::from_status(ProviderKey::Anthropic, 401, "bad key");
        assert!(!err.is_transient());

        let err = LlmError::from_status(ProviderKey::Gemini, 400, "bad request");
        assert!(!err.is_transient());
    }

    #[test]
    fn exhaustion_inherits_transience_from_cause() {
        let last = LlmError::from_status(ProviderKey::OpenAi, 500, "boom");
        let err = LlmError::AllProvidersExhausted { last: Box::new(last) };
        assert!(err.is_transient());

        let last = LlmError::InvalidRequest {
            message: "empty prompt".into(),
        };
        let err = LlmError::AllProvidersExhausted { last: Box::new(last) };
        assert!(!err.is_transient());
    }

    #[test]
    fn aborts_are_never_retryable() {
        assert!(!LlmError::Aborted.is_transient());
    }
}
