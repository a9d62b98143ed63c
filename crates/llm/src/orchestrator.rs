use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::circuit_breaker::CircuitBreakerBoard;
use crate::config::ResilienceConfig;
use crate::error::LlmError;
use crate::metrics::MetricsTracker;
use crate::providers::{Capability, GenerationOptions, GenerationTask, ProviderKey};
use crate::registry::ProviderRegistry;

/// Coordinates generation across every configured provider.
///
/// At most one provider serves any given call, but failure of one never
/// blocks trying the rest; a provider that fails repeatedly is
/// quarantined by its circuit breaker for a bounded window. Owns the
/// process-wide resilience state (breakers, metrics, cache) so tests
/// can construct an isolated instance.
pub struct GenerationOrchestrator {
    registry: ProviderRegistry,
    breakers: CircuitBreakerBoard,
    metrics: MetricsTracker,
    cache: ResponseCache,
    default_timeout: Duration,
}

impl GenerationOrchestrator {
    pub fn new(registry: ProviderRegistry, config: ResilienceConfig) -> Self {
        Self {
            registry,
            breakers: CircuitBreakerBoard::new(config.breaker),
            metrics: MetricsTracker::new(),
            cache: ResponseCache::new(config.cache),
            default_timeout: config.default_timeout,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerBoard {
        &self.breakers
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Single-shot generation with cache, provider fallback, circuit
    /// breaking and a per-provider timeout race.
    pub async fn generate(&self, task: &GenerationTask) -> Result<String, LlmError> {
        let fingerprint = task.fingerprint();
        if task.options.enable_cache {
            if let Some(hit) = self.cache.get(&fingerprint) {
                debug!("cache hit, no provider contacted");
                return Ok(hit);
            }
        }

        let order = self.try_order(&task.options, Capability::Complete);
        if order.is_empty() {
            return Err(LlmError::NoProviderAvailable);
        }

        let timeout = task.options.timeout.unwrap_or(self.default_timeout);
        let mut last_error: Option<LlmError> = None;

        for key in order {
            if self.breakers.is_open(key) {
                // Skipped providers get no metrics for this call.
                warn!("skipping {key}: circuit breaker open");
                continue;
            }
            let Some(adapter) = self.registry.adapter(key) else {
                continue;
            };

            let started = Instant::now();
            match tokio::time::timeout(timeout, adapter.complete(task)).await {
                Ok(Ok(text)) => {
                    let latency = started.elapsed();
                    info!("{key} served generation in {}ms", latency.as_millis());
                    self.metrics.record_success(key, latency);
                    self.breakers.record_success(key);
                    if task.options.enable_cache {
                        self.cache.put(&fingerprint, &text);
                    }
                    return Ok(text);
                }
                Ok(Err(err)) => {
                    warn!("{key} failed, falling through: {err}");
                    self.metrics.record_failure(key, &err.to_string());
                    self.breakers.record_failure(key);
                    last_error = Some(err);
                }
                Err(_) => {
                    // The losing future is dropped here and can never
                    // touch shared state again.
                    let err = LlmError::Timeout {
                        provider: key,
                        waited: timeout,
                    };
                    warn!("{key} timed out after {timeout:?}, falling through");
                    self.metrics.record_failure(key, &err.to_string());
                    self.breakers.record_failure(key);
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(last) => Err(LlmError::AllProvidersExhausted {
                last: Box::new(last),
            }),
            // Every candidate was skipped on an open breaker; nothing
            // was actually attempted.
            None => Err(LlmError::NoProviderAvailable),
        }
    }

    /// Streaming variant of [`generate`]: same ordering, breaker and
    /// timeout contract, but tokens are delivered through `on_token` as
    /// they arrive and the accumulated string is returned (and cached)
    /// at the end.
    ///
    /// Cancelling `cancel` aborts the in-flight stream: the partial
    /// text is discarded, nothing is cached, and neither success nor
    /// failure is recorded — aborts must not trip circuit breakers.
    pub async fn stream<F>(
        &self,
        task: &GenerationTask,
        mut on_token: F,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        let fingerprint = task.fingerprint();
        if task.options.enable_cache {
            if let Some(hit) = self.cache.get(&fingerprint) {
                debug!("cache hit, replaying as a single token");
                on_token(&hit);
                return Ok(hit);
            }
        }

        let order = self.try_order(&task.options, Capability::Stream);
        if order.is_empty() {
            return Err(LlmError::NoProviderAvailable);
        }

        let timeout = task.options.timeout.unwrap_or(self.default_timeout);
        let mut last_error: Option<LlmError> = None;

        for key in order {
            if self.breakers.is_open(key) {
                warn!("skipping {key}: circuit breaker open");
                continue;
            }
            let Some(adapter) = self.registry.adapter(key) else {
                continue;
            };

            let started = Instant::now();
            let attempt = async {
                let mut rx = adapter.stream(task).await?;
                let mut accumulated = String::new();
                while let Some(chunk) = rx.recv().await {
                    let piece = chunk?;
                    on_token(&piece);
                    accumulated.push_str(&piece);
                }
                Ok::<String, LlmError>(accumulated)
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("stream aborted by caller, discarding partial output");
                    return Err(LlmError::Aborted);
                }
                outcome = tokio::time::timeout(timeout, attempt) => match outcome {
                    Ok(Ok(text)) => {
                        let latency = started.elapsed();
                        info!("{key} served stream in {}ms", latency.as_millis());
                        self.metrics.record_success(key, latency);
                        self.breakers.record_success(key);
                        if task.options.enable_cache {
                            self.cache.put(&fingerprint, &text);
                        }
                        return Ok(text);
                    }
                    Ok(Err(err)) => {
                        warn!("{key} stream failed, falling through: {err}");
                        self.metrics.record_failure(key, &err.to_string());
                        self.breakers.record_failure(key);
                        last_error = Some(err);
                    }
                    Err(_) => {
                        let err = LlmError::Timeout { provider: key, waited: timeout };
                        warn!("{key} stream timed out after {timeout:?}, falling through");
                        self.metrics.record_failure(key, &err.to_string());
                        self.breakers.record_failure(key);
                        last_error = Some(err);
                    }
                },
            }
        }

        match last_error {
            Some(last) => Err(LlmError::AllProvidersExhausted {
                last: Box::new(last),
            }),
            None => Err(LlmError::NoProviderAvailable),
        }
    }

    /// Provider try-order for one call. A usable preferred provider
    /// goes first with the rest in registry order (predictable); with
    /// no preference, providers sort descending by observed success
    /// rate, ties keeping registry order.
    fn try_order(&self, options: &GenerationOptions, capability: Capability) -> Vec<ProviderKey> {
        let usable: Vec<ProviderKey> = self
            .registry
            .keys()
            .into_iter()
            .filter(|&key| self.registry.is_usable(key, capability))
            .collect();

        if let Some(preferred) = options.preferred_provider {
            if usable.contains(&preferred) {
                let mut order = vec![preferred];
                order.extend(usable.into_iter().filter(|&k| k != preferred));
                return order;
            }
        }

        let mut order = usable;
        // Stable sort keeps registry order for equal rates; zero-call
        // providers rank maximal.
        order.sort_by(|&a, &b| {
            self.metrics
                .success_rate(b)
                .partial_cmp(&self.metrics.success_rate(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }

    /// Per-provider health summary for operational diagnostics.
    pub fn status_report(&self) -> String {
        let mut report = String::from("provider status:\n");
        for key in self.registry.keys() {
            report.push_str(&format!(
                "  {} - {}\n",
                self.metrics.summary(key),
                self.breakers.state_info(key)
            ));
        }
        report
    }
}
