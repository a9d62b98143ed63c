use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::providers::ProviderKey;

/// Rolling per-provider stats. Used only as a ranking signal for
/// provider ordering, never to gate eligibility.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub fail_count: u64,
    pub avg_response_time_ms: f64,
    pub last_error: Option<String>,
}

impl ProviderMetrics {
    /// `success / max(total, 1)`. A provider with zero calls ranks
    /// maximal (optimistic prior), ties broken by registry order.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        self.success_count as f64 / self.total_calls as f64
    }
}

/// Process-wide success/failure counters and latency averages, shared
/// across concurrent requests.
#[derive(Default)]
pub struct MetricsTracker {
    inner: Mutex<HashMap<ProviderKey, ProviderMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, key: ProviderKey, latency: Duration) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let metrics = inner.entry(key).or_default();
        metrics.total_calls += 1;
        metrics.success_count += 1;

        // Incremental running average over successful calls.
        let n = metrics.success_count as f64;
        metrics.avg_response_time_ms =
            (metrics.avg_response_time_ms * (n - 1.0) + latency.as_millis() as f64) / n;
    }

    pub fn record_failure(&self, key: ProviderKey, error: &str) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let metrics = inner.entry(key).or_default();
        metrics.total_calls += 1;
        metrics.fail_count += 1;
        metrics.last_error = Some(error.to_string());
    }

    pub fn success_rate(&self, key: ProviderKey) -> f64 {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner.get(&key).map_or(1.0, ProviderMetrics::success_rate)
    }

    pub fn snapshot(&self, key: ProviderKey) -> ProviderMetrics {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        inner.get(&key).cloned().unwrap_or_default()
    }

    /// Human-readable summary for one provider.
    pub fn summary(&self, key: ProviderKey) -> String {
        let m = self.snapshot(key);
        format!(
            "{key}: {} calls ({:.1}% success, {:.0}ms avg)",
            m.total_calls,
            m.success_rate() * 100.0,
            m.avg_response_time_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_call_provider_ranks_maximal() {
        let tracker = MetricsTracker::new();
        assert_eq!(tracker.success_rate(ProviderKey::OpenAi), 1.0);
    }

    #[test]
    fn success_rate_reflects_outcomes() {
        let tracker = MetricsTracker::new();
        let key = ProviderKey::Anthropic;

        tracker.record_success(key, Duration::from_millis(100));
        tracker.record_failure(key, "boom");
        tracker.record_success(key, Duration::from_millis(200));
        tracker.record_failure(key, "bust");

        assert!((tracker.success_rate(key) - 0.5).abs() < f64::EPSILON);
        let snapshot = tracker.snapshot(key);
        assert_eq!(snapshot.total_calls, 4);
        assert_eq!(snapshot.last_error.as_deref(), Some("bust"));
    }

    #[test]
    fn running_average_updates_incrementally() {
        let tracker = MetricsTracker::new();
        let key = ProviderKey::Gemini;

        tracker.record_success(key, Duration::from_millis(100));
        tracker.record_success(key, Duration::from_millis(300));

        let snapshot = tracker.snapshot(key);
        assert!((snapshot.avg_response_time_ms - 200.0).abs() < 1e-9);
    }
}
