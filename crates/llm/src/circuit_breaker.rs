use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::providers::ProviderKey;

/// Tunables for breaker behavior. Defaults match production settings;
/// tests shrink the cool-down.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens.
    pub threshold: u32,
    /// How long an open breaker quarantines a provider.
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_millis(15_000),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

/// Per-provider failure-counting state machine. A provider whose
/// breaker is open is removed from rotation until the cool-down
/// elapses; the reset happens lazily on the next `is_open` check, so no
/// background timer is needed.
pub struct CircuitBreakerBoard {
    settings: BreakerSettings,
    states: Mutex<HashMap<ProviderKey, BreakerState>>,
}

impl CircuitBreakerBoard {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true while the breaker is tripped and the cool-down has
    /// not elapsed. When the cool-down has elapsed this resets the
    /// breaker (failures back to zero) before returning false.
    pub fn is_open(&self, key: ProviderKey) -> bool {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        let state = states.entry(key).or_default();

        if !state.open {
            return false;
        }

        let cooled = state
            .last_failure
            .is_some_and(|at| at.elapsed() >= self.settings.cooldown);
        if cooled {
            info!("circuit breaker for {key} cooled down, closing");
            *state = BreakerState::default();
            return false;
        }
        true
    }

    /// Increment the failure count and open the breaker at threshold.
    pub fn record_failure(&self, key: ProviderKey) {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        let state = states.entry(key).or_default();

        state.consecutive_failures += 1;
        state.last_failure = Some(Instant::now());

        if state.consecutive_failures >= self.settings.threshold && !state.open {
            warn!(
                "circuit breaker for {key} opening after {} consecutive failures",
                state.consecutive_failures
            );
            state.open = true;
        } else {
            debug!(
                "circuit breaker for {key}: failure {}/{}",
                state.consecutive_failures, self.settings.threshold
            );
        }
    }

    /// Walk the failure count back toward zero. Never closes an open
    /// breaker directly; that only happens via the cool-down.
    pub fn record_success(&self, key: ProviderKey) {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        let state = states.entry(key).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_sub(1);
    }

    /// Operational hook: force a breaker closed.
    pub fn reset(&self, key: ProviderKey) {
        let mut states = self.states.lock().expect("breaker lock poisoned");
        states.insert(key, BreakerState::default());
    }

    pub fn consecutive_failures(&self, key: ProviderKey) -> u32 {
        let states = self.states.lock().expect("breaker lock poisoned");
        states.get(&key).map_or(0, |s| s.consecutive_failures)
    }

    /// One-line state summary for status reports.
    pub fn state_info(&self, key: ProviderKey) -> String {
        let states = self.states.lock().expect("breaker lock poisoned");
        match states.get(&key) {
            Some(state) if state.open => {
                let remaining = state.last_failure.map_or(self.settings.cooldown, |at| {
                    self.settings.cooldown.saturating_sub(at.elapsed())
                });
                format!("OPEN (recovery in {remaining:?})")
            }
            Some(state) => format!("CLOSED (failures: {})", state.consecutive_failures),
            None => "CLOSED (failures: 0)".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(threshold: u32, cooldown_ms: u64) -> CircuitBreakerBoard {
        CircuitBreakerBoard::new(BreakerSettings {
            threshold,
            cooldown: Duration::from_millis(cooldown_ms),
        })
    }

    #[test]
    fn opens_after_threshold_failures() {
        let board = board(5, 15_000);
        let key = ProviderKey::OpenAi;

        for _ in 0..4 {
            board.record_failure(key);
            assert!(!board.is_open(key));
        }
        board.record_failure(key);
        assert!(board.is_open(key));
    }

    #[test]
    fn success_decrements_but_never_below_zero() {
        let board = board(5, 15_000);
        let key = ProviderKey::Anthropic;

        board.record_success(key);
        assert_eq!(board.consecutive_failures(key), 0);

        board.record_failure(key);
        board.record_failure(key);
        board.record_success(key);
        assert_eq!(board.consecutive_failures(key), 1);
    }

    #[test]
    fn success_does_not_close_an_open_breaker() {
        let board = board(2, 60_000);
        let key = ProviderKey::Gemini;

        board.record_failure(key);
        board.record_failure(key);
        assert!(board.is_open(key));

        board.record_success(key);
        assert!(board.is_open(key));
    }

    #[tokio::test]
    async fn cooldown_resets_lazily_on_check() {
        let board = board(2, 30);
        let key = ProviderKey::OpenAi;

        board.record_failure(key);
        board.record_failure(key);
        assert!(board.is_open(key));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!board.is_open(key));
        assert_eq!(board.consecutive_failures(key), 0);
    }

    #[test]
    fn manual_reset_closes_immediately() {
        let board = board(1, 60_000);
        let key = ProviderKey::OpenAi;

        board.record_failure(key);
        assert!(board.is_open(key));
        board.reset(key);
        assert!(!board.is_open(key));
    }
}
