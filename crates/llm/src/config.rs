use std::env;
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::circuit_breaker::BreakerSettings;

/// All resilience tunables in one place, read once at startup.
///
/// Environment variables (all optional, defaults in parentheses):
/// `CIRCUIT_BREAKER_THRESHOLD` (5), `CIRCUIT_BREAKER_COOLDOWN_MS`
/// (15000), `RESPONSE_CACHE_TTL_MS` (60000), `RESPONSE_CACHE_CAPACITY`
/// (100), `GENERATION_TIMEOUT_MS` (90000), `SECTION_CONCURRENCY` (3).
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub breaker: BreakerSettings,
    pub cache: CacheSettings,
    /// Default timeout race budget when a task does not set one.
    pub default_timeout: Duration,
    /// Bounded parallelism for multi-section generation batches.
    pub section_concurrency: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            breaker: BreakerSettings::default(),
            cache: CacheSettings::default(),
            default_timeout: Duration::from_millis(90_000),
            section_concurrency: 3,
        }
    }
}

impl ResilienceConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            breaker: BreakerSettings {
                threshold: env_parse("CIRCUIT_BREAKER_THRESHOLD", defaults.breaker.threshold),
                cooldown: Duration::from_millis(env_parse(
                    "CIRCUIT_BREAKER_COOLDOWN_MS",
                    defaults.breaker.cooldown.as_millis() as u64,
                )),
            },
            cache: CacheSettings {
                ttl: Duration::from_millis(env_parse(
                    "RESPONSE_CACHE_TTL_MS",
                    defaults.cache.ttl.as_millis() as u64,
                )),
                capacity: env_parse("RESPONSE_CACHE_CAPACITY", defaults.cache.capacity),
            },
            default_timeout: Duration::from_millis(env_parse(
                "GENERATION_TIMEOUT_MS",
                defaults.default_timeout.as_millis() as u64,
            )),
            section_concurrency: env_parse("SECTION_CONCURRENCY", defaults.section_concurrency)
                .max(1),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_settings() {
        let config = ResilienceConfig::default();
        assert_eq!(config.breaker.threshold, 5);
        assert_eq!(config.breaker.cooldown, Duration::from_millis(15_000));
        assert_eq!(config.cache.ttl, Duration::from_millis(60_000));
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(config.default_timeout, Duration::from_millis(90_000));
        assert_eq!(config.section_concurrency, 3);
    }
}
