use std::env;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::LlmError;
use crate::providers::{
    AnthropicAdapter, Capability, GeminiAdapter, OpenAiAdapter, ProviderAdapter, ProviderKey,
    ProviderSettings,
};

/// Static catalog of configured providers. Built once at process start;
/// registration order is the fallback order when metrics cannot break a
/// tie.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<RegistryEntry>,
}

struct RegistryEntry {
    settings: ProviderSettings,
    adapter: Arc<dyn ProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Later registrations of the same key replace
    /// the earlier one in place, keeping its position.
    pub fn register(mut self, settings: ProviderSettings, adapter: Arc<dyn ProviderAdapter>) -> Self {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.settings.key == settings.key)
        {
            existing.settings = settings;
            existing.adapter = adapter;
        } else {
            self.entries.push(RegistryEntry { settings, adapter });
        }
        self
    }

    /// Provider keys in registry order.
    pub fn keys(&self) -> Vec<ProviderKey> {
        self.entries.iter().map(|e| e.settings.key).collect()
    }

    pub fn settings(&self, key: ProviderKey) -> Option<&ProviderSettings> {
        self.entries
            .iter()
            .find(|e| e.settings.key == key)
            .map(|e| &e.settings)
    }

    pub fn adapter(&self, key: ProviderKey) -> Option<Arc<dyn ProviderAdapter>> {
        self.entries
            .iter()
            .find(|e| e.settings.key == key)
            .map(|e| Arc::clone(&e.adapter))
    }

    /// A provider is usable iff it is enabled, carries a credential,
    /// and its adapter supports the requested capability.
    pub fn is_usable(&self, key: ProviderKey, capability: Capability) -> bool {
        self.entries
            .iter()
            .find(|e| e.settings.key == key)
            .is_some_and(|e| {
                e.settings.enabled && e.settings.credential_present() && e.adapter.supports(capability)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the registry from environment variables, in the order
    /// OpenAI, Anthropic, Gemini. Providers without an API key are left
    /// out. Fails closed when nothing is configured.
    ///
    /// Recognized variables per provider: `OPENAI_API_KEY` /
    /// `OPENAI_MODEL` / `OPENAI_ENABLED`, and the same shape for
    /// `ANTHROPIC_*` and `GEMINI_*`.
    pub fn from_env() -> Result<Self, LlmError> {
        dotenv::dotenv().ok();

        let mut registry = Self::new();

        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            let model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            let settings = ProviderSettings::new(ProviderKey::OpenAi, &model)
                .with_api_key(&api_key)
                .with_enabled(flag_from_env("OPENAI_ENABLED"));
            let adapter = OpenAiAdapter::new(&api_key, &model)?;
            registry = registry.register(settings, Arc::new(adapter));
            info!("registered OpenAI provider ({model})");
        }

        if let Ok(api_key) = env::var("ANTHROPIC_API_KEY") {
            let model = env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string());
            let settings = ProviderSettings::new(ProviderKey::Anthropic, &model)
                .with_api_key(&api_key)
                .with_enabled(flag_from_env("ANTHROPIC_ENABLED"));
            let adapter = AnthropicAdapter::new(&api_key, &model)?;
            registry = registry.register(settings, Arc::new(adapter));
            info!("registered Anthropic provider ({model})");
        }

        if let Ok(api_key) = env::var("GEMINI_API_KEY") {
            let model = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());
            let settings = ProviderSettings::new(ProviderKey::Gemini, &model)
                .with_api_key(&api_key)
                .with_enabled(flag_from_env("GEMINI_ENABLED"));
            let adapter = GeminiAdapter::new(&api_key, &model)?;
            registry = registry.register(settings, Arc::new(adapter));
            info!("registered Gemini provider ({model})");
        }

        if registry.is_empty() {
            warn!("no AI providers configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY");
            return Err(LlmError::NoProviderAvailable);
        }

        Ok(registry)
    }
}

fn flag_from_env(name: &str) -> bool {
    env::var(name)
        .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no"))
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::providers::GenerationTask;

    struct NullAdapter(ProviderKey);

    #[async_trait]
    impl ProviderAdapter for NullAdapter {
        fn key(&self) -> ProviderKey {
            self.0
        }

        async fn complete(&self, _task: &GenerationTask) -> Result<String, LlmError> {
            Ok(String::new())
        }
    }

    #[test]
    fn usability_requires_enabled_and_credential() {
        let registry = ProviderRegistry::new()
            .register(
                ProviderSettings::new(ProviderKey::OpenAi, "gpt-4o-mini").with_api_key("sk-1"),
                Arc::new(NullAdapter(ProviderKey::OpenAi)),
            )
            .register(
                ProviderSettings::new(ProviderKey::Anthropic, "claude-3-5-haiku-latest"),
                Arc::new(NullAdapter(ProviderKey::Anthropic)),
            )
            .register(
                ProviderSettings::new(ProviderKey::Gemini, "gemini-1.5-flash")
                    .with_api_key("g-1")
                    .with_enabled(false),
                Arc::new(NullAdapter(ProviderKey::Gemini)),
            );

        assert!(registry.is_usable(ProviderKey::OpenAi, Capability::Complete));
        // No credential.
        assert!(!registry.is_usable(ProviderKey::Anthropic, Capability::Complete));
        // Disabled.
        assert!(!registry.is_usable(ProviderKey::Gemini, Capability::Complete));
    }

    #[test]
    fn registration_order_is_preserved() {
        let registry = ProviderRegistry::new()
            .register(
                ProviderSettings::new(ProviderKey::Gemini, "gemini-1.5-flash").with_api_key("g"),
                Arc::new(NullAdapter(ProviderKey::Gemini)),
            )
            .register(
                ProviderSettings::new(ProviderKey::OpenAi, "gpt-4o-mini").with_api_key("o"),
                Arc::new(NullAdapter(ProviderKey::OpenAi)),
            );

        assert_eq!(registry.keys(), vec![ProviderKey::Gemini, ProviderKey::OpenAi]);
    }

    #[test]
    fn reregistration_replaces_in_place() {
        let registry = ProviderRegistry::new()
            .register(
                ProviderSettings::new(ProviderKey::OpenAi, "gpt-4o-mini").with_api_key("a"),
                Arc::new(NullAdapter(ProviderKey::OpenAi)),
            )
            .register(
                ProviderSettings::new(ProviderKey::Anthropic, "claude-3-5-haiku-latest")
                    .with_api_key("b"),
                Arc::new(NullAdapter(ProviderKey::Anthropic)),
            )
            .register(
                ProviderSettings::new(ProviderKey::OpenAi, "gpt-4o").with_api_key("c"),
                Arc::new(NullAdapter(ProviderKey::OpenAi)),
            );

        assert_eq!(registry.keys(), vec![ProviderKey::OpenAi, ProviderKey::Anthropic]);
        assert_eq!(
            registry.settings(ProviderKey::OpenAi).map(|s| s.text_model.as_str()),
            Some("gpt-4o")
        );
    }
}
