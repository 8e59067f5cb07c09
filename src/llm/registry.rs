use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig, ProviderEntry};
use crate::errors::{DroidClawError, DroidClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all configured LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> DroidClawResult<Arc<dyn LlmProvider>> {
        self.providers
            .get(&self.active)
            .cloned()
            .ok_or_else(|| DroidClawError::Config(format!("Active provider '{}' not found in registry", self.active)))
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Active provider together with the model settings from its config entry.
    pub fn active(&self) -> DroidClawResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let provider = self.get_active()?;
        let entry = self.llm_config.providers.get(&self.active).ok_or_else(|| {
            DroidClawError::Config(format!("provider '{}' has no config entry", self.active))
        })?;
        let cfg = CallConfig {
            model: entry.model.clone(),
            stream: entry.stream,
            temperature: entry.temperature,
        };
        tracing::debug!(
            provider = %self.active,
            model = %cfg.model,
            stream = cfg.stream,
            temperature = cfg.temperature,
            "resolved active provider"
        );
        Ok((provider, cfg))
    }

    /// Build a registry from the loaded app config, reading API keys from the environment.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = resolve_api_key(id, entry, |name| std::env::var(name).ok());
            if api_key.is_empty() {
                tracing::warn!(provider = %id, "no API key configured");
            }
            let provider = OpenAiCompatibleProvider::new(
                id.clone(),
                entry.api_base.clone(),
                api_key,
                entry.max_retries,
            );
            registry.register(Arc::new(provider));
        }
        tracing::debug!(
            providers = ?registry.list_names(),
            active = %registry.active,
            "provider registry built"
        );
        registry
    }
}

/// `DROIDCLAW_<ID>_API_KEY`, then the entry's `api_key`, then `OPENAI_API_KEY`.
pub fn resolve_api_key(
    id: &str,
    entry: &ProviderEntry,
    env: impl Fn(&str) -> Option<String>,
) -> String {
    let var = format!("DROIDCLAW_{}_API_KEY", id.to_uppercase().replace('-', "_"));
    env(&var)
        .filter(|k| !k.is_empty())
        .or_else(|| entry.api_key.clone().filter(|k| !k.is_empty()))
        .or_else(|| env("OPENAI_API_KEY").filter(|k| !k.is_empty()))
        .unwrap_or_default()
}
