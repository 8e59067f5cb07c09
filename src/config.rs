use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{DroidClawError, DroidClawResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub device: DeviceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub active_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert(
            "openai".to_string(),
            ProviderEntry {
                display_name: "OpenAI".to_string(),
                api_base: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o".to_string(),
                temperature: default_temperature(),
                stream: false,
                api_key: None,
                max_retries: default_max_retries(),
            },
        );
        Self {
            active_provider: "openai".to_string(),
            providers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    /// Full chat-completions endpoint URL.
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Use SSE streaming for completions.
    #[serde(default)]
    pub stream: bool,
    /// Optional API key stored in config.toml (env var DROIDCLAW_<ID>_API_KEY wins).
    #[serde(default)]
    pub api_key: Option<String>,
    /// How many times a rate-limited (HTTP 429) request is retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Screenshots kept in the model-facing history, newest first.
    #[serde(default = "default_max_images")]
    pub max_images: usize,
    /// Append a uiautomator element summary to every observation.
    #[serde(default)]
    pub include_ui_elements: bool,
    #[serde(default = "default_true")]
    pub persist_history: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_images: default_max_images(),
            include_ui_elements: false,
            persist_history: true,
        }
    }
}

fn default_max_iterations() -> u32 {
    50
}

fn default_max_images() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Target cell edge in pixels of the downscaled image.
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
    /// Longest edge of the image sent to the model.
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            max_edge: default_max_edge(),
        }
    }
}

fn default_cell_size() -> u32 {
    40
}

fn default_max_edge() -> u32 {
    800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// Device serial; `None` picks the only connected device.
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default = "default_swipe_duration_ms")]
    pub swipe_duration_ms: u32,
    #[serde(default = "default_tap_sequence_delay_ms")]
    pub tap_sequence_delay_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            swipe_duration_ms: default_swipe_duration_ms(),
            tap_sequence_delay_ms: default_tap_sequence_delay_ms(),
        }
    }
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_swipe_duration_ms() -> u32 {
    300
}

fn default_tap_sequence_delay_ms() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Settings of the active provider.
    pub fn active_provider(&self) -> DroidClawResult<&ProviderEntry> {
        self.llm.providers.get(&self.llm.active_provider).ok_or_else(|| {
            DroidClawError::Config(format!(
                "active provider '{}' is not defined under [llm.providers]",
                self.llm.active_provider
            ))
        })
    }

    /// Override the active provider's model (from `MODEL` or `--model`).
    pub fn set_model(&mut self, model: &str) -> DroidClawResult<()> {
        let active = self.llm.active_provider.clone();
        let entry = self.llm.providers.get_mut(&active).ok_or_else(|| {
            DroidClawError::Config(format!("active provider '{active}' is not defined"))
        })?;
        entry.model = model.to_string();
        Ok(())
    }

    pub fn validate(&self) -> DroidClawResult<()> {
        self.active_provider()?;
        if self.agent.max_iterations == 0 {
            return Err(DroidClawError::Config("agent.max_iterations must be at least 1".into()));
        }
        if self.grid.cell_size < 2 {
            return Err(DroidClawError::Config("grid.cell_size must be at least 2".into()));
        }
        if self.grid.max_edge < self.grid.cell_size {
            return Err(DroidClawError::Config(
                "grid.max_edge must not be smaller than grid.cell_size".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_config_path() -> DroidClawResult<Option<PathBuf>> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(Some(candidate));
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(Some(candidate));
    }

    Ok(None)
}

/// Load `config.toml` from next to the executable or the working directory,
/// falling back to built-in defaults when neither exists.
pub fn load_config() -> DroidClawResult<AppConfig> {
    match resolve_config_path()? {
        Some(path) => load_config_from(&path),
        None => {
            tracing::info!("no config.toml found, using built-in defaults");
            let config = AppConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub fn load_config_from(path: &Path) -> DroidClawResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    config.validate()?;
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}
