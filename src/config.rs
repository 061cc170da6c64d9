use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::collaborators::memory::{DEFAULT_MAX_ITEMS, DEFAULT_MAX_TOKENS};
use crate::workflow::DEFAULT_MAX_RETRIES;

/// Main configuration structure for the travel concierge
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConciergeConfig {
    /// Workflow controller and session settings
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Short-term conversation memory bounds
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Retry attempts allowed per failing tool before escalation
    pub max_retries: u32,
    /// Run the calendar availability check when dates are known
    pub check_availability: bool,
    /// Language to translate the finished plan into, if any
    pub translate_to: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            check_availability: true,
            translate_to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Entries kept before the oldest is evicted
    pub max_items: usize,
    /// Estimated tokens kept before the oldest entry is evicted
    pub max_tokens: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit structured JSON logs instead of human-readable lines
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl ConciergeConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (travel-concierge.toml)
    /// 3. Environment variables (prefixed with TRAVEL_CONCIERGE_)
    pub fn load() -> Result<Self> {
        let path = Path::new("travel-concierge.toml");
        Self::build(path.exists().then_some(path))
    }

    /// Load configuration from an explicit file, still honouring env overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(Some(path.as_ref()))
    }

    fn build(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(file) = file {
            builder = builder.add_source(File::from(file));
        }

        // Nested keys use a double underscore, e.g. TRAVEL_CONCIERGE_WORKFLOW__MAX_RETRIES
        builder = builder.add_source(
            Environment::with_prefix("TRAVEL_CONCIERGE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists. Returns whether one was loaded.
    pub fn load_env_file() -> Result<bool> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            return Ok(true);
        }
        Ok(false)
    }
}

struct LoadedConfig {
    settings: ConciergeConfig,
    env_file_loaded: bool,
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<LoadedConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let env_file_loaded = ConciergeConfig::load_env_file().unwrap_or(false);
        ConciergeConfig::load().map(|settings| LoadedConfig {
            settings,
            env_file_loaded,
        })
    });

/// Get the global configuration
pub fn config() -> Result<&'static ConciergeConfig> {
    CONFIG
        .as_ref()
        .map(|loaded| &loaded.settings)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Report how configuration was loaded.
///
/// Call after `init_telemetry`: the global config is read before a
/// subscriber exists, so its load events are emitted here.
pub fn init_config() -> Result<()> {
    let loaded = CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if loaded.env_file_loaded {
        tracing::info!("Loaded environment variables from .env file");
    }
    tracing::info!(
        max_retries = loaded.settings.workflow.max_retries,
        "Configuration loaded successfully"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ConciergeConfig::default();
        assert_eq!(config.workflow.max_retries, 3);
        assert!(config.workflow.check_availability);
        assert_eq!(config.workflow.translate_to, None);
        assert_eq!(config.memory, MemoryConfig { max_items: 10, max_tokens: 2000 });
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("travel-concierge.toml");

        let mut config = ConciergeConfig::default();
        config.workflow.max_retries = 5;
        config.workflow.translate_to = Some("fr".to_string());
        config.observability.json_logs = false;
        config.save_to_file(&path).unwrap();

        let loaded = ConciergeConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[workflow]\nmax_retries = 1\n\n[memory]\nmax_items = 25\n").unwrap();

        let loaded = ConciergeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.workflow.max_retries, 1);
        assert!(loaded.workflow.check_availability);
        assert_eq!(loaded.memory.max_items, 25);
        assert_eq!(loaded.memory.max_tokens, 2000);
        assert_eq!(loaded.observability, ObservabilityConfig::default());
    }
}
