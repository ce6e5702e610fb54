use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::state::StoreConfig;
use crate::workflows::MonitorConfig;

/// Main configuration structure for agent-relay
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Shared state document location and lock timings
    pub store: StoreConfig,
    /// Stall detection, retry and polling settings
    pub monitor: MonitorConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines instead of plain text
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl RelayConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (agent-relay.toml, .agent-relay-rc)
    /// 3. Environment variables (AGENT_RELAY_ prefix, `__` between sections,
    ///    e.g. AGENT_RELAY_MONITOR__MAX_RETRIES=3)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`RelayConfig::load`] but resolves config files relative to `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&RelayConfig::default())?);

        let toml_path = dir.join("agent-relay.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path).format(FileFormat::Toml));
        }

        let rc_path = dir.join(".agent-relay-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("AGENT_RELAY")
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

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<RelayConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = RelayConfig::load_env_file();
        RelayConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static RelayConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
