use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::notifications::ParseMode;
use crate::workflows::EngineSettings;

/// Main configuration structure for statusflow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusFlowConfig {
    /// Database settings (optional)
    pub database: Option<DatabaseConfig>,
    /// Outbound notification settings
    pub notifications: NotificationsConfig,
    /// Chain execution settings
    pub engine: EngineConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
    /// Base URL of the Telegram Bot API
    pub api_base_url: String,
    /// Per-message timeout
    pub timeout_seconds: u64,
    /// Parse mode used when a step does not set one
    pub default_parse_mode: Option<ParseMode>,
    /// Outbound requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Maximum nesting of move_status re-entries and trigger actions
    pub max_chain_depth: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
    /// Enable metrics collection
    pub metrics_enabled: bool,
}

impl Default for StatusFlowConfig {
    fn default() -> Self {
        Self {
            database: Some(DatabaseConfig {
                url: "sqlite://.statusflow/statusflow.db".to_string(),
                max_connections: 10,
                auto_migrate: true,
            }),
            notifications: NotificationsConfig {
                api_base_url: "https://api.telegram.org".to_string(),
                timeout_seconds: 10,
                default_parse_mode: Some(ParseMode::Html),
                requests_per_second: 25,
                burst_capacity: 5,
            },
            engine: EngineConfig { max_chain_depth: 16 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
                metrics_enabled: true,
            },
        }
    }
}

impl StatusFlowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (statusflow.toml, .statusflow-rc)
    /// 3. Environment variables (`STATUSFLOW_<SECTION>__<KEY>`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("statusflow.toml").exists() {
            builder = builder.add_source(File::with_name("statusflow"));
        }

        if Path::new(".statusflow-rc").exists() {
            builder = builder.add_source(
                File::with_name(".statusflow-rc").format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("STATUSFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Settings handed to the state machine
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_chain_depth: self.engine.max_chain_depth,
            notification_timeout: Duration::from_secs(self.notifications.timeout_seconds),
            default_parse_mode: self.notifications.default_parse_mode,
        }
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

/// Global configuration instance, with whether a .env file fed it
static CONFIG: std::sync::LazyLock<Result<(StatusFlowConfig, bool), anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let env_file = StatusFlowConfig::load_env_file().unwrap_or(false);
        StatusFlowConfig::load().map(|config| (config, env_file))
    });

/// Get the global configuration
pub fn config() -> Result<&'static StatusFlowConfig> {
    CONFIG
        .as_ref()
        .map(|(config, _)| config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration and report where it came from. Call after
/// logging is set up.
pub fn init_config() -> Result<()> {
    let env_file = CONFIG
        .as_ref()
        .map(|(_, env_file)| *env_file)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if env_file {
        tracing::info!("Loaded environment variables from .env file");
    }
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
