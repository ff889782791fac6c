use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Outbound queue depth per connected session
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_session_buffer() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            session_buffer: default_session_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; unset runs against the in-memory store
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Longest key the engine issues before asking for a rebalance
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,
    /// Transparent retries after a lost commit race on neighbors
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Retries of a transient store failure
    #[serde(default = "default_storage_retries")]
    pub storage_retries: u32,
    /// First backoff delay in milliseconds, doubled per retry
    #[serde(default = "default_storage_backoff_ms")]
    pub storage_backoff_ms: u64,
}

fn default_max_key_len() -> usize {
    48
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_storage_retries() -> u32 {
    3
}

fn default_storage_backoff_ms() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_key_len: default_max_key_len(),
            max_conflict_retries: default_max_conflict_retries(),
            storage_retries: default_storage_retries(),
            storage_backoff_ms: default_storage_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Drag locks with no signal for this long are released
    #[serde(default = "default_drag_lock_ttl_secs")]
    pub drag_lock_ttl_secs: u64,
    /// How often the stale-lock sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long the commit sequencer waits on a missing sequence number
    #[serde(default = "default_sequencer_gap_timeout_ms")]
    pub sequencer_gap_timeout_ms: u64,
}

fn default_drag_lock_ttl_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_sequencer_gap_timeout_ms() -> u64 {
    2000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            drag_lock_ttl_secs: default_drag_lock_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sequencer_gap_timeout_ms: default_sequencer_gap_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("CARDFLOW_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (CARDFLOW_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("CARDFLOW")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate cross-field constraints the types cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.max_key_len < 4 {
            return Err(format!(
                "engine.max_key_len must be at least 4, got {}",
                self.engine.max_key_len
            ));
        }
        if self.server.session_buffer == 0 {
            return Err("server.session_buffer must be positive".to_string());
        }
        if self.session.sweep_interval_secs == 0 {
            return Err("session.sweep_interval_secs must be positive".to_string());
        }
        Ok(())
    }
}
