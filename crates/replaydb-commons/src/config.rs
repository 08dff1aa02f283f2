// Configuration module
use crate::constants::{DEFAULT_CALLBACK_EXECUTOR_THREADS, DEFAULT_PORT, DEFAULT_TABLE_MAX_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Priority tables created at startup when no checkpoint is loaded.
    #[serde(default)]
    pub tables: Vec<TableSettings>,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Size of the shared callback executor thread pool on which tables
    /// deliver insert and sampling completions.
    #[serde(default = "default_callback_executor_num_threads")]
    pub callback_executor_num_threads: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file_path: String,
    #[serde(default = "default_log_to_console")]
    pub log_to_console: bool,
}

/// Per-table settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSettings {
    pub name: String,
    #[serde(default = "default_table_max_size")]
    pub max_size: i64,
    /// Sampling strategy: "uniform", "prioritized", or "fifo".
    #[serde(default = "default_sampler")]
    pub sampler: String,
    /// Exponent applied to priorities by the prioritized sampler.
    #[serde(default = "default_priority_exponent")]
    pub priority_exponent: f64,
    /// Items are retired after this many samples. 0 disables retirement.
    #[serde(default)]
    pub max_times_sampled: i32,
    /// Minimum number of items before sampling is allowed.
    #[serde(default = "default_min_size_to_sample")]
    pub min_size_to_sample: i64,
    /// Target ratio of samples to inserts enforced by the rate limiter.
    #[serde(default = "default_samples_per_insert")]
    pub samples_per_insert: f64,
    /// Lower bound of the rate limiter error window.
    #[serde(default = "default_min_diff")]
    pub min_diff: f64,
    /// Upper bound of the rate limiter error window.
    #[serde(default = "default_max_diff")]
    pub max_diff: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_callback_executor_num_threads() -> usize {
    DEFAULT_CALLBACK_EXECUTOR_THREADS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/replaydb.log".to_string()
}

fn default_log_to_console() -> bool {
    true
}

fn default_table_max_size() -> i64 {
    DEFAULT_TABLE_MAX_SIZE
}

fn default_sampler() -> String {
    "uniform".to_string()
}

fn default_priority_exponent() -> f64 {
    1.0
}

fn default_min_size_to_sample() -> i64 {
    1
}

fn default_samples_per_insert() -> f64 {
    0.0
}

fn default_min_diff() -> f64 {
    f64::NEG_INFINITY
}

fn default_max_diff() -> f64 {
    f64::INFINITY
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            callback_executor_num_threads: default_callback_executor_num_threads(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: default_log_file(),
            log_to_console: default_log_to_console(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            service: ServiceSettings::default(),
            logging: LoggingSettings::default(),
            tables: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> std::result::Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("failed to read {}: {}", path.as_ref().display(), e))?;
        let config: ServerConfig =
            toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.service.callback_executor_num_threads == 0 {
            return Err("service.callback_executor_num_threads must be > 0".to_string());
        }
        for table in &self.tables {
            if table.name.is_empty() {
                return Err("tables entry with empty name".to_string());
            }
            if table.max_size <= 0 {
                return Err(format!("table {}: max_size must be > 0", table.name));
            }
            match table.sampler.as_str() {
                "uniform" | "prioritized" | "fifo" => {}
                other => {
                    return Err(format!(
                        "table {}: unknown sampler '{}' (expected uniform, prioritized or fifo)",
                        table.name, other
                    ));
                }
            }
            if table.min_diff > table.max_diff {
                return Err(format!("table {}: min_diff exceeds max_diff", table.name));
            }
        }
        Ok(())
    }
}
