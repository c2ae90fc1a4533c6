// Configuration module
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Embedded engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Database file path. Empty means a transient in-memory database.
    #[serde(default)]
    pub database_path: String,
    /// Number of worker threads executing queries.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file_path: String,
    #[serde(default = "default_true")]
    pub log_to_console: bool,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: default_log_file(),
            log_to_console: true,
            format: default_log_format(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            cache: CacheSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_pool_size() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_cache_path() -> String {
    "./data/result_cache.redb".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "./logs/duckgate.log".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let mut config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;

        // Override with environment variables if present
        config.apply_env_overrides()?;

        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides for deployment-specific values
    ///
    /// Supported environment variables:
    /// - DUCKGATE_HOST: Override server.host
    /// - DUCKGATE_PORT: Override server.port
    /// - DUCKGATE_DATABASE: Override engine.database_path
    /// - DUCKGATE_CACHE_PATH: Override cache.path
    /// - DUCKGATE_LOG_LEVEL: Override logging.level
    ///
    /// Environment variables take precedence over config.toml values
    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        use std::env;

        if let Ok(host) = env::var("DUCKGATE_HOST") {
            self.server.host = host;
        }

        if let Ok(port_str) = env::var("DUCKGATE_PORT") {
            self.server.port = port_str
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid DUCKGATE_PORT value: {}", port_str))?;
        }

        if let Ok(path) = env::var("DUCKGATE_DATABASE") {
            self.engine.database_path = path;
        }

        if let Ok(path) = env::var("DUCKGATE_CACHE_PATH") {
            self.cache.path = path;
        }

        if let Ok(level) = env::var("DUCKGATE_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration settings
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.engine.pool_size == 0 {
            return Err(anyhow::anyhow!("engine.pool_size cannot be 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        if self.cache.enabled && self.cache.path.is_empty() {
            return Err(anyhow::anyhow!("cache.path cannot be empty when the cache is enabled"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.engine.pool_size, 4);
        assert!(config.engine.database_path.is_empty());
    }

    #[test]
    fn test_invalid_port() {
        let mut config = ServerConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_pool_size() {
        let mut config = ServerConfig::default();
        config.engine.pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ServerConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            port = 9001

            [engine]
            database_path = "analytics.duckdb"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.engine.database_path, "analytics.duckdb");
        assert_eq!(config.engine.pool_size, 4);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_env_override_port() {
        env::set_var("DUCKGATE_PORT", "9090");
        let mut config = ServerConfig::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.server.port, 9090);
        env::remove_var("DUCKGATE_PORT");
    }

    #[test]
    fn test_env_override_database() {
        env::set_var("DUCKGATE_DATABASE", "/custom/db.duckdb");
        let mut config = ServerConfig::default();
        config.apply_env_overrides().unwrap();
        assert_eq!(config.engine.database_path, "/custom/db.duckdb");
        env::remove_var("DUCKGATE_DATABASE");
    }

    #[test]
    fn test_invalid_env_port_is_rejected() {
        env::set_var("DUCKGATE_PORT", "not-a-port");
        let mut config = ServerConfig::default();
        assert!(config.apply_env_overrides().is_err());
        env::remove_var("DUCKGATE_PORT");
    }
}
