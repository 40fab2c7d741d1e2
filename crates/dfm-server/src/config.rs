//! Configuration management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where fleet state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: PathBuf,
    pub storage: String, // "sqlite", "memory"
    pub audit_interval_seconds: u64,
    pub audit_log_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            database_path: PathBuf::from("dfm.db"),
            storage: "sqlite".to_string(),
            audit_interval_seconds: 300, // 5 minutes
            audit_log_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and TOML file
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Like [`ServerConfig::load`], with an explicit TOML path taking the
    /// place of `DFM_CONFIG`.
    pub fn load_with(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Load from environment variables
        if let Ok(addr) = std::env::var("DFM_LISTEN_ADDR") {
            config.listen_addr = addr.parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr: {}", e)))?;
        }

        if let Ok(path) = std::env::var("DFM_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Ok(storage) = std::env::var("DFM_STORAGE") {
            config.storage = storage;
        }

        if let Ok(secs) = std::env::var("DFM_AUDIT_INTERVAL_SECONDS") {
            config.audit_interval_seconds = secs.parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid audit_interval_seconds: {}", e)))?;
        }

        if let Ok(path) = std::env::var("DFM_AUDIT_LOG_PATH") {
            config.audit_log_path = Some(PathBuf::from(path));
        }

        if let Ok(level) = std::env::var("DFM_LOG_LEVEL") {
            config.log_level = level;
        }

        // Load from TOML config file (if specified)
        let env_path = std::env::var("DFM_CONFIG").ok().map(PathBuf::from);
        if let Some(path) = config_path.map(Path::to_path_buf).or(env_path) {
            config.load_from_toml(&path)?;
        }

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Load from TOML config file
    pub fn load_from_toml(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.apply_toml(&content)
    }

    fn apply_toml(&mut self, content: &str) -> Result<(), ConfigError> {
        let toml_config: toml::Value = toml::from_str(content)?;

        if let Some(addr) = toml_config.get("listen_addr").and_then(|v| v.as_str()) {
            self.listen_addr = addr.parse()
                .map_err(|e| ConfigError::Invalid(format!("Invalid listen_addr in TOML: {}", e)))?;
        }

        if let Some(path) = toml_config.get("database_path").and_then(|v| v.as_str()) {
            self.database_path = PathBuf::from(path);
        }

        if let Some(storage) = toml_config.get("storage").and_then(|v| v.as_str()) {
            self.storage = storage.to_string();
        }

        if let Some(secs) = toml_config.get("audit_interval_seconds").and_then(|v| v.as_integer()) {
            self.audit_interval_seconds = u64::try_from(secs)
                .map_err(|_| ConfigError::Invalid("audit_interval_seconds must be >= 0".to_string()))?;
        }

        if let Some(path) = toml_config.get("audit_log_path").and_then(|v| v.as_str()) {
            self.audit_log_path = Some(PathBuf::from(path));
        }

        if let Some(level) = toml_config.get("log_level").and_then(|v| v.as_str()) {
            self.log_level = level.to_string();
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit_interval_seconds == 0 {
            return Err(ConfigError::Invalid("audit_interval_seconds must be > 0".to_string()));
        }

        if !matches!(self.storage.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::Invalid(
                "storage must be one of: sqlite, memory".to_string()
            ));
        }

        if let Some(path) = &self.audit_log_path {
            if path.file_name().is_none() {
                return Err(ConfigError::Invalid(
                    "audit_log_path must name a file".to_string()
                ));
            }
        }

        Ok(())
    }

    /// Get storage backend enum
    pub fn storage_backend(&self) -> StorageBackend {
        match self.storage.as_str() {
            "memory" => StorageBackend::Memory,
            _ => StorageBackend::Sqlite,
        }
    }

    /// Period of the battery audit
    pub fn audit_interval(&self) -> Duration {
        Duration::from_secs(self.audit_interval_seconds)
    }
}
