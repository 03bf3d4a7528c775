//! Runtime configuration
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables: `MIRROR_CSRF_TOKEN`, `MIRROR_PRODUCTION`
//! 2. Config file: `$MIRROR_CONFIG`, else `mirror.toml` when present
//! 3. Defaults
//!
//! # Example Config File
//!
//! ```toml
//! csrf_token = "secret"
//!
//! [session]
//! production_mode = false
//!
//! [client]
//! max_pending_messages = 16
//!
//! [demo]
//! items = ["milk", "eggs"]
//! reply_timeout_ms = 2000
//! ```

use mirror_client::ClientConfig;
use mirror_server::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file, read when present
pub const DEFAULT_CONFIG_FILE: &str = "mirror.toml";

/// Errors while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Scripted interaction run by the demo client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Items typed into the input and added one by one
    pub items: Vec<String>,
    /// Location the client navigates to at the end
    pub navigate_to: String,
    /// How long the client waits for each reply
    pub reply_timeout_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            items: vec!["milk".to_string(), "eggs".to_string(), "bread".to_string()],
            navigate_to: "/done".to_string(),
            reply_timeout_ms: 2000,
        }
    }
}

impl DemoConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Shared token, copied into both the session and the client
    pub csrf_token: String,
    pub session: SessionConfig,
    pub client: ClientConfig,
    pub demo: DemoConfig,
    /// File the configuration came from
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            csrf_token: "mirror-demo".to_string(),
            session: SessionConfig::default(),
            client: ClientConfig::default(),
            demo: DemoConfig::default(),
            config_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Load the configuration from every source
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("MIRROR_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::load_from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.share_token();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.config_path = Some(path.to_path_buf());
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override fields from environment variables read through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(token) = var("MIRROR_CSRF_TOKEN") {
            self.csrf_token = token;
            log::info!("CSRF token from env");
        }
        if let Some(value) = var("MIRROR_PRODUCTION") {
            self.session.production_mode = match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "MIRROR_PRODUCTION",
                        value,
                    })
                }
            };
        }
        Ok(())
    }

    /// Use the top-level token on both ends unless one was set explicitly
    pub fn share_token(&mut self) {
        if self.session.csrf_token.is_empty() {
            self.session.csrf_token = self.csrf_token.clone();
        }
        if self.client.csrf_token.is_empty() {
            self.client.csrf_token = self.csrf_token.clone();
        }
    }

    /// Print configuration summary
    pub fn log_summary(&self) {
        log::info!("Runtime configuration:");
        match &self.config_path {
            Some(path) => log::info!("  Source: {}", path.display()),
            None => log::info!("  Source: defaults"),
        }
        log::info!("  Production mode: {}", self.session.production_mode);
        log::info!("  Validate sync ids: {}", self.session.validate_sync_ids);
        log::info!("  Pending message limit: {}", self.client.max_pending_messages);
        log::info!("  Demo items: {}", self.demo.items.len());
    }
}
