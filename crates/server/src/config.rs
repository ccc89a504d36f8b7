//! Server settings

use anyhow::{Context, Result};
use dash_lib::config::DEFAULT_CONFIG_PATH;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Control-plane YAML file
    #[serde(rename = "config", default = "default_config_path")]
    pub config_path: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Serve requests that carry no forwarded identity
    #[serde(default)]
    pub allow_anonymous: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_config_path() -> String {
    DEFAULT_CONFIG_PATH.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            config_path: default_config_path(),
            log_format: LogFormat::default(),
            allow_anonymous: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `DASH_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("DASH").try_parsing(true))
            .build()
            .context("failed to read DASH_* environment")?;

        config
            .try_deserialize()
            .context("invalid DASH_* environment settings")
    }
}
