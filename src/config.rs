use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::prober::{DEFAULT_MAX_REDIRECTS, ProbeOptions};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Measure content transfer up to the end of the body.
    #[serde(default)]
    pub read_body: bool,
}

fn default_listen_address() -> String {
    "127.0.0.1:8888".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            max_redirects: default_max_redirects(),
            read_body: false,
        }
    }
}

impl ExporterConfig {
    /// Defaults, overlaid with the JSON file at `path` when one is given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_file_config(path).await?,
            None => Self::default(),
        };
        config.validate_log_level()?;
        Ok(config)
    }

    async fn load_file_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path.display()));
        }

        let content = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("reading {}", file_path.display()))?;
        let config: ExporterConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", file_path.display()))?;
        Ok(config)
    }

    /// Command-line values win over the file.
    pub fn apply_overrides(&mut self, listen_address: Option<String>, log_level: Option<String>) -> Result<()> {
        if let Some(addr) = listen_address {
            self.listen_address = addr;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        self.validate_log_level()
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("invalid listen address {:?}", self.listen_address))
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            max_redirects: self.max_redirects,
            read_body: self.read_body,
        }
    }

    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    /// Validate the log level is one of the supported values
    pub fn validate_log_level(&self) -> Result<()> {
        self.get_tracing_level().map(|_| ())
    }
}
