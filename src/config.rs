//! TOML configuration
//!
//! ```toml
//! [engine]
//! base_url = "https://earthengine.googleapis.com"
//! project = "my-project"
//! token_env = "SARFLOOD_TOKEN"
//!
//! [flood]
//! threshold = 1.25
//! max_slope = 5.0
//!
//! [export]
//! file_prefix = "kuantan"
//! timeout_secs = 3600
//! ```
//!
//! Every key is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::flood_extent::FloodParams;
use crate::engine::TableFormat;
use crate::io::export::ExportOptions;
use crate::types::{FloodError, FloodResult};

/// Remote compute service connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    pub project: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://earthengine.googleapis.com".to_string(),
            project: String::new(),
            token_env: "SARFLOOD_TOKEN".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Export and download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub scale: f64,
    pub crs: String,
    pub file_prefix: String,
    /// Zero waits forever
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub table_format: TableFormat,
    /// Destination for downloads and local exports
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            scale: 30.0,
            crs: "EPSG:4326".to_string(),
            file_prefix: "flood_extents".to_string(),
            timeout_secs: 3600,
            poll_interval_secs: 5,
            table_format: TableFormat::Shapefile,
            output_dir: PathBuf::from("."),
        }
    }
}

impl ExportConfig {
    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            scale: self.scale,
            crs: self.crs.clone(),
            table_format: self.table_format,
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub flood: FloodParams,
    pub export: ExportConfig,
}

impl Config {
    /// `<config dir>/sarflood/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sarflood").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> FloodResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FloodError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
        Self::from_toml(&content).map_err(|e| match e {
            FloodError::Config(msg) => {
                FloodError::Config(format!("Failed to parse config file {}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> FloodResult<Self> {
        let config: Config = toml::from_str(content).map_err(|e| FloodError::Config(e.to_string()))?;
        config.flood.validate()?;
        Ok(config)
    }

    /// Load an explicit file, or the default file when it exists, or defaults
    pub fn load(path: Option<&Path>) -> FloodResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => {
                log::debug!("Loading configuration from {}", path.display());
                Self::from_file(path)
            }
            _ => {
                log::debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}
