//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri della pipeline
//! - Fornisce validazione dei parametri di input
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce valori di default sensati per tutti i parametri
//!
//! ## Parametri di configurazione:
//! - `endpoint`: URL base del backend (default: None = backend locale)
//! - `output_format`: Formato di output forzato (default: None = formato del sorgente)
//! - `quality`: Qualità di encoding (default: None = default del formato)
//! - `max_file_size`: Limite in byte per file, controllato prima di ogni chiamata di rete (default: 10 MiB)
//! - `max_dimension`: Bounding box del backend locale (default: 2560)
//! - `max_concurrency`: Limite di pipeline concorrenti (default: None = nessun limite)
//! - `request_timeout_secs`: Timeout delle richieste HTTP (default: 120)
//! - `json_output`: Eventi JSON su stdout invece delle progress bar
//!
//! ## Esempio:
//! ```rust,ignore
//! let config = Config {
//!     output_format: Some(OutputFormat::Webp),
//!     quality: Some(75),
//!     ..Default::default()
//! };
//! config.validate()?;
//! ```

use crate::format::OutputFormat;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Configuration for the upload/optimize pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL (None = local backend)
    pub endpoint: Option<String>,
    /// Format override for every transform
    pub output_format: Option<OutputFormat>,
    /// Encoding quality
    pub quality: Option<u8>,
    /// Files above this many bytes are rejected before upload
    pub max_file_size: u64,
    /// Bounding box edge of the local backend
    pub max_dimension: u32,
    /// Upper bound on concurrent pipelines (None = unbounded)
    pub max_concurrency: Option<usize>,
    /// HTTP timeout in seconds
    pub request_timeout_secs: u64,
    /// Output state changes as JSON for programmatic use
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            output_format: None,
            quality: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_dimension: 2560,
            max_concurrency: None,
            request_timeout_secs: 120,
            json_output: false,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if let (Some(format), Some(quality)) = (self.output_format, self.quality) {
            let range = format.quality_range();
            if !range.contains(quality) {
                return Err(anyhow::anyhow!(
                    "Quality for {} must be between {} and {}",
                    format,
                    range.min,
                    range.max
                ));
            }
        } else if let Some(quality) = self.quality {
            if quality == 0 || quality > 100 {
                return Err(anyhow::anyhow!("Quality must be between 1 and 100"));
            }
        }

        if self.max_file_size == 0 {
            return Err(anyhow::anyhow!("Maximum file size must be greater than 0"));
        }

        if self.max_dimension == 0 {
            return Err(anyhow::anyhow!("Maximum dimension must be greater than 0"));
        }

        if self.max_concurrency == Some(0) {
            return Err(anyhow::anyhow!("Concurrency limit must be greater than 0"));
        }

        if let Some(ref endpoint) = self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(anyhow::anyhow!("Endpoint must be an http(s) URL: {}", endpoint));
            }
        }

        Ok(())
    }

    /// Quality to send for `format`: the configured value clamped to the format's range
    pub fn quality_for(&self, format: OutputFormat) -> u8 {
        let range = format.quality_range();
        self.quality
            .unwrap_or(range.default)
            .clamp(range.min, range.max)
    }

    /// Default location: `~/.upload-optimizer/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".upload-optimizer").join("config.json"))
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}
