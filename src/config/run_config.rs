use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::artifact_types::OutputKind;
use crate::constants::{
    DEFAULT_COORDINATE_SENTINELS, DEFAULT_HASH_MAX_SIZE_MB, DEFAULT_HTML_PAGE_SIZE,
    DEFAULT_MAX_INLINE_IMAGE_BYTES, MAX_CONCURRENCY,
};

/// Extra prefix rewrite tried when a pattern matches nothing as written
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LayoutRewrite {
    pub from: String,
    pub to: String,
}

/// Tunables for a report run, loaded from YAML
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunConfig {
    pub version: String,
    #[serde(default = "default_page_size")]
    pub html_page_size: usize,
    #[serde(default = "default_inline_image_bytes")]
    pub html_max_inline_image_bytes: usize,
    #[serde(default = "default_sinks")]
    pub enabled_sinks: Vec<OutputKind>,
    #[serde(default = "default_sentinels")]
    pub kml_sentinels: Vec<f64>,
    #[serde(default)]
    pub extra_layout_rewrites: Vec<LayoutRewrite>,
    /// Case database location; defaults to `<output>/case.db`
    #[serde(default)]
    pub case_db_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub hash_sources: bool,
    #[serde(default = "default_hash_max_size")]
    pub hash_max_size_mb: u64,
    /// Concurrent artifacts; defaults to twice the CPU count
    #[serde(default)]
    pub concurrency: Option<usize>,
}

fn default_page_size() -> usize {
    DEFAULT_HTML_PAGE_SIZE
}

fn default_inline_image_bytes() -> usize {
    DEFAULT_MAX_INLINE_IMAGE_BYTES
}

fn default_sinks() -> Vec<OutputKind> {
    OutputKind::ALL.to_vec()
}

fn default_sentinels() -> Vec<f64> {
    DEFAULT_COORDINATE_SENTINELS.to_vec()
}

fn default_true() -> bool {
    true
}

fn default_hash_max_size() -> u64 {
    DEFAULT_HASH_MAX_SIZE_MB
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            version: "1.0".to_string(),
            html_page_size: default_page_size(),
            html_max_inline_image_bytes: default_inline_image_bytes(),
            enabled_sinks: default_sinks(),
            kml_sentinels: default_sentinels(),
            extra_layout_rewrites: Vec::new(),
            case_db_path: None,
            hash_sources: true,
            hash_max_size_mb: default_hash_max_size(),
            concurrency: None,
        }
    }
}

impl RunConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: RunConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Create a default configuration YAML file
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        RunConfig::default().save_to_yaml_file(path)
    }

    pub fn sink_enabled(&self, kind: OutputKind) -> bool {
        self.enabled_sinks.contains(&kind)
    }

    /// Effective concurrency, clamped to `1..=MAX_CONCURRENCY`.
    pub fn effective_concurrency(&self) -> usize {
        let requested = self
            .concurrency
            .unwrap_or_else(|| std::cmp::min(num_cpus::get() * 2, MAX_CONCURRENCY));
        requested.clamp(1, MAX_CONCURRENCY)
    }
}

/// Load the configuration at `config_path`, or the defaults when none is given.
pub fn load_config(config_path: Option<&Path>) -> Result<RunConfig> {
    match config_path {
        Some(path) => RunConfig::from_yaml_file(path),
        None => {
            debug!("No config path provided, using default configuration");
            Ok(RunConfig::default())
        }
    }
}
