use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extractor::batch::BatchOptions;
use crate::extractor::ExtractorConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub throttle: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            throttle: 3,
            inter_batch_delay_ms: 1000,
        }
    }
}

impl BatchSettings {
    pub fn options(&self) -> BatchOptions {
        BatchOptions {
            throttle: self.throttle,
            inter_batch_delay: Duration::from_millis(self.inter_batch_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub extractor: ExtractorConfig,
    pub batch: BatchSettings,
    pub database_path: PathBuf,
    /// JSON rule config replacing the built-in one.
    pub rules_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            extractor: ExtractorConfig::default(),
            batch: BatchSettings::default(),
            database_path: PathBuf::from("data/pagescore.sqlite"),
            rules_path: None,
        }
    }
}

/// Defaults, then `pagescore.{toml,json,yaml}` (or `path`), then
/// `PAGESCORE_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name("pagescore").required(false),
    };

    let mut settings: Settings = Config::builder()
        .add_source(Config::try_from(&Settings::default())?)
        .add_source(file)
        .add_source(
            Environment::with_prefix("PAGESCORE")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("reading configuration")?
        .try_deserialize()
        .context("invalid configuration")?;

    if settings.extractor.api_key.is_none() {
        settings.extractor.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
    }
    debug!(
        model = %settings.extractor.model,
        db = %settings.database_path.display(),
        has_key = settings.extractor.api_key.is_some(),
        "Configuration loaded"
    );
    Ok(settings)
}
