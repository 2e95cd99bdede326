//! Loader configuration (`eka.toml`)
//!
//! ```toml
//! [loader]
//! base_address = 0x70000000
//! max_image_size = 67108864
//! check_overlaps = true
//! relocate_data = true
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::STORED_PREFIX;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Values that make no sense together
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

fn default_base_address() -> u32 {
    0x7000_0000
}

fn default_max_image_size() -> usize {
    64 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// How images are loaded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Base used when the caller does not supply one
    #[serde(default = "default_base_address")]
    pub base_address: u32,

    /// Largest raw or declared image size accepted
    #[serde(default = "default_max_image_size")]
    pub max_image_size: usize,

    /// Reject relocation entries whose sites overlap
    #[serde(default = "default_true")]
    pub check_overlaps: bool,

    /// Apply the data relocation directory as well as the code one
    #[serde(default = "default_true")]
    pub relocate_data: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_address: default_base_address(),
            max_image_size: default_max_image_size(),
            check_overlaps: true,
            relocate_data: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    loader: LoaderConfig,
}

impl LoaderConfig {
    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse from TOML text
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.loader.validate()?;
        Ok(file.loader)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_address % 4 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "base address {:#x} is not word aligned",
                self.base_address
            )));
        }
        if self.max_image_size < STORED_PREFIX {
            return Err(ConfigError::ValidationError(format!(
                "max_image_size {} cannot hold an image header",
                self.max_image_size
            )));
        }
        Ok(())
    }
}
