//! `eka` subcommands and the helpers they share.

pub mod convert;
pub mod info;
pub mod load;
pub mod relocs;

use std::path::Path;

use anyhow::Context;
use eka_loader::LoaderConfig;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG: &str = "eka.toml";

/// Resolve the loader configuration.
///
/// An explicit path must exist; the implicit `eka.toml` is optional.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<LoaderConfig> {
    let path = match explicit {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG).is_file() => Path::new(DEFAULT_CONFIG),
        None => return Ok(LoaderConfig::default()),
    };
    LoaderConfig::from_file(path)
        .with_context(|| format!("Failed to load config {}", path.display()))
}

/// Parse `0x`-prefixed hex or decimal addresses.
pub fn parse_address(text: &str) -> Result<u32, String> {
    let text = text.trim().replace('_', "");
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", text, e))
}

/// Read a whole file, naming it in the error.
pub fn read_image(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Write a whole file, naming it in the error.
pub fn write_image(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
