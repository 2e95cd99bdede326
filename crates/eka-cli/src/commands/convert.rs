//! `eka compress` / `eka decompress`: switch between container forms.

use std::path::Path;

use anyhow::Context;
use eka_loader::payload::{compress_image, decompress_image};
use eka_loader::LoaderConfig;

use crate::output::StyledOutput;

pub fn compress(input: &Path, output: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let raw = super::read_image(input)?;
    let packed =
        compress_image(&raw).with_context(|| format!("Failed to compress {}", input.display()))?;
    super::write_image(output, &packed)?;

    out.success(&format!(
        "Compressed {} ({:#x} -> {:#x} bytes)",
        output.display(),
        raw.len(),
        packed.len()
    ));
    Ok(())
}

pub fn decompress(
    input: &Path,
    output: &Path,
    config: &LoaderConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let raw = super::read_image(input)?;
    let plain = decompress_image(&raw, config.max_image_size)
        .with_context(|| format!("Failed to decompress {}", input.display()))?;
    super::write_image(output, &plain)?;

    out.success(&format!(
        "Decompressed {} ({:#x} -> {:#x} bytes)",
        output.display(),
        raw.len(),
        plain.len()
    ));
    Ok(())
}
