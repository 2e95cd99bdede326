//! `eka load`: materialize and relocate an image.

use std::path::Path;

use anyhow::Context;
use eka_loader::{Loader, LoaderConfig};

use crate::output::StyledOutput;

pub fn execute(
    file: &Path,
    base: Option<u32>,
    output: Option<&Path>,
    config: &LoaderConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(base) = base {
        config.base_address = base;
    }
    config.validate()?;

    let raw = super::read_image(file)?;
    let image = Loader::new(config)
        .load_bytes(&raw)
        .with_context(|| format!("Failed to load {}", file.display()))?;

    out.heading(&file.display().to_string());
    out.field("CPU", image.header().cpu);
    out.field("Base", format!("{:#010x}", image.base()));
    out.field("Entry point", format!("{:#010x}", image.entry_point()));
    out.field("Image size", format!("{:#x} bytes", image.bytes().len()));
    out.field("Relocations", image.summary().applied);
    out.field("CRC-32", format!("{:#010x}", image.checksum()));

    let summary = image.summary();
    if !summary.is_complete() {
        out.warning(&format!("{} relocation(s) left unpatched:", summary.skipped));
        for skipped in &summary.skipped_sites {
            out.line(&format!(
                "  {:#010x}  {} section, kind {:#x}",
                skipped.site, skipped.section, skipped.code
            ));
        }
    }

    if let Some(path) = output {
        super::write_image(path, image.bytes())?;
        out.success(&format!("Wrote {}", path.display()));
    }
    out.flush();

    Ok(())
}
