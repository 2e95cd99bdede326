//! `eka relocs`: dump the relocation directories.

use std::path::Path;

use anyhow::Context;
use eka_loader::payload::materialize;
use eka_loader::reloc::read_directories;
use eka_loader::LoaderConfig;

use crate::output::StyledOutput;

pub fn execute(file: &Path, config: &LoaderConfig, out: &mut StyledOutput) -> anyhow::Result<()> {
    let raw = super::read_image(file)?;
    let payload = materialize(&raw, config.max_image_size)
        .with_context(|| format!("Failed to materialize {}", file.display()))?;
    let directories = read_directories(payload.bytes(), payload.header(), true)
        .with_context(|| format!("Bad relocation data in {}", file.display()))?;

    if directories.is_empty() {
        out.line("No relocation directories");
        return Ok(());
    }

    for directory in &directories {
        out.heading(&format!(
            "{} relocations at {:#x}: {} entries, {:#x} bytes, section at {:#x}",
            directory.section,
            directory.offset,
            directory.header.count,
            directory.header.size,
            directory.section_start
        ));
        for entry in &directory.entries {
            let row = format!(
                "  {:#010x}  +{:<#7x} {}",
                directory.site(entry),
                entry.offset,
                entry.kind
            );
            if entry.kind.is_known() {
                out.line(&row);
            } else {
                out.warning(&row);
            }
        }
        out.newline();
    }
    out.flush();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eka_loader::{Cpu, ImageBuilder, ImageHeader, RelocEntry, RelocKind};
    use termcolor::ColorChoice;

    fn write_temp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_lists_both_directories() {
        let dir = tempfile::tempdir().unwrap();
        let raw = ImageBuilder::new(Cpu::ArmV5)
            .code(vec![0; 0x10])
            .data(vec![0; 4])
            .code_reloc(RelocEntry::new(4, RelocKind::Abs32))
            .code_reloc(RelocEntry::new(8, RelocKind::Unknown(0xB)))
            .data_reloc(RelocEntry::new(0, RelocKind::Rel32))
            .build()
            .unwrap();
        let path = write_temp(&dir, "app.exe", &raw);

        let mut out = StyledOutput::new(ColorChoice::Never);
        execute(&path, &LoaderConfig::default(), &mut out).unwrap();
    }

    #[test]
    fn test_image_without_directories() {
        let dir = tempfile::tempdir().unwrap();
        let raw = ImageBuilder::new(Cpu::ArmV5).code(vec![0; 8]).build().unwrap();
        let path = write_temp(&dir, "plain.exe", &raw);

        let mut out = StyledOutput::new(ColorChoice::Never);
        execute(&path, &LoaderConfig::default(), &mut out).unwrap();
    }

    #[test]
    fn test_malformed_directory_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = ImageBuilder::new(Cpu::ArmV5)
            .code(vec![0; 8])
            .code_reloc(RelocEntry::new(0, RelocKind::Abs32))
            .build()
            .unwrap();
        // Declare more entries than the directory holds
        let offset = ImageHeader::decode(&raw).unwrap().code_reloc_offset as usize;
        raw[offset + 4..offset + 8].copy_from_slice(&7u32.to_le_bytes());
        let path = write_temp(&dir, "broken.exe", &raw);

        let mut out = StyledOutput::new(ColorChoice::Never);
        let err = execute(&path, &LoaderConfig::default(), &mut out).unwrap_err();
        assert!(err.to_string().contains("broken.exe"));
        assert!(format!("{:#}", err).contains("Malformed code relocation directory"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = StyledOutput::new(ColorChoice::Never);
        let err = execute(&dir.path().join("gone.exe"), &LoaderConfig::default(), &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("gone.exe"));
    }
}
