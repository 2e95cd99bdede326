//! `eka info`: header summary of an image.

use std::path::Path;

use anyhow::Context;
use eka_loader::bytes::read_u32_at;
use eka_loader::{ImageHeader, HEADER_SIZE};

use crate::output::StyledOutput;

pub fn execute(file: &Path, out: &mut StyledOutput) -> anyhow::Result<()> {
    let raw = super::read_image(file)?;
    let header = ImageHeader::decode(&raw)
        .with_context(|| format!("{} is not a valid E32 image", file.display()))?;

    out.heading(&file.display().to_string());
    out.field(
        "UIDs",
        format!(
            "{:#010x} {:#010x} {:#010x}",
            header.uids[0], header.uids[1], header.uids[2]
        ),
    );
    out.field("CPU", header.cpu);
    match read_u32_at(&raw, HEADER_SIZE).filter(|_| header.is_compressed()) {
        Some(total) => out.field(
            "Compression",
            format!("{} ({:#x} -> {:#x} bytes)", header.compression, raw.len(), total),
        ),
        None => out.field("Compression", header.compression),
    }
    out.field(
        "Module version",
        format!("{}.{}", header.module_version >> 16, header.module_version & 0xFFFF),
    );
    out.field("Tools version", header.tools_version);
    out.field("Flags", format!("{:#010x}", header.flags));
    out.newline();

    out.field(
        "Code",
        format!("{:#x} bytes at {:#x}", header.code_size, header.code_offset),
    );
    out.field("Text", format!("{:#x} bytes", header.text_size));
    out.field(
        "Import/export",
        format!("{:#x} bytes", header.import_export_size()),
    );
    out.field(
        "Data",
        format!("{:#x} bytes at {:#x}", header.data_size, header.data_offset),
    );
    out.field("BSS", format!("{:#x} bytes", header.bss_size));
    out.field(
        "Heap",
        format!("{:#x} .. {:#x}", header.heap_size_min, header.heap_size_max),
    );
    out.field("Stack", format!("{:#x}", header.stack_size));
    out.field("Entry point", format!("{:#x}", header.entry_point));
    out.field("Exports", header.export_dir_count);
    out.field("DLL references", header.dll_ref_table_count);
    out.field("Code relocs at", format!("{:#x}", header.code_reloc_offset));
    out.field("Data relocs at", format!("{:#x}", header.data_reloc_offset));
    out.field("Priority", header.process_priority);
    out.flush();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eka_loader::{Cpu, ImageBuilder};
    use termcolor::ColorChoice;

    #[test]
    fn test_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"not an image").unwrap();

        let mut out = StyledOutput::new(ColorChoice::Never);
        let err = execute(&path, &mut out).unwrap_err();
        assert!(err.to_string().contains("junk.bin"));
    }

    #[test]
    fn test_reports_valid_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.exe");
        let raw = ImageBuilder::new(Cpu::ArmV5).code(vec![0; 8]).build().unwrap();
        std::fs::write(&path, raw).unwrap();

        let mut out = StyledOutput::new(ColorChoice::Never);
        execute(&path, &mut out).unwrap();
    }
}
