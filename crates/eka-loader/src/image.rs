//! Loaded image assembly

use std::ops::Range;
use std::sync::Arc;

use crate::error::FormatError;
use crate::header::ImageHeader;
use crate::payload::Payload;
use crate::reloc::{RelocDirectory, RelocSummary, Relocator};

/// A materialized, relocated E32 image ready for process creation.
///
/// Immutable once built. The pristine (unrelocated) bytes are shared between
/// an image and any image derived from it with [`rebase`](Self::rebase).
#[derive(Debug, Clone)]
pub struct LoadedImage {
    header: ImageHeader,
    uncompressed_size: Option<u32>,
    relocator: Relocator,
    pristine: Arc<[u8]>,
    directories: Arc<[RelocDirectory]>,
    bytes: Vec<u8>,
    summary: RelocSummary,
}

impl LoadedImage {
    /// Relocate a payload and freeze the result.
    pub fn assemble(
        payload: Payload,
        directories: Vec<RelocDirectory>,
        relocator: Relocator,
    ) -> Result<Self, FormatError> {
        let (header, uncompressed_size, bytes) = payload.into_parts();
        Self::relocate(
            header,
            uncompressed_size,
            Arc::from(bytes),
            Arc::from(directories),
            relocator,
        )
    }

    fn relocate(
        header: ImageHeader,
        uncompressed_size: Option<u32>,
        pristine: Arc<[u8]>,
        directories: Arc<[RelocDirectory]>,
        relocator: Relocator,
    ) -> Result<Self, FormatError> {
        let mut bytes = pristine.to_vec();
        let summary = relocator.apply(&mut bytes, &directories)?;

        log::debug!(
            "Relocated to {:#010x}: {} applied, {} skipped",
            relocator.base(),
            summary.applied,
            summary.skipped
        );

        Ok(Self {
            header,
            uncompressed_size,
            relocator,
            pristine,
            directories,
            bytes,
            summary,
        })
    }

    /// The same image relocated to a different base.
    ///
    /// Starts from the pristine bytes, so addends are never read from an
    /// already-patched buffer.
    pub fn rebase(&self, base: u32) -> Result<Self, FormatError> {
        Self::relocate(
            self.header.clone(),
            self.uncompressed_size,
            Arc::clone(&self.pristine),
            Arc::clone(&self.directories),
            Relocator::new(base).with_overlap_check(self.relocator.checks_overlaps()),
        )
    }

    /// Decoded header
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Declared total size, for compressed containers only
    pub fn uncompressed_size(&self) -> Option<u32> {
        self.uncompressed_size
    }

    /// Runtime address of the first image byte
    pub fn base(&self) -> u32 {
        self.relocator.base()
    }

    /// Runtime address of the entry point
    pub fn entry_point(&self) -> u32 {
        self.base().wrapping_add(self.header.entry_point)
    }

    /// Code section (text + import/export tables) within the image
    pub fn code_range(&self) -> Range<usize> {
        self.header.code_range()
    }

    /// Text within the image
    pub fn text_range(&self) -> Range<usize> {
        self.header.text_range()
    }

    /// Data section within the image
    pub fn data_range(&self) -> Range<usize> {
        self.header.data_range()
    }

    /// Import address table plus export directory size
    pub fn import_export_size(&self) -> u32 {
        self.header.import_export_size()
    }

    /// Relocated code bytes, if the header's code range lies inside the image
    pub fn code(&self) -> Option<&[u8]> {
        self.bytes.get(self.code_range())
    }

    /// Relocated data bytes, if the header's data range lies inside the image
    pub fn data(&self) -> Option<&[u8]> {
        self.bytes.get(self.data_range())
    }

    /// Final, relocated image
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image exactly as materialized, before relocation
    pub fn pristine(&self) -> &[u8] {
        &self.pristine
    }

    /// Relocation directories that were applied
    pub fn directories(&self) -> &[RelocDirectory] {
        &self.directories
    }

    /// Applied and skipped relocation counts
    pub fn summary(&self) -> &RelocSummary {
        &self.summary
    }

    /// CRC-32 of the relocated image
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.bytes)
    }

    /// Hand the relocated bytes over to the caller
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Cpu;
    use crate::payload::materialize;
    use crate::reloc::{read_directories, RelocEntry, RelocKind};
    use crate::ImageBuilder;

    fn assemble(raw: &[u8], base: u32) -> LoadedImage {
        let payload = materialize(raw, usize::MAX).unwrap();
        let directories = read_directories(payload.bytes(), payload.header(), true).unwrap();
        LoadedImage::assemble(payload, directories, Relocator::new(base)).unwrap()
    }

    fn sample() -> Vec<u8> {
        let mut code = vec![0u8; 0x40];
        code[0x10..0x14].copy_from_slice(&0x100u32.to_le_bytes());
        ImageBuilder::new(Cpu::ArmV6)
            .code(code)
            .text_size(0x30)
            .entry_point(0x8)
            .code_reloc(RelocEntry::new(0x10, RelocKind::Abs32))
            .build()
            .unwrap()
    }

    #[test]
    fn test_accessors() {
        let image = assemble(&sample(), 0x7000_0000);
        let code_start = image.header().code_offset as usize;

        assert_eq!(image.base(), 0x7000_0000);
        assert_eq!(image.entry_point(), 0x7000_0000 + 0x8);
        assert_eq!(image.code_range(), code_start..code_start + 0x40);
        assert_eq!(image.text_range(), code_start..code_start + 0x30);
        assert_eq!(image.import_export_size(), 0x10);
        assert_eq!(image.code().unwrap().len(), 0x40);
        assert_eq!(image.summary().applied, 1);
        assert_eq!(image.bytes().len(), image.pristine().len());
    }

    #[test]
    fn test_patched_and_pristine_differ_only_at_sites() {
        let image = assemble(&sample(), 0x7000_0000);
        let site = image.header().code_offset as usize + 0x10;

        assert_eq!(&image.pristine()[site..site + 4], &0x100u32.to_le_bytes());
        assert_eq!(&image.bytes()[site..site + 4], &0x7000_0100u32.to_le_bytes());
        assert_eq!(&image.bytes()[..site], &image.pristine()[..site]);
        assert_eq!(&image.bytes()[site + 4..], &image.pristine()[site + 4..]);
    }

    #[test]
    fn test_rebase_reads_pristine_addends() {
        let image = assemble(&sample(), 0x7000_0000);
        let rebased = image.rebase(0x4000_0000).unwrap();
        let site = image.header().code_offset as usize + 0x10;

        assert_eq!(&rebased.bytes()[site..site + 4], &0x4000_0100u32.to_le_bytes());
        assert_eq!(rebased.entry_point(), 0x4000_0008);

        let back = rebased.rebase(0x7000_0000).unwrap();
        assert_eq!(back.bytes(), image.bytes());
        assert_eq!(back.checksum(), image.checksum());
    }

    #[test]
    fn test_into_bytes() {
        let image = assemble(&sample(), 0x1000);
        let expected = image.bytes().to_vec();
        assert_eq!(image.into_bytes(), expected);
    }
}
