//! Relocation directories and the ARM relocation engine
//!
//! - **directory**: locate and decode the code/data directories
//! - **apply**: patch an image against a load base

pub mod apply;
pub mod directory;

use std::fmt;

pub use apply::{patch, PatchOverflow, RelocSummary, Relocator, SkippedReloc};
pub use directory::{encode_directory, read_directories, read_directory};

/// Which section a relocation directory covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Code section, entries relative to `code_offset`
    Code,
    /// Data section, entries relative to `data_offset`
    Data,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Code => write!(f, "code"),
            Section::Data => write!(f, "data"),
        }
    }
}

/// ARM relocation kind, stored in the top nibble of each entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    /// 32-bit absolute word
    Abs32,
    /// 32-bit PC-relative word
    Rel32,
    /// `LDR Rt, [PC, #±imm12]` offset
    LdrPcG0,
    /// `MOVW` 16-bit immediate split into imm4:imm12
    Abs16,
    /// 12-bit immediate field
    Abs12,
    /// Thumb 5-bit immediate field
    ThmAbs5,
    /// 8-bit byte
    Abs8,
    /// Kind code the engine does not apply
    Unknown(u8),
}

impl RelocKind {
    /// Map a kind code
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => RelocKind::Abs32,
            0x03 => RelocKind::Rel32,
            0x04 => RelocKind::LdrPcG0,
            0x05 => RelocKind::Abs16,
            0x06 => RelocKind::Abs12,
            0x07 => RelocKind::ThmAbs5,
            0x08 => RelocKind::Abs8,
            other => RelocKind::Unknown(other),
        }
    }

    /// Kind code
    pub fn code(self) -> u8 {
        match self {
            RelocKind::Abs32 => 0x02,
            RelocKind::Rel32 => 0x03,
            RelocKind::LdrPcG0 => 0x04,
            RelocKind::Abs16 => 0x05,
            RelocKind::Abs12 => 0x06,
            RelocKind::ThmAbs5 => 0x07,
            RelocKind::Abs8 => 0x08,
            RelocKind::Unknown(code) => code,
        }
    }

    /// Bytes the patch reads and writes; 0 for unknown kinds
    pub fn width(self) -> usize {
        match self {
            RelocKind::Abs32
            | RelocKind::Rel32
            | RelocKind::LdrPcG0
            | RelocKind::Abs16
            | RelocKind::Abs12 => 4,
            RelocKind::ThmAbs5 => 2,
            RelocKind::Abs8 => 1,
            RelocKind::Unknown(_) => 0,
        }
    }

    /// Whether the engine applies this kind
    pub fn is_known(self) -> bool {
        !matches!(self, RelocKind::Unknown(_))
    }
}

impl fmt::Display for RelocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocKind::Abs32 => write!(f, "abs32"),
            RelocKind::Rel32 => write!(f, "rel32"),
            RelocKind::LdrPcG0 => write!(f, "ldr_pc_g0"),
            RelocKind::Abs16 => write!(f, "abs16"),
            RelocKind::Abs12 => write!(f, "abs12"),
            RelocKind::ThmAbs5 => write!(f, "thm_abs5"),
            RelocKind::Abs8 => write!(f, "abs8"),
            RelocKind::Unknown(code) => write!(f, "unknown({:#x})", code),
        }
    }
}

/// One patch instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocEntry {
    /// Byte offset of the site from the section start
    pub offset: u32,
    /// What to patch there
    pub kind: RelocKind,
}

impl RelocEntry {
    /// Create an entry
    pub fn new(offset: u32, kind: RelocKind) -> Self {
        Self { offset, kind }
    }
}

/// `{size, count}` prefix of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelocDirectoryHeader {
    /// Byte length of the block stream after this header
    pub size: u32,
    /// Number of non-padding entries
    pub count: u32,
}

/// Size of [`RelocDirectoryHeader`] on disk
pub const DIRECTORY_HEADER_SIZE: usize = 8;

/// Size of a block's `{page_offset, block_size}` prefix
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Decoded relocation directory of one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocDirectory {
    /// Section the entries are relative to
    pub section: Section,
    /// Image offset the section starts at
    pub section_start: usize,
    /// Image offset of the directory header
    pub offset: usize,
    /// Declared size and count
    pub header: RelocDirectoryHeader,
    /// Entries in file order, padding removed
    pub entries: Vec<RelocEntry>,
}

impl RelocDirectory {
    /// Image offset an entry patches
    pub fn site(&self, entry: &RelocEntry) -> usize {
        self.section_start + entry.offset as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        for code in 0u8..16 {
            assert_eq!(RelocKind::from_code(code).code(), code);
        }
        assert_eq!(RelocKind::from_code(2), RelocKind::Abs32);
        assert_eq!(RelocKind::from_code(8), RelocKind::Abs8);
        assert_eq!(RelocKind::from_code(9), RelocKind::Unknown(9));
    }

    #[test]
    fn test_kind_widths() {
        assert_eq!(RelocKind::Abs32.width(), 4);
        assert_eq!(RelocKind::Abs16.width(), 4);
        assert_eq!(RelocKind::ThmAbs5.width(), 2);
        assert_eq!(RelocKind::Abs8.width(), 1);
        assert_eq!(RelocKind::Unknown(1).width(), 0);
        assert!(!RelocKind::Unknown(1).is_known());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(RelocKind::LdrPcG0.to_string(), "ldr_pc_g0");
        assert_eq!(RelocKind::Unknown(0xB).to_string(), "unknown(0xb)");
        assert_eq!(Section::Data.to_string(), "data");
    }
}
