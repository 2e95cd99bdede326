//! Relocation directory decoding
//!
//! ```text
//! directory:  [size: u32][count: u32][block]...
//! block:      [page_offset: u32][block_size: u32][entry: u16]...
//! entry:      kind << 12 | offset_in_page
//! ```
//!
//! `block_size` counts its own 8-byte prefix. Entries with kind 0 pad a block
//! to a 4-byte boundary and are dropped. Every value read here comes from the
//! file, so every offset is checked against the image before use.

use crate::bytes::{ByteReader, ByteWriter, UnexpectedEnd};
use crate::error::FormatError;
use crate::header::ImageHeader;

use super::{
    RelocDirectory, RelocDirectoryHeader, RelocEntry, RelocKind, Section, BLOCK_HEADER_SIZE,
    DIRECTORY_HEADER_SIZE,
};

const PAGE_MASK: u32 = 0xFFF;

/// Read the directory of one section.
///
/// Returns `Ok(None)` when the header declares no directory (offset 0).
pub fn read_directory(
    image: &[u8],
    header: &ImageHeader,
    section: Section,
) -> Result<Option<RelocDirectory>, FormatError> {
    let (offset, section_start) = match section {
        Section::Code => (header.code_reloc_offset, header.code_offset),
        Section::Data => (header.data_reloc_offset, header.data_offset),
    };
    if offset == 0 {
        return Ok(None);
    }

    let offset = offset as usize;
    let section_start = section_start as usize;
    let bound = image.len();

    let mut reader = ByteReader::new(image);
    reader.seek(offset);
    let header_oob = move |_: UnexpectedEnd| FormatError::OutOfBounds {
        what: "relocation directory header",
        offset,
        len: DIRECTORY_HEADER_SIZE,
        bound,
    };
    let dir_header = RelocDirectoryHeader {
        size: reader.read_u32().map_err(header_oob)?,
        count: reader.read_u32().map_err(header_oob)?,
    };

    let body_start = offset + DIRECTORY_HEADER_SIZE;
    let body = reader
        .read_bytes(dir_header.size as usize)
        .map_err(|_| FormatError::OutOfBounds {
            what: "relocation directory",
            offset: body_start,
            len: dir_header.size as usize,
            bound,
        })?;

    let malformed = |reason: String| FormatError::MalformedDirectory {
        section,
        offset,
        reason,
    };

    // Capacity bounded by what the body can hold, not by the declared count
    let mut entries = Vec::with_capacity((dir_header.count as usize).min(body.len() / 2));
    let mut blocks = ByteReader::new(body);

    while blocks.remaining() > 0 {
        let block_at = body_start + blocks.position();
        let block_oob = move |_: UnexpectedEnd| FormatError::OutOfBounds {
            what: "relocation block",
            offset: block_at,
            len: BLOCK_HEADER_SIZE,
            bound,
        };
        let page_offset = blocks.read_u32().map_err(block_oob)?;
        let block_size = blocks.read_u32().map_err(block_oob)? as usize;

        if block_size < BLOCK_HEADER_SIZE || block_size % 2 != 0 {
            return Err(malformed(format!(
                "block at {:#x} has invalid size {:#x}",
                block_at, block_size
            )));
        }

        let entry_count = (block_size - BLOCK_HEADER_SIZE) / 2;
        for _ in 0..entry_count {
            let entry_at = body_start + blocks.position();
            let raw = blocks.read_u16().map_err(|_| FormatError::OutOfBounds {
                what: "relocation entry",
                offset: entry_at,
                len: 2,
                bound: body_start + body.len(),
            })?;

            let code = (raw >> 12) as u8;
            if code == 0 {
                continue;
            }
            if entries.len() == dir_header.count as usize {
                return Err(malformed(format!(
                    "more entries than the declared count {}",
                    dir_header.count
                )));
            }

            let kind = RelocKind::from_code(code);
            let entry_offset = page_offset
                .checked_add(u32::from(raw) & PAGE_MASK)
                .ok_or(FormatError::OutOfBounds {
                    what: "relocation entry",
                    offset: entry_at,
                    len: 2,
                    bound,
                })?;

            let site = section_start
                .checked_add(entry_offset as usize)
                .unwrap_or(usize::MAX);
            let width = kind.width().max(1);
            if site.checked_add(width).map_or(true, |end| end > bound) {
                return Err(FormatError::OutOfBounds {
                    what: "patch site",
                    offset: site,
                    len: width,
                    bound,
                });
            }

            entries.push(RelocEntry::new(entry_offset, kind));
        }
    }

    if entries.len() != dir_header.count as usize {
        return Err(malformed(format!(
            "declared {} entries, found {}",
            dir_header.count,
            entries.len()
        )));
    }

    log::debug!(
        "{} relocation directory at {:#x}: {} entries in {:#x} bytes",
        section,
        offset,
        entries.len(),
        dir_header.size
    );

    Ok(Some(RelocDirectory {
        section,
        section_start,
        offset,
        header: dir_header,
        entries,
    }))
}

/// Read the code directory and, when `include_data` is set, the data one.
pub fn read_directories(
    image: &[u8],
    header: &ImageHeader,
    include_data: bool,
) -> Result<Vec<RelocDirectory>, FormatError> {
    let mut directories = Vec::with_capacity(2);
    if let Some(code) = read_directory(image, header, Section::Code)? {
        directories.push(code);
    }
    if include_data {
        if let Some(data) = read_directory(image, header, Section::Data)? {
            directories.push(data);
        }
    }
    Ok(directories)
}

/// Encode entries as a directory (header included).
///
/// Entries are grouped into one block per 4 KiB page and each block is
/// padded to a 4-byte boundary. Kind codes must fit the entry's top nibble
/// and be non-zero (0 is padding); anything else is
/// [`FormatError::UnencodableRelocation`].
pub fn encode_directory(entries: &[RelocEntry]) -> Result<Vec<u8>, FormatError> {
    if let Some(bad) = entries
        .iter()
        .find(|e| e.kind.code() == 0 || e.kind.code() > 0xF)
    {
        return Err(FormatError::UnencodableRelocation {
            kind: bad.kind,
            offset: bad.offset,
        });
    }

    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|e| e.offset);

    let mut writer = ByteWriter::new();
    writer.emit_u32(0);
    writer.emit_u32(entries.len() as u32);

    let mut index = 0;
    while index < sorted.len() {
        let page = sorted[index].offset & !PAGE_MASK;
        let end = sorted[index..]
            .iter()
            .position(|e| e.offset & !PAGE_MASK != page)
            .map_or(sorted.len(), |n| index + n);
        let block = &sorted[index..end];

        let padded = block.len() + block.len() % 2;
        writer.emit_u32(page);
        writer.emit_u32((BLOCK_HEADER_SIZE + padded * 2) as u32);
        for entry in block {
            let code = u16::from(entry.kind.code());
            writer.emit_u16(code << 12 | (entry.offset & PAGE_MASK) as u16);
        }
        if padded != block.len() {
            writer.emit_u16(0);
        }
        index = end;
    }

    let size = (writer.offset() - DIRECTORY_HEADER_SIZE) as u32;
    writer.patch_u32(0, size);
    Ok(writer.into_bytes())
}
