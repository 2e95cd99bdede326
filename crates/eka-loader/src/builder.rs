//! Synthetic E32 image construction
//!
//! Used by the test suites, the benchmarks and the `eka` tool to produce
//! well-formed containers:
//!
//! ```text
//! 0x00  header
//! 0x7C  size slot (total image size)
//! 0x80  code
//!       data                (4-byte aligned)
//!       code relocations    (4-byte aligned, if any)
//!       data relocations    (4-byte aligned, if any)
//! ```

use crate::bytes::ByteWriter;
use crate::error::FormatError;
use crate::header::{Compression, Cpu, ImageHeader, HEADER_SIZE};
use crate::payload::{compress_image, STORED_PREFIX};
use crate::reloc::{encode_directory, RelocEntry};

/// Builder for E32 containers
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    header: ImageHeader,
    code: Vec<u8>,
    text_size: Option<u32>,
    data: Vec<u8>,
    code_relocs: Vec<RelocEntry>,
    data_relocs: Vec<RelocEntry>,
}

impl ImageBuilder {
    /// Empty image for `cpu`
    pub fn new(cpu: Cpu) -> Self {
        Self {
            header: ImageHeader::new(cpu),
            code: Vec::new(),
            text_size: None,
            data: Vec::new(),
            code_relocs: Vec::new(),
            data_relocs: Vec::new(),
        }
    }

    /// Code section contents (text followed by import/export tables)
    pub fn code(mut self, code: Vec<u8>) -> Self {
        self.code = code;
        self
    }

    /// Text size; defaults to the whole code section
    pub fn text_size(mut self, size: u32) -> Self {
        self.text_size = Some(size);
        self
    }

    /// Initialized data contents
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Entry point relative to the image base
    pub fn entry_point(mut self, entry: u32) -> Self {
        self.header.entry_point = entry;
        self
    }

    /// UID1..UID3
    pub fn uids(mut self, uids: [u32; 3]) -> Self {
        self.header.uids = uids;
        self
    }

    /// Payload compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.header.compression = compression;
        self
    }

    /// Add a relocation relative to the code section
    pub fn code_reloc(mut self, entry: RelocEntry) -> Self {
        self.code_relocs.push(entry);
        self
    }

    /// Add a relocation relative to the data section
    pub fn data_reloc(mut self, entry: RelocEntry) -> Self {
        self.data_relocs.push(entry);
        self
    }

    /// Header the built image will carry, offsets not yet filled in
    pub fn header_mut(&mut self) -> &mut ImageHeader {
        &mut self.header
    }

    /// Lay out and encode the container
    pub fn build(&self) -> Result<Vec<u8>, FormatError> {
        let mut header = self.header.clone();
        let compression = header.compression;
        header.compression = Compression::None;

        header.code_size = section_size(self.code.len())?;
        header.text_size = self.text_size.unwrap_or(header.code_size);
        header.data_size = section_size(self.data.len())?;
        header.validate()?;

        let mut writer = ByteWriter::with_capacity(STORED_PREFIX + self.code.len() + self.data.len());
        writer.emit_bytes(&[0; HEADER_SIZE]);
        writer.emit_u32(0);

        header.code_offset = writer.offset() as u32;
        writer.emit_bytes(&self.code);
        writer.align(4);

        header.data_offset = writer.offset() as u32;
        writer.emit_bytes(&self.data);
        writer.align(4);

        if !self.code_relocs.is_empty() {
            header.code_reloc_offset = writer.offset() as u32;
            writer.emit_bytes(&encode_directory(&self.code_relocs)?);
            writer.align(4);
        }
        if !self.data_relocs.is_empty() {
            header.data_reloc_offset = writer.offset() as u32;
            writer.emit_bytes(&encode_directory(&self.data_relocs)?);
            writer.align(4);
        }

        let total = section_size(writer.offset())?;
        writer.patch_u32(HEADER_SIZE, total);
        let mut image = writer.into_bytes();
        image[..HEADER_SIZE].copy_from_slice(&header.encode());

        match compression {
            Compression::None => Ok(image),
            Compression::Deflate => compress_image(&image),
        }
    }
}

fn section_size(len: usize) -> Result<u32, FormatError> {
    u32::try_from(len).map_err(|_| FormatError::ImageTooLarge {
        declared: len,
        limit: u32::MAX as usize,
    })
}
