//! E32 image header
//!
//! ```text
//! 0x00  uid1, uid2, uid3, uid_checksum
//! 0x10  signature "EPOC", header_crc, module_version, compression_type
//! 0x20  tools_version, time_lo, time_hi, flags
//! 0x30  code_size, data_size, heap_size_min, heap_size_max
//! 0x40  stack_size, bss_size, entry_point, code_base
//! 0x50  data_base, dll_ref_table_count, export_dir_offset, export_dir_count
//! 0x60  text_size, code_offset, data_offset, import_offset
//! 0x70  code_reloc_offset, data_reloc_offset, process_priority (u16), cpu (u16)
//! 0x7C  end of header
//! ```
//!
//! All fields are little-endian. Compressed images follow the header with a
//! u32 holding the total uncompressed image size.

use std::fmt;
use std::ops::Range;

use crate::bytes::ByteWriter;
use crate::error::FormatError;

/// Header signature: "EPOC" read as a little-endian u32
pub const SIGNATURE: u32 = 0x434F_5045;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 0x7C;

/// Offset of the uncompressed-size slot that follows the header
pub const UNCOMPRESSED_SIZE_OFFSET: usize = HEADER_SIZE;

/// Compression UID for deflate-compressed images
pub const COMPRESSION_DEFLATE: u32 = 0x101F_7AFC;

/// Target CPU recorded in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cpu {
    /// ARMv4 (`0x2000`)
    ArmV4,
    /// ARMv5 (`0x2001`)
    ArmV5,
    /// ARMv6 (`0x2002`)
    ArmV6,
    /// Anything else, x86 builds included; kept verbatim
    Unknown(u16),
}

impl Cpu {
    /// Map a header CPU identifier
    pub fn from_code(code: u16) -> Self {
        match code {
            0x2000 => Cpu::ArmV4,
            0x2001 => Cpu::ArmV5,
            0x2002 => Cpu::ArmV6,
            other => Cpu::Unknown(other),
        }
    }

    /// Header CPU identifier
    pub fn code(self) -> u16 {
        match self {
            Cpu::ArmV4 => 0x2000,
            Cpu::ArmV5 => 0x2001,
            Cpu::ArmV6 => 0x2002,
            Cpu::Unknown(code) => code,
        }
    }

    /// Whether the relocation engine knows this architecture
    pub fn is_arm(self) -> bool {
        !matches!(self, Cpu::Unknown(_))
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cpu::ArmV4 => write!(f, "ARMv4"),
            Cpu::ArmV5 => write!(f, "ARMv5"),
            Cpu::ArmV6 => write!(f, "ARMv6"),
            Cpu::Unknown(code) => write!(f, "unknown ({:#06x})", code),
        }
    }
}

/// Payload compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Stored verbatim
    None,
    /// zlib/deflate stream after the size slot
    Deflate,
}

impl Compression {
    /// Map a header compression UID
    pub fn from_uid(uid: u32) -> Result<Self, FormatError> {
        match uid {
            0 => Ok(Compression::None),
            COMPRESSION_DEFLATE => Ok(Compression::Deflate),
            other => Err(FormatError::UnsupportedCompressionMode(other)),
        }
    }

    /// Header compression UID
    pub fn uid(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Deflate => COMPRESSION_DEFLATE,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Deflate => write!(f, "deflate"),
        }
    }
}

/// Version of the tool that produced the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToolsVersion {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Build number
    pub build: u16,
}

impl fmt::Display for ToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.major, self.minor, self.build)
    }
}

/// Decoded E32 image header.
///
/// The loader interprets sizes, offsets, compression and CPU. Everything else
/// is carried along for process creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// UID1..UID3 (image type, subtype, unique id)
    pub uids: [u32; 3],
    /// Checksum over the three UIDs
    pub uid_checksum: u32,
    /// Header CRC as stored
    pub header_crc: u32,
    /// Module version (major << 16 | minor)
    pub module_version: u32,
    /// Payload compression
    pub compression: Compression,
    /// Producing tool version
    pub tools_version: ToolsVersion,
    /// Build time, low word
    pub time_lo: u32,
    /// Build time, high word
    pub time_hi: u32,
    /// Image flags
    pub flags: u32,
    /// Code section size, import/export tables included
    pub code_size: u32,
    /// Initialized data size
    pub data_size: u32,
    /// Minimum heap size
    pub heap_size_min: u32,
    /// Maximum heap size
    pub heap_size_max: u32,
    /// Stack size
    pub stack_size: u32,
    /// Zero-initialized data size
    pub bss_size: u32,
    /// Entry point, relative to the image base
    pub entry_point: u32,
    /// Link-time code address
    pub code_base: u32,
    /// Link-time data address
    pub data_base: u32,
    /// Number of imported DLLs
    pub dll_ref_table_count: u32,
    /// Export directory offset
    pub export_dir_offset: u32,
    /// Number of exports
    pub export_dir_count: u32,
    /// Code size without the import address and export tables
    pub text_size: u32,
    /// Image offset of the code section
    pub code_offset: u32,
    /// Image offset of the data section
    pub data_offset: u32,
    /// Image offset of the import section
    pub import_offset: u32,
    /// Image offset of the code relocation directory (0 if none)
    pub code_reloc_offset: u32,
    /// Image offset of the data relocation directory (0 if none)
    pub data_reloc_offset: u32,
    /// Initial process priority
    pub process_priority: u16,
    /// Target CPU
    pub cpu: Cpu,
}

/// Little-endian field reads over a slice of exactly `HEADER_SIZE` bytes.
/// `decode` reads each field once, so no read runs past the end.
struct HeaderFields<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl HeaderFields<'_> {
    fn u8(&mut self) -> u8 {
        let value = self.bytes[self.pos];
        self.pos += 1;
        value
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes([self.u8(), self.u8()])
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes([self.u8(), self.u8(), self.u8(), self.u8()])
    }
}

impl ImageHeader {
    /// A zeroed, uncompressed header for the given CPU
    pub fn new(cpu: Cpu) -> Self {
        Self {
            uids: [0; 3],
            uid_checksum: 0,
            header_crc: 0,
            module_version: 0x000A_0000,
            compression: Compression::None,
            tools_version: ToolsVersion::default(),
            time_lo: 0,
            time_hi: 0,
            flags: 0,
            code_size: 0,
            data_size: 0,
            heap_size_min: 0,
            heap_size_max: 0,
            stack_size: 0,
            bss_size: 0,
            entry_point: 0,
            code_base: 0,
            data_base: 0,
            dll_ref_table_count: 0,
            export_dir_offset: 0,
            export_dir_count: 0,
            text_size: 0,
            code_offset: 0,
            data_offset: 0,
            import_offset: 0,
            code_reloc_offset: 0,
            data_reloc_offset: 0,
            process_priority: 0,
            cpu,
        }
    }

    /// Decode the header from the start of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut reader = HeaderFields {
            bytes: &data[..HEADER_SIZE],
            pos: 0,
        };

        let uids = [reader.u32(), reader.u32(), reader.u32()];
        let uid_checksum = reader.u32();

        let signature = reader.u32();
        if signature != SIGNATURE {
            return Err(FormatError::BadMagic(signature));
        }

        let header_crc = reader.u32();
        let module_version = reader.u32();
        let compression = Compression::from_uid(reader.u32())?;
        let tools_version = ToolsVersion {
            major: reader.u8(),
            minor: reader.u8(),
            build: reader.u16(),
        };

        let header = Self {
            uids,
            uid_checksum,
            header_crc,
            module_version,
            compression,
            tools_version,
            time_lo: reader.u32(),
            time_hi: reader.u32(),
            flags: reader.u32(),
            code_size: reader.u32(),
            data_size: reader.u32(),
            heap_size_min: reader.u32(),
            heap_size_max: reader.u32(),
            stack_size: reader.u32(),
            bss_size: reader.u32(),
            entry_point: reader.u32(),
            code_base: reader.u32(),
            data_base: reader.u32(),
            dll_ref_table_count: reader.u32(),
            export_dir_offset: reader.u32(),
            export_dir_count: reader.u32(),
            text_size: reader.u32(),
            code_offset: reader.u32(),
            data_offset: reader.u32(),
            import_offset: reader.u32(),
            code_reloc_offset: reader.u32(),
            data_reloc_offset: reader.u32(),
            process_priority: reader.u16(),
            cpu: Cpu::from_code(reader.u16()),
        };

        header.validate()?;
        Ok(header)
    }

    /// Check field relationships that the format guarantees
    pub fn validate(&self) -> Result<(), FormatError> {
        if self.code_size < self.text_size {
            return Err(FormatError::InvalidHeader(format!(
                "code size {:#x} is smaller than text size {:#x}",
                self.code_size, self.text_size
            )));
        }
        Ok(())
    }

    /// Encode to exactly [`HEADER_SIZE`] bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(HEADER_SIZE);

        for uid in self.uids {
            writer.emit_u32(uid);
        }
        writer.emit_u32(self.uid_checksum);
        writer.emit_u32(SIGNATURE);
        writer.emit_u32(self.header_crc);
        writer.emit_u32(self.module_version);
        writer.emit_u32(self.compression.uid());
        writer.emit_u8(self.tools_version.major);
        writer.emit_u8(self.tools_version.minor);
        writer.emit_u16(self.tools_version.build);
        for value in [
            self.time_lo,
            self.time_hi,
            self.flags,
            self.code_size,
            self.data_size,
            self.heap_size_min,
            self.heap_size_max,
            self.stack_size,
            self.bss_size,
            self.entry_point,
            self.code_base,
            self.data_base,
            self.dll_ref_table_count,
            self.export_dir_offset,
            self.export_dir_count,
            self.text_size,
            self.code_offset,
            self.data_offset,
            self.import_offset,
            self.code_reloc_offset,
            self.data_reloc_offset,
        ] {
            writer.emit_u32(value);
        }
        writer.emit_u16(self.process_priority);
        writer.emit_u16(self.cpu.code());

        debug_assert_eq!(writer.offset(), HEADER_SIZE);
        writer.into_bytes()
    }

    /// Whether the payload after the header is compressed
    pub fn is_compressed(&self) -> bool {
        self.compression != Compression::None
    }

    /// Combined size of the import address table and export directory
    pub fn import_export_size(&self) -> u32 {
        self.code_size.saturating_sub(self.text_size)
    }

    /// Code section (text + import/export tables) within the image
    pub fn code_range(&self) -> Range<usize> {
        let start = self.code_offset as usize;
        start..start.saturating_add(self.code_size as usize)
    }

    /// Executable text within the image
    pub fn text_range(&self) -> Range<usize> {
        let start = self.code_offset as usize;
        start..start.saturating_add(self.text_size as usize)
    }

    /// Initialized data section within the image
    pub fn data_range(&self) -> Range<usize> {
        let start = self.data_offset as usize;
        start..start.saturating_add(self.data_size as usize)
    }
}
