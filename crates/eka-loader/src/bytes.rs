//! Little-endian byte access
//!
//! Bounds-checked cursor reads over image bytes, and a growable writer used
//! to encode headers and relocation directories. Nothing here overlays
//! structures on raw memory; every multi-byte value is assembled from bytes.

/// A read ran past the end of the underlying slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnexpectedEnd {
    /// Position of the failed read
    pub offset: usize,
    /// Bytes the read wanted
    pub len: usize,
}

/// Cursor over a byte slice
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a new reader at position 0
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left after the current position
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Move to an absolute position (reads past the end still fail cleanly)
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], UnexpectedEnd> {
        let end = self
            .position
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(UnexpectedEnd {
                offset: self.position,
                len,
            })?;
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, UnexpectedEnd> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a 16-bit unsigned integer (little-endian)
    pub fn read_u16(&mut self) -> Result<u16, UnexpectedEnd> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit unsigned integer (little-endian)
    pub fn read_u32(&mut self) -> Result<u32, UnexpectedEnd> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Read a little-endian `u32` at `offset` without a cursor.
pub fn read_u32_at(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Growable little-endian encoder
#[derive(Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a writer with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer (little-endian)
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer (little-endian)
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pad with zeros up to a multiple of `align`
    pub fn align(&mut self, align: usize) {
        while self.buffer.len() % align != 0 {
            self.buffer.push(0);
        }
    }

    /// Overwrite a previously emitted u32 (e.g. a size known only at the end)
    ///
    /// # Panics
    /// Panics if `offset + 4` is past the bytes written so far.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}
