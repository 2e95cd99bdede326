//! Load errors

use crate::header::SIGNATURE;
use crate::reloc::{RelocKind, Section};
use thiserror::Error;

/// Everything that can make an image load fail.
///
/// A malformed image is a permanent failure for that load call. Unrecognized
/// relocation kinds are *not* errors; they are reported through
/// [`RelocSummary`](crate::RelocSummary).
#[derive(Debug, Error)]
pub enum FormatError {
    /// Header signature is not `"EPOC"`
    #[error("Invalid image signature: expected {SIGNATURE:#010x}, got {0:#010x}")]
    BadMagic(u32),

    /// Fewer bytes than a fixed-size structure needs
    #[error("Image truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Compressed payload could not be inflated to the declared size
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// A directory, entry or patch site lies outside the image buffer
    #[error("{what} at {offset:#x} (+{len}) lies outside the {bound:#x}-byte image")]
    OutOfBounds {
        /// What was being accessed
        what: &'static str,
        /// Start of the access
        offset: usize,
        /// Width of the access
        len: usize,
        /// Image length
        bound: usize,
    },

    /// Two relocation entries patch overlapping bytes
    #[error("Overlapping relocations at image offsets {first:#x} and {second:#x}")]
    OverlappingRelocation {
        /// Site of the lower entry
        first: usize,
        /// Site of the entry that overlaps it
        second: usize,
    },

    /// Compression UID the loader has no decoder for
    #[error("Unsupported compression type {0:#010x}")]
    UnsupportedCompressionMode(u32),

    /// Header fields contradict each other
    #[error("Invalid image header: {0}")]
    InvalidHeader(String),

    /// Relocation directory does not decode consistently
    #[error("Malformed {section} relocation directory at {offset:#x}: {reason}")]
    MalformedDirectory {
        /// Which directory
        section: Section,
        /// Image offset of the directory header
        offset: usize,
        /// What is inconsistent
        reason: String,
    },

    /// A range-limited relocation cannot encode its result
    #[error("{kind} relocation at {site:#x} out of range (displacement {value})")]
    RelocationOverflow {
        /// Relocation kind
        kind: RelocKind,
        /// Image offset of the patch site
        site: usize,
        /// Value that did not fit
        value: i64,
    },

    /// Relocation kind has no 4-bit code to encode into a directory entry
    #[error("{kind} relocation at {offset:#x} cannot be encoded in a directory entry")]
    UnencodableRelocation {
        /// Relocation kind
        kind: RelocKind,
        /// Section offset of the entry
        offset: u32,
    },

    /// Image is bigger than the configured limit
    #[error("Image size {declared} exceeds the limit of {limit} bytes")]
    ImageTooLarge {
        /// Declared or actual size
        declared: usize,
        /// Configured limit
        limit: usize,
    },

    /// Byte source failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_magic_message() {
        let err = FormatError::BadMagic(0xDEADBEEF);
        assert_eq!(
            err.to_string(),
            "Invalid image signature: expected 0x434f5045, got 0xdeadbeef"
        );
    }

    #[test]
    fn test_out_of_bounds_message() {
        let err = FormatError::OutOfBounds {
            what: "patch site",
            offset: 0x100,
            len: 4,
            bound: 0x102,
        };
        assert_eq!(
            err.to_string(),
            "patch site at 0x100 (+4) lies outside the 0x102-byte image"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FormatError = io.into();
        assert!(matches!(err, FormatError::Io(_)));
    }
}
