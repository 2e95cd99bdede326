//! Payload materialization
//!
//! Turns container bytes into the flat image the relocation engine patches.
//!
//! ```text
//! uncompressed:  [header][size slot][code][data][relocs]   copied as-is
//! compressed:    [header][size][zlib stream ..........]
//!                   │       │          │ inflate
//!                   ▼       ▼          ▼
//!                [header][size][code][data][relocs]        exactly `size` bytes
//! ```
//!
//! The header and the size field are never compressed; they are copied to
//! the front of the output verbatim.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression as Level, Decompress, FlushDecompress, Status};

use crate::bytes::read_u32_at;
use crate::error::FormatError;
use crate::header::{Compression, ImageHeader, HEADER_SIZE, UNCOMPRESSED_SIZE_OFFSET};

/// Bytes that precede the compressed stream: header plus the size field
pub const STORED_PREFIX: usize = HEADER_SIZE + 4;

/// Materialized, not yet relocated image
#[derive(Debug, Clone)]
pub struct Payload {
    header: ImageHeader,
    uncompressed_size: Option<u32>,
    bytes: Vec<u8>,
}

impl Payload {
    /// Decoded header
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// Declared total size, present only for compressed containers
    pub fn uncompressed_size(&self) -> Option<u32> {
        self.uncompressed_size
    }

    /// Image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Image length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image holds no bytes (never true for a decoded payload)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Split into header, size field and bytes
    pub fn into_parts(self) -> (ImageHeader, Option<u32>, Vec<u8>) {
        (self.header, self.uncompressed_size, self.bytes)
    }
}

/// Decode the header and produce the flat image.
///
/// `max_image_size` caps both raw and declared sizes so a hostile size field
/// cannot force a huge allocation.
pub fn materialize(raw: &[u8], max_image_size: usize) -> Result<Payload, FormatError> {
    let header = ImageHeader::decode(raw)?;

    match header.compression {
        Compression::None => {
            if raw.len() > max_image_size {
                return Err(FormatError::ImageTooLarge {
                    declared: raw.len(),
                    limit: max_image_size,
                });
            }
            log::debug!("Uncompressed image, {:#x} bytes", raw.len());
            Ok(Payload {
                header,
                uncompressed_size: None,
                bytes: raw.to_vec(),
            })
        }
        Compression::Deflate => {
            let declared = read_u32_at(raw, UNCOMPRESSED_SIZE_OFFSET).ok_or(
                FormatError::Truncated {
                    needed: STORED_PREFIX,
                    available: raw.len(),
                },
            )?;
            let total = declared as usize;
            if total < STORED_PREFIX {
                return Err(FormatError::DecompressionFailed(format!(
                    "declared size {:#x} is smaller than the {:#x}-byte stored prefix",
                    total, STORED_PREFIX
                )));
            }
            if total > max_image_size {
                return Err(FormatError::ImageTooLarge {
                    declared: total,
                    limit: max_image_size,
                });
            }

            let mut bytes = vec![0u8; total];
            bytes[..STORED_PREFIX].copy_from_slice(&raw[..STORED_PREFIX]);
            inflate_exact(&raw[STORED_PREFIX..], &mut bytes[STORED_PREFIX..])?;

            log::debug!(
                "Inflated {:#x} compressed bytes into a {:#x}-byte image",
                raw.len() - STORED_PREFIX,
                total
            );
            Ok(Payload {
                header,
                uncompressed_size: Some(declared),
                bytes,
            })
        }
    }
}

/// Inflate a zlib stream so that it fills `out` exactly.
///
/// Output goes straight into `out`; once it is full, a one-byte spill slot
/// detects streams that would decode further.
fn inflate_exact(input: &[u8], out: &mut [u8]) -> Result<(), FormatError> {
    let mut inflater = Decompress::new(true);
    let mut spill = [0u8; 1];

    loop {
        let consumed = inflater.total_in() as usize;
        let written = inflater.total_out() as usize;
        let target: &mut [u8] = if written < out.len() {
            &mut out[written..]
        } else {
            &mut spill
        };

        let status = inflater
            .decompress(&input[consumed..], target, FlushDecompress::Finish)
            .map_err(|e| FormatError::DecompressionFailed(e.to_string()))?;

        let now_written = inflater.total_out() as usize;
        if now_written > out.len() {
            return Err(FormatError::DecompressionFailed(format!(
                "stream decodes past the declared {:#x} bytes",
                out.len()
            )));
        }

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let no_progress =
                    inflater.total_in() as usize == consumed && now_written == written;
                if no_progress {
                    return Err(FormatError::DecompressionFailed(format!(
                        "stream ended after {:#x} of {:#x} bytes",
                        now_written,
                        out.len()
                    )));
                }
            }
        }
    }

    let written = inflater.total_out() as usize;
    if written != out.len() {
        return Err(FormatError::DecompressionFailed(format!(
            "stream produced {:#x} bytes, expected {:#x}",
            written,
            out.len()
        )));
    }
    Ok(())
}

/// Reject uncompressed images whose sections start inside the size slot.
fn check_size_slot_reserved(header: &ImageHeader) -> Result<(), FormatError> {
    let sections = [
        ("code", header.code_offset, header.code_size),
        ("data", header.data_offset, header.data_size),
        ("import", header.import_offset, 0),
        ("code relocation", header.code_reloc_offset, 0),
        ("data relocation", header.data_reloc_offset, 0),
    ];
    for (name, offset, size) in sections {
        let present = offset != 0 || size != 0;
        if present && (offset as usize) < STORED_PREFIX {
            return Err(FormatError::InvalidHeader(format!(
                "{} section at {:#x} overlaps the size slot at {:#x}",
                name, offset, UNCOMPRESSED_SIZE_OFFSET
            )));
        }
    }
    Ok(())
}

/// Convert an uncompressed container into a deflate-compressed one.
///
/// The image must reserve the size slot after the header; it receives the
/// total image size. Images that keep section bytes there are rejected with
/// [`FormatError::InvalidHeader`].
pub fn compress_image(image: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut header = ImageHeader::decode(image)?;
    if header.is_compressed() {
        return Err(FormatError::InvalidHeader(
            "image is already compressed".to_string(),
        ));
    }
    check_size_slot_reserved(&header)?;
    if image.len() < STORED_PREFIX {
        return Err(FormatError::Truncated {
            needed: STORED_PREFIX,
            available: image.len(),
        });
    }
    let total = u32::try_from(image.len()).map_err(|_| FormatError::ImageTooLarge {
        declared: image.len(),
        limit: u32::MAX as usize,
    })?;

    header.compression = Compression::Deflate;
    let mut out = header.encode();
    out.extend_from_slice(&total.to_le_bytes());

    let mut encoder = ZlibEncoder::new(out, Level::best());
    encoder.write_all(&image[STORED_PREFIX..])?;
    Ok(encoder.finish()?)
}

/// Convert a compressed container back into an uncompressed one.
///
/// The size slot keeps the declared total size.
pub fn decompress_image(raw: &[u8], max_image_size: usize) -> Result<Vec<u8>, FormatError> {
    let (mut header, _, mut bytes) = materialize(raw, max_image_size)?.into_parts();
    if header.is_compressed() {
        header.compression = Compression::None;
        bytes[..HEADER_SIZE].copy_from_slice(&header.encode());
    }
    Ok(bytes)
}
