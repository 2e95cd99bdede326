//! Image loading entry points
//!
//! Wires the header parser, payload materializer, directory reader and
//! relocation engine together behind [`Loader`].

use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::LoaderConfig;
use crate::error::FormatError;
use crate::header::ImageHeader;
use crate::image::LoadedImage;
use crate::payload::materialize;
use crate::reloc::{read_directories, Relocator};

/// Where image bytes come from
#[derive(Debug, Clone)]
pub enum ImageSource<'a> {
    /// A file on disk
    Path(PathBuf),
    /// Bytes already in memory
    Bytes(Cow<'a, [u8]>),
}

impl<'a> From<&'a Path> for ImageSource<'a> {
    fn from(path: &'a Path) -> Self {
        ImageSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for ImageSource<'_> {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

impl<'a> From<&'a [u8]> for ImageSource<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        ImageSource::Bytes(Cow::Borrowed(bytes))
    }
}

impl From<Vec<u8>> for ImageSource<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(Cow::Owned(bytes))
    }
}

/// Supplies the load base for an image.
///
/// This is the seam to the emulator's memory manager: it sees the decoded
/// header and the materialized image size before any byte is patched.
pub trait BaseProvider {
    /// Base address for an image of `image_size` bytes
    fn base_for(&mut self, header: &ImageHeader, image_size: usize) -> u32;
}

/// Always the same base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBase(pub u32);

impl BaseProvider for FixedBase {
    fn base_for(&mut self, _header: &ImageHeader, _image_size: usize) -> u32 {
        self.0
    }
}

impl<F> BaseProvider for F
where
    F: FnMut(&ImageHeader, usize) -> u32,
{
    fn base_for(&mut self, header: &ImageHeader, image_size: usize) -> u32 {
        self(header, image_size)
    }
}

/// Loads E32 images according to a [`LoaderConfig`]
#[derive(Debug, Clone, Default)]
pub struct Loader {
    config: LoaderConfig,
}

impl Loader {
    /// Loader with the given configuration
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load from any source at the configured base
    pub fn load<'a>(&self, source: impl Into<ImageSource<'a>>) -> Result<LoadedImage, FormatError> {
        match source.into() {
            ImageSource::Path(path) => self.load_file(&path),
            ImageSource::Bytes(bytes) => self.load_bytes(&bytes),
        }
    }

    /// Load a file at the configured base
    pub fn load_file(&self, path: &Path) -> Result<LoadedImage, FormatError> {
        let mut file = File::open(path)?;
        self.load_reader(&mut file)
    }

    /// Load from a seekable reader at the configured base.
    ///
    /// The stream length is taken by seeking to its end and checked against
    /// `max_image_size` before anything is read.
    pub fn load_reader<R: Read + Seek>(&self, reader: &mut R) -> Result<LoadedImage, FormatError> {
        let len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let len = usize::try_from(len).unwrap_or(usize::MAX);
        if len > self.config.max_image_size {
            return Err(FormatError::ImageTooLarge {
                declared: len,
                limit: self.config.max_image_size,
            });
        }

        let mut raw = Vec::with_capacity(len);
        reader.read_to_end(&mut raw)?;
        self.load_bytes(&raw)
    }

    /// Load in-memory bytes at the configured base
    pub fn load_bytes(&self, raw: &[u8]) -> Result<LoadedImage, FormatError> {
        self.load_bytes_with(raw, &mut FixedBase(self.config.base_address))
    }

    /// Load in-memory bytes at a base chosen by `provider`
    pub fn load_bytes_with(
        &self,
        raw: &[u8],
        provider: &mut dyn BaseProvider,
    ) -> Result<LoadedImage, FormatError> {
        let payload = materialize(raw, self.config.max_image_size)?;
        let header = payload.header();

        log::debug!(
            "CPU {}, {} compression, code {:#x} bytes (text {:#x}), import+export {:#x}",
            header.cpu,
            header.compression,
            header.code_size,
            header.text_size,
            header.import_export_size()
        );
        if !header.cpu.is_arm() {
            log::warn!("Image targets {}, relocating as ARM anyway", header.cpu);
        }

        let directories = read_directories(payload.bytes(), header, self.config.relocate_data)?;
        let base = provider.base_for(header, payload.len());
        let relocator = Relocator::new(base).with_overlap_check(self.config.check_overlaps);

        LoadedImage::assemble(payload, directories, relocator)
    }
}

/// Load an image with the default configuration
pub fn load<'a>(source: impl Into<ImageSource<'a>>) -> Result<LoadedImage, FormatError> {
    Loader::default().load(source)
}
