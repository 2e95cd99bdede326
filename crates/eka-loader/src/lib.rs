//! EKA2 E32 Image Loader
//!
//! Loads the executable container of Symbian OS (EKA2 kernel) into a flat,
//! relocated byte image that an emulated ARM core can execute:
//!
//! 1. **header**: decode and validate the fixed 124-byte E32 header
//! 2. **payload**: materialize the image (raw copy, or copy + inflate)
//! 3. **reloc**: read the code/data relocation directories and patch them
//!    against a load base
//! 4. **image**: assemble the immutable [`LoadedImage`]
//!
//! The library never prints. Everything worth reporting ends up in the
//! returned [`LoadedImage`] / [`RelocSummary`]; fine-grained diagnostics go
//! through the `log` facade for the embedder to collect.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod bytes;
pub mod config;
pub mod error;
pub mod header;
pub mod image;
pub mod loader;
pub mod payload;
pub mod reloc;

pub use builder::ImageBuilder;
pub use config::{ConfigError, LoaderConfig};
pub use error::FormatError;
pub use header::{Compression, Cpu, ImageHeader, ToolsVersion, HEADER_SIZE, SIGNATURE};
pub use image::LoadedImage;
pub use loader::{load, BaseProvider, FixedBase, ImageSource, Loader};
pub use payload::Payload;
pub use reloc::{
    RelocDirectory, RelocDirectoryHeader, RelocEntry, RelocKind, RelocSummary, Relocator,
    Section, SkippedReloc,
};
