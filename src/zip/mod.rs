//! PKZIP archive support: reads the central directory, decompresses STORE
//! and DEFLATE entries, and synthesizes directories from entry paths.

mod fs;
mod spec;

pub use fs::ZipFileSystem;

use std::sync::Arc;

use crate::bytesource::ByteSource;
use crate::error::ArchiveResult;
use crate::vfs::{Backend, FileSystem};

/// Options for mounting a ZIP archive.
pub struct ZipOptions {
    pub data: Arc<dyn ByteSource>,
    pub name: Option<String>,
    /// If true, entry contents are decompressed on first read rather than
    /// eagerly at mount time.
    pub lazy: bool,
}

/// A [`Backend`] that mounts PKZIP archives.
#[derive(Default)]
pub struct ZipBackend;

impl Backend for ZipBackend {
    type Options = ZipOptions;

    fn name(&self) -> &'static str {
        "zip"
    }

    fn create(&self, options: Self::Options) -> ArchiveResult<Box<dyn FileSystem>> {
        // `Backend::create` is synchronous; use the sync mount path, which
        // works for any byte source whose relevant bytes are already
        // available (in particular, anything backed by `InMemorySource`).
        // Callers mounting a still-streaming source should call
        // `ZipFileSystem::mount` directly instead.
        let fs = ZipFileSystem::mount_sync(options.data, options.name, options.lazy)?;
        Ok(Box::new(fs))
    }
}
