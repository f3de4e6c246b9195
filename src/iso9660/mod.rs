//! ISO 9660 archive support, with Joliet and Rock Ridge extensions.

mod fs;
mod record;
mod susp;
mod walker;

pub use fs::IsoFileSystem;

use std::sync::Arc;

use crate::bytesource::ByteSource;
use crate::error::ArchiveResult;
use crate::vfs::{Backend, CaseFold, FileSystem};

/// Options for mounting an ISO 9660 image.
pub struct IsoOptions {
    pub data: Arc<dyn ByteSource>,
    pub name: Option<String>,
    pub case_fold: CaseFold,
}

/// A [`Backend`] that mounts ISO 9660 images (Joliet and Rock Ridge aware).
#[derive(Default)]
pub struct IsoBackend;

impl Backend for IsoBackend {
    type Options = IsoOptions;

    fn name(&self) -> &'static str {
        "iso9660"
    }

    fn create(&self, options: Self::Options) -> ArchiveResult<Box<dyn FileSystem>> {
        let fs = IsoFileSystem::mount_sync(options.data, options.name, options.case_fold)?;
        Ok(Box::new(fs))
    }
}
