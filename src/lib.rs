//! archivefs mounts ISO 9660 (with Joliet and Rock Ridge extensions) and
//! PKZIP archives as read-only, POSIX-like file systems addressable by
//! absolute path, over any random-access byte source:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use camino::Utf8Path;
//! # use archivefs::{zip::{ZipFileSystem}, bytesource::InMemorySource, ByteSource};
//! # async fn go() -> archivefs::ArchiveResult<()> {
//! let bytes = std::fs::read("archive.zip")?;
//! let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
//! let fs = ZipFileSystem::mount(source, Some("archive.zip".into()), true).await?;
//!
//! for name in fs.readdir(Utf8Path::new("/")).await? {
//!     println!("{name}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Both formats implement the same [`FileSystem`] trait, so a host embedding
//! this crate doesn't need to know which kind of archive backs a given
//! mount. Every operation comes in a synchronous form (which never
//! suspends, failing with [`ArchiveError::TryAgain`] if a
//! [`bytesource::StreamSource`]-backed mount hasn't buffered the needed
//! bytes yet) and an asynchronous form (which waits).
//!
//! Archives are mounted read-only: there is no method anywhere in this
//! crate's public API that could mutate one.

pub mod bytesource;
pub mod codecs;
pub mod decompress;
pub mod error;
pub mod iso9660;
pub mod vfs;
pub mod zip;

pub use bytesource::{from_stream, ByteSource, InMemorySource, StreamSource};
pub use decompress::{Decompressor, DecompressorRegistry};
pub use error::{ArchiveError, ArchiveResult};
pub use iso9660::{IsoBackend, IsoFileSystem, IsoOptions};
pub use vfs::{mode, Backend, CaseFold, FileSystem, Inode, Usage};
pub use zip::{ZipBackend, ZipFileSystem, ZipOptions};
