//! The read-only file system contract exposed to a host VFS layer.
//!
//! Both decoders (`iso9660::IsoFileSystem`, `zip::ZipFileSystem`) implement
//! [`FileSystem`]; the host embeds either behind this one trait object and
//! never needs to know which archive format backs a given mount.

use async_trait::async_trait;
use camino::Utf8Path;

use crate::error::ArchiveResult;

/// POSIX file-type bits, as stored in [`Inode::mode`]'s high bits.
pub mod mode {
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFLNK: u32 = 0o120000;
    /// Every inode this crate produces is read-only: `r-xr-xr-x`.
    pub const READ_ONLY_PERMS: u32 = 0o555;
}

/// Metadata for one file, directory, or symlink in a mounted archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// POSIX file-type bits OR'd with permission bits (always masked to
    /// `0o555`: archives mounted through this crate are never writable).
    pub mode: u32,
    pub size: u64,
    pub atime_ms: i64,
    pub mtime_ms: i64,
    pub ctime_ms: i64,
    pub birthtime_ms: Option<i64>,
}

impl Inode {
    pub fn is_dir(&self) -> bool {
        self.mode & mode::S_IFDIR != 0
    }

    pub fn is_symlink(&self) -> bool {
        (self.mode & 0o170000) == mode::S_IFLNK
    }
}

/// Aggregate space usage for a mounted archive. Archives are read-only, so
/// `free_space` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub total_space: u64,
    pub free_space: u64,
}

/// How caller-supplied path components are folded before lookup.
///
/// ISO 9660 identifiers are traditionally upper-case; Joliet and Rock Ridge
/// names are case-sensitive in practice. Folding to a single case by
/// default lets `/FOO/BAR`, `/foo/bar`, and `/Foo/Bar` all resolve to the
/// same entry, per `spec.md` §6 and test scenario 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFold {
    None,
    Upper,
    Lower,
}

impl CaseFold {
    pub fn apply(self, s: &str) -> String {
        match self {
            CaseFold::None => s.to_string(),
            CaseFold::Upper => s.to_uppercase(),
            CaseFold::Lower => s.to_lowercase(),
        }
    }
}

/// The read-only contract a mounted archive exposes to a host VFS.
///
/// Every operation has a synchronous and an asynchronous form. The
/// synchronous form never suspends: against a stream-backed byte source it
/// may fail with [`crate::error::ArchiveError::TryAgain`] instead of
/// blocking. There is deliberately no mutating method anywhere on this
/// trait — "all mutating operations fail with permission-denied" (per
/// `spec.md` §6) is enforced by the type system rather than a runtime
/// check, since a `FileSystem` object simply has nothing to call.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// A human-readable label for the mounted archive (volume name, ZIP
    /// file name, etc), if one was supplied or could be recovered.
    fn label(&self) -> Option<&str>;

    fn usage(&self) -> Usage;

    fn stat_sync(&self, path: &Utf8Path) -> ArchiveResult<Inode>;
    async fn stat(&self, path: &Utf8Path) -> ArchiveResult<Inode>;

    fn readdir_sync(&self, path: &Utf8Path) -> ArchiveResult<Vec<String>>;
    async fn readdir(&self, path: &Utf8Path) -> ArchiveResult<Vec<String>>;

    /// Copies `[offset, end)` of the file at `path` into `dst`, returning
    /// the number of bytes written. `dst` must be at least `end - offset`
    /// bytes.
    fn read_sync(&self, path: &Utf8Path, dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize>;
    async fn read(&self, path: &Utf8Path, dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize>;
}

/// Describes one archive-format backend (ISO 9660, ZIP, ...) so a host can
/// enumerate and select among them without depending on the concrete
/// mounted-file-system types.
pub trait Backend {
    type Options;

    fn name(&self) -> &'static str;

    /// Whether this backend can run in the current environment. Always
    /// `true` for the built-in backends; present so third-party backends
    /// with optional system dependencies (e.g. a codec only available on
    /// some platforms) have somewhere to report that.
    fn is_available(&self) -> bool {
        true
    }

    fn create(&self, options: Self::Options) -> ArchiveResult<Box<dyn FileSystem>>;
}
