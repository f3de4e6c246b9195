//! Error types and the related `Result<T>`

use camino::Utf8PathBuf;
use thiserror::Error;

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// POSIX-flavored error kinds shared by both decoders.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// An error from underlying I/O
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Malformed header, bad signature, unsupported ZIP64/spanning,
    /// invalid LBA, unknown compression method, etc.
    #[error("Invalid archive: {0}")]
    InvalidArgument(String),

    /// No usable volume descriptor, or the End Of Central Directory
    /// record could not be located.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Decoding a UTF-8 name or comment failed.
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The archive uses a feature this crate doesn't support
    /// (ZIP64, spanning, encryption, ...).
    #[error("Unsupported archive: {0}")]
    UnsupportedArchive(String),

    /// No file or directory exists at the given path.
    #[error("No such file: {0}")]
    NoSuchFile(Utf8PathBuf),

    /// A path component expected to be a directory wasn't one.
    #[error("Not a directory: {0}")]
    NotADirectory(Utf8PathBuf),

    /// A path expected to be a file turned out to be a directory.
    #[error("Is a directory: {0}")]
    IsADirectory(Utf8PathBuf),

    /// The path resolved to a directory entry with nothing useful to give
    /// back (e.g. a `readdir` with no matching synthetic directory slot).
    #[error("No data for: {0}")]
    NoData(Utf8PathBuf),

    /// Any attempt to mutate a mounted archive.
    #[error("Permission denied: archives are mounted read-only")]
    PermissionDenied,

    /// A synchronous read against a stream-backed source that hasn't
    /// buffered the requested range yet. Callers should retry, or use the
    /// async read variant to wait for it.
    #[error("Try again: data not yet buffered")]
    TryAgain,
}

impl ArchiveError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ArchiveError::InvalidArgument(msg.into())
    }

    pub(crate) fn io_error(msg: impl Into<String>) -> Self {
        ArchiveError::IoError(msg.into())
    }
}
