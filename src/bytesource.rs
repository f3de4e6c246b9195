//! Random-access byte sources over an archive image.
//!
//! This mirrors the `ReadAt` abstraction used to read ZIP archives over
//! local files or HTTP range requests: a source only needs to answer
//! "how big are you" and "give me these bytes", leaving the archive
//! decoders agnostic to where the bytes actually come from.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::{ArchiveError, ArchiveResult};

/// A sized, random-access byte source over an archive image.
///
/// Implementations may be backed by a buffer already fully in memory, or by
/// a stream that is still being filled in. `get_sync` never suspends: if
/// the requested range isn't available yet it fails with
/// [`ArchiveError::TryAgain`]. `get` is the async counterpart and will wait
/// for the range to become available before resolving.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size of the archive image in bytes.
    fn size(&self) -> u64;

    /// Reads `len` bytes starting at `offset`, without suspending.
    ///
    /// Fails with [`ArchiveError::InvalidArgument`] if the range runs past
    /// `size()`, or with [`ArchiveError::TryAgain`] if the bytes haven't
    /// arrived yet on a stream-backed source.
    fn get_sync(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>>;

    /// Reads `len` bytes starting at `offset`, suspending until they're
    /// available.
    async fn get(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>>;
}

fn check_range(offset: u64, len: u64, size: u64) -> ArchiveResult<()> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| ArchiveError::invalid("offset + len overflowed"))?;
    if end > size {
        return Err(ArchiveError::invalid(format!(
            "range {offset}..{end} is out of bounds for a {size}-byte source"
        )));
    }
    Ok(())
}

/// A [`ByteSource`] over a buffer that's already entirely in memory.
///
/// Covers both the "read the whole file into a `Vec`" case and the
/// "memory-map the file" case; either way, `get` is just a subrange copy.
pub struct InMemorySource {
    data: Arc<[u8]>,
}

impl InMemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for InMemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

#[async_trait]
impl ByteSource for InMemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn get_sync(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        let end = start + len as usize;
        Ok(self.data[start..end].to_vec())
    }

    async fn get(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        self.get_sync(offset, len)
    }
}

/// A [`ByteSource`] backed by a producer that appends bytes as they arrive
/// (e.g. a network download in progress).
///
/// The total size must be known up front (it's needed to locate the ZIP
/// EOCD / ISO volume descriptors from fixed offsets), but the bytes
/// themselves may straggle in. Any number of readers may wait on a range
/// that hasn't arrived yet; each is woken and re-checks the watermark every
/// time more data is pushed, so waiters resolve in whatever order the
/// watermark happens to satisfy them.
pub struct StreamSource {
    size: u64,
    buffered: Mutex<Vec<u8>>,
    watermark_changed: Notify,
}

impl StreamSource {
    pub fn new(size: u64) -> Arc<Self> {
        Arc::new(Self {
            size,
            buffered: Mutex::new(Vec::new()),
            watermark_changed: Notify::new(),
        })
    }

    /// Appends more bytes as they arrive from the producer.
    pub async fn push(&self, chunk: &[u8]) {
        let mut buf = self.buffered.lock().await;
        buf.extend_from_slice(chunk);
        drop(buf);
        self.watermark_changed.notify_waiters();
    }

    async fn watermark(&self) -> u64 {
        self.buffered.lock().await.len() as u64
    }
}

#[async_trait]
impl ByteSource for StreamSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn get_sync(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        check_range(offset, len, self.size)?;
        let buf = self
            .buffered
            .try_lock()
            .map_err(|_| ArchiveError::TryAgain)?;
        let end = offset + len;
        if end as usize > buf.len() {
            return Err(ArchiveError::TryAgain);
        }
        Ok(buf[offset as usize..end as usize].to_vec())
    }

    async fn get(&self, offset: u64, len: u64) -> ArchiveResult<Vec<u8>> {
        check_range(offset, len, self.size)?;
        let end = offset + len;
        loop {
            // Register interest before checking the watermark: a `push`
            // landing between the check and the `notified()` call would
            // otherwise be missed, since `notify_waiters` wakes only
            // already-registered waiters rather than storing a permit.
            let notified = self.watermark_changed.notified();
            if self.watermark().await >= end {
                let buf = self.buffered.lock().await;
                return Ok(buf[offset as usize..end as usize].to_vec());
            }
            notified.await;
        }
    }
}

/// Builds a [`ByteSource`] out of a stream of chunks and a known total size.
///
/// Spawns nothing; the caller drives `push` as chunks come in (typically
/// from a separate task reading the underlying network/file stream).
pub fn from_stream(size: u64) -> Arc<StreamSource> {
    StreamSource::new(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let src = InMemorySource::new(b"hello world".to_vec());
        assert_eq!(src.size(), 11);
        assert_eq!(src.get_sync(6, 5).unwrap(), b"world");
        assert_eq!(src.get(0, 5).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn in_memory_out_of_range() {
        let src = InMemorySource::new(b"abc".to_vec());
        assert!(src.get_sync(2, 5).is_err());
    }

    #[tokio::test]
    async fn stream_source_sync_try_again_then_resolves() {
        let src = from_stream(5);
        assert!(matches!(src.get_sync(0, 5), Err(ArchiveError::TryAgain)));
        src.push(b"hello").await;
        assert_eq!(src.get_sync(0, 5).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn stream_source_async_waits_for_watermark() {
        let src = from_stream(5);
        let reader = {
            let src = src.clone();
            tokio::spawn(async move { src.get(0, 5).await.unwrap() })
        };
        // Give the reader a chance to start waiting before we push.
        tokio::task::yield_now().await;
        src.push(b"he").await;
        tokio::task::yield_now().await;
        src.push(b"llo").await;
        let got = reader.await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn stream_source_concurrent_waiters_any_order() {
        let src = from_stream(10);
        let a = {
            let src = src.clone();
            tokio::spawn(async move { src.get(0, 4).await.unwrap() })
        };
        let b = {
            let src = src.clone();
            tokio::spawn(async move { src.get(6, 4).await.unwrap() })
        };
        src.push(b"0123456789").await;
        assert_eq!(a.await.unwrap(), b"0123");
        assert_eq!(b.await.unwrap(), b"6789");
    }
}
