//! Pluggable decompressor registry, keyed by ZIP compression method.
//!
//! `STORE` and `DEFLATE` are required and pre-registered; anything else is
//! an error unless the embedding application registers a handler for it.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::DeflateDecoder;

use crate::error::{ArchiveError, ArchiveResult};

/// ZIP compression method number for uncompressed ("stored") data.
pub const METHOD_STORE: u16 = 0;
/// ZIP compression method number for DEFLATE.
pub const METHOD_DEFLATE: u16 = 8;

/// A decompressor for one ZIP compression method.
///
/// Takes the compressed bytes plus the sizes and general-purpose flags
/// from the entry's header and returns the decompressed bytes.
pub trait Decompressor: Send + Sync {
    fn decompress(
        &self,
        compressed: &[u8],
        uncompressed_size: u64,
        flags: u16,
    ) -> ArchiveResult<Vec<u8>>;
}

struct Store;

impl Decompressor for Store {
    fn decompress(
        &self,
        compressed: &[u8],
        _uncompressed_size: u64,
        _flags: u16,
    ) -> ArchiveResult<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}

struct Deflate;

impl Decompressor for Deflate {
    fn decompress(
        &self,
        compressed: &[u8],
        uncompressed_size: u64,
        _flags: u16,
    ) -> ArchiveResult<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(compressed);
        let mut out = Vec::with_capacity(uncompressed_size as usize);
        decoder.read_to_end(&mut out).map_err(ArchiveError::Io)?;
        Ok(out)
    }
}

/// An owned, extensible `method -> decompressor` table.
///
/// Not a process-global: each mounted ZIP file system owns its registry, so
/// two mounts can register different decompressors for the same method
/// number without interfering with each other.
pub struct DecompressorRegistry {
    methods: HashMap<u16, Box<dyn Decompressor>>,
}

impl DecompressorRegistry {
    /// Builds a registry with `STORE` and `DEFLATE` pre-registered.
    pub fn with_defaults() -> Self {
        let mut methods: HashMap<u16, Box<dyn Decompressor>> = HashMap::new();
        methods.insert(METHOD_STORE, Box::new(Store));
        methods.insert(METHOD_DEFLATE, Box::new(Deflate));
        Self { methods }
    }

    /// Registers (or replaces) the decompressor for a compression method.
    pub fn register(&mut self, method: u16, decompressor: Box<dyn Decompressor>) {
        self.methods.insert(method, decompressor);
    }

    pub fn decompress(
        &self,
        method: u16,
        compressed: &[u8],
        uncompressed_size: u64,
        flags: u16,
    ) -> ArchiveResult<Vec<u8>> {
        self.methods
            .get(&method)
            .ok_or_else(|| ArchiveError::invalid(format!("unsupported compression method {method}")))?
            .decompress(compressed, uncompressed_size, flags)
    }
}

impl Default for DecompressorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_is_identity() {
        let reg = DecompressorRegistry::with_defaults();
        let out = reg.decompress(METHOD_STORE, b"hello", 5, 0).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn unknown_method_errors() {
        let reg = DecompressorRegistry::with_defaults();
        let err = reg.decompress(99, b"", 0, 0).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidArgument(_)));
    }

    #[test]
    fn deflate_roundtrip() {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"the quick brown fox").unwrap();
        let compressed = enc.finish().unwrap();

        let reg = DecompressorRegistry::with_defaults();
        let out = reg
            .decompress(METHOD_DEFLATE, &compressed, 19, 0)
            .unwrap();
        assert_eq!(out, b"the quick brown fox");
    }
}
