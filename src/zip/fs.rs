//! Mounts a PKZIP archive as a [`crate::vfs::FileSystem`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};

use crate::bytesource::ByteSource;
use crate::codecs::parse_msdos_datetime;
use crate::decompress::DecompressorRegistry;
use crate::error::{ArchiveError, ArchiveResult};
use crate::vfs::{mode, FileSystem, Inode, Usage};
use crate::zip::spec::{self, CentralDirectoryEntry, Eocd, LocalFileHeader};

struct Entry {
    record: CentralDirectoryEntry,
    is_dir: bool,
    path: Utf8PathBuf,
    contents: OnceLock<Arc<[u8]>>,
}

/// A mounted PKZIP archive.
///
/// Directories are synthetic: PKZIP has no directory records of its own, so
/// [`readdir`](FileSystem::readdir) walks an index built at mount time from
/// every entry's ancestor paths (`spec.md` §4.8).
pub struct ZipFileSystem {
    source: Arc<dyn ByteSource>,
    name: Option<String>,
    entries: HashMap<Utf8PathBuf, Entry>,
    /// `directory path -> immediate child basenames`, including the
    /// synthesized root.
    children: HashMap<Utf8PathBuf, Vec<String>>,
    decompressors: DecompressorRegistry,
    mount_time_ms: i64,
}

fn normalize_path(raw: &str) -> Utf8PathBuf {
    let trimmed = raw.trim_start_matches('/');
    Utf8PathBuf::from(format!("/{trimmed}"))
}

fn index_children(paths: impl Iterator<Item = Utf8PathBuf>) -> HashMap<Utf8PathBuf, Vec<String>> {
    let mut children: HashMap<Utf8PathBuf, Vec<String>> = HashMap::new();
    children.entry(Utf8PathBuf::from("/")).or_default();

    for path in paths {
        let mut child = path;
        while let Some(parent) = child.parent() {
            let basename = child.file_name().unwrap_or("").to_string();
            let parent = if parent.as_str().is_empty() {
                Utf8PathBuf::from("/")
            } else {
                parent.to_path_buf()
            };
            let entry = children.entry(parent.clone()).or_default();
            if !entry.iter().any(|existing| existing == &basename) {
                entry.push(basename);
            }
            if parent.as_str() == "/" {
                break;
            }
            child = parent;
        }
    }
    children
}

impl ZipFileSystem {
    /// Mounts `source` as a ZIP file system.
    ///
    /// If `lazy` is false, every entry's content is decompressed up front;
    /// otherwise an entry's bytes are fetched and decompressed the first
    /// time it's read, then memoized.
    pub async fn mount(
        source: Arc<dyn ByteSource>,
        name: Option<String>,
        lazy: bool,
    ) -> ArchiveResult<Self> {
        let size = source.size();
        if size < 22 {
            return Err(ArchiveError::invalid("file too small to be a ZIP archive"));
        }

        let window = spec::EOCD_SEARCH_WINDOW.min(size);
        let tail_start = size - window;
        let tail = source.get(tail_start, window).await?;
        let eocd_pos = Eocd::find(&tail)?;
        let eocd = Eocd::parse(&tail[eocd_pos..])?;

        let cd_bytes = source.get(eocd.cd_offset as u64, eocd.cd_size as u64).await?;

        let mut entries = HashMap::new();
        let mut cursor = &cd_bytes[..];
        let mut paths = Vec::with_capacity(eocd.total_entry_count as usize);
        while !cursor.is_empty() {
            let (record, consumed) = CentralDirectoryEntry::parse(cursor)?;
            cursor = &cursor[consumed..];

            let raw_name = spec::decode_name(&record.name, record.flags);
            let is_dir = raw_name.ends_with('/');
            let trimmed = raw_name.trim_end_matches('/');
            let path = normalize_path(trimmed);

            paths.push(path.clone());
            entries.insert(
                path.clone(),
                Entry {
                    record,
                    is_dir,
                    path,
                    contents: OnceLock::new(),
                },
            );
        }

        let mut children = index_children(paths.into_iter());
        for (path, entry) in &entries {
            if entry.is_dir {
                children.entry(path.clone()).or_default();
            }
        }
        let decompressors = DecompressorRegistry::with_defaults();

        let fs = Self {
            source,
            name,
            entries,
            children,
            decompressors,
            mount_time_ms: chrono::Utc::now().timestamp_millis(),
        };

        if !lazy {
            for path in fs.entries.keys().cloned().collect::<Vec<_>>() {
                if !fs.entries[&path].is_dir {
                    fs.resolve_contents(&path).await?;
                }
            }
        }

        Ok(fs)
    }

    /// Synchronous counterpart to [`Self::mount`], for byte sources whose
    /// data is already fully available (e.g. [`crate::bytesource::InMemorySource`]).
    /// Fails with [`ArchiveError::TryAgain`] against a stream-backed source
    /// that hasn't buffered the tail or central directory yet.
    pub fn mount_sync(source: Arc<dyn ByteSource>, name: Option<String>, lazy: bool) -> ArchiveResult<Self> {
        let size = source.size();
        if size < 22 {
            return Err(ArchiveError::invalid("file too small to be a ZIP archive"));
        }

        let window = spec::EOCD_SEARCH_WINDOW.min(size);
        let tail_start = size - window;
        let tail = source.get_sync(tail_start, window)?;
        let eocd_pos = Eocd::find(&tail)?;
        let eocd = Eocd::parse(&tail[eocd_pos..])?;

        let cd_bytes = source.get_sync(eocd.cd_offset as u64, eocd.cd_size as u64)?;

        let mut entries = HashMap::new();
        let mut cursor = &cd_bytes[..];
        let mut paths = Vec::with_capacity(eocd.total_entry_count as usize);
        while !cursor.is_empty() {
            let (record, consumed) = CentralDirectoryEntry::parse(cursor)?;
            cursor = &cursor[consumed..];

            let raw_name = spec::decode_name(&record.name, record.flags);
            let is_dir = raw_name.ends_with('/');
            let trimmed = raw_name.trim_end_matches('/');
            let path = normalize_path(trimmed);

            paths.push(path.clone());
            entries.insert(
                path.clone(),
                Entry {
                    record,
                    is_dir,
                    path,
                    contents: OnceLock::new(),
                },
            );
        }

        let mut children = index_children(paths.into_iter());
        for (path, entry) in &entries {
            if entry.is_dir {
                children.entry(path.clone()).or_default();
            }
        }
        let decompressors = DecompressorRegistry::with_defaults();

        let fs = Self {
            source,
            name,
            entries,
            children,
            decompressors,
            mount_time_ms: chrono::Utc::now().timestamp_millis(),
        };

        if !lazy {
            for path in fs.entries.keys().cloned().collect::<Vec<_>>() {
                if !fs.entries[&path].is_dir {
                    fs.resolve_contents_sync(&path)?;
                }
            }
        }

        Ok(fs)
    }

    fn lookup(&self, path: &Utf8Path) -> ArchiveResult<&Entry> {
        let normalized = normalize_path(path.as_str());
        self.entries
            .get(&normalized)
            .ok_or_else(|| ArchiveError::NoSuchFile(normalized))
    }

    /// True for both explicit (`dir/`) and synthetic (implied by a
    /// descendant's path) directories, neither of which necessarily has an
    /// entry in `self.entries`.
    fn is_dir_path(&self, path: &Utf8Path) -> bool {
        path.as_str() == "/" || self.children.contains_key(&normalize_path(path.as_str()))
    }

    fn inode_for(&self, path: &Utf8Path) -> ArchiveResult<Inode> {
        if self.is_dir_path(path) {
            return Ok(self.dir_inode());
        }
        let entry = self.lookup(path)?;
        if entry.is_dir {
            return Ok(self.dir_inode());
        }
        let mtime = parse_msdos_datetime(entry.record.last_mod_time, entry.record.last_mod_date)
            .and_utc()
            .timestamp_millis();
        Ok(Inode {
            mode: mode::READ_ONLY_PERMS | mode::S_IFREG,
            size: entry.record.uncompressed_size as u64,
            atime_ms: mtime,
            mtime_ms: mtime,
            ctime_ms: mtime,
            birthtime_ms: Some(mtime),
        })
    }

    fn dir_inode(&self) -> Inode {
        Inode {
            mode: mode::READ_ONLY_PERMS | mode::S_IFDIR,
            size: 4096,
            atime_ms: self.mount_time_ms,
            mtime_ms: self.mount_time_ms,
            ctime_ms: self.mount_time_ms,
            birthtime_ms: Some(self.mount_time_ms),
        }
    }

    fn local_header_offset(entry: &CentralDirectoryEntry) -> u64 {
        entry.header_offset as u64
    }

    async fn resolve_contents(&self, path: &Utf8Path) -> ArchiveResult<Arc<[u8]>> {
        if self.is_dir_path(path) {
            return Err(ArchiveError::IsADirectory(normalize_path(path.as_str())));
        }
        let entry = self.lookup(path)?;
        if let Some(cached) = entry.contents.get() {
            return Ok(cached.clone());
        }

        // Local headers vary in size (the name/extra fields can differ from
        // the central directory's), so fetch a little more than the fixed
        // 30 bytes and re-fetch if that wasn't enough.
        let header_offset = Self::local_header_offset(&entry.record);
        let probe_len = 30u64.max(
            entry
                .record
                .name
                .len()
                .saturating_add(entry.record.extra.len()) as u64
                + 30,
        );
        let probe = self.source.get(header_offset, probe_len.min(self.source.size() - header_offset)).await?;
        let (header, header_len) = LocalFileHeader::parse(&probe)?;

        let data_offset = header_offset + header_len as u64;
        let compressed = self
            .source
            .get(data_offset, header.compressed_size as u64)
            .await?;
        let decompressed = self.decompressors.decompress(
            header.compression_method,
            &compressed,
            entry.record.uncompressed_size as u64,
            header.flags,
        )?;

        let data: Arc<[u8]> = decompressed.into();
        let _ = entry.contents.set(data.clone());
        Ok(data)
    }

    fn resolve_contents_sync(&self, path: &Utf8Path) -> ArchiveResult<Arc<[u8]>> {
        if self.is_dir_path(path) {
            return Err(ArchiveError::IsADirectory(normalize_path(path.as_str())));
        }
        let entry = self.lookup(path)?;
        if let Some(cached) = entry.contents.get() {
            return Ok(cached.clone());
        }

        let header_offset = Self::local_header_offset(&entry.record);
        let probe_len = 30u64.max(
            entry
                .record
                .name
                .len()
                .saturating_add(entry.record.extra.len()) as u64
                + 30,
        );
        let probe = self
            .source
            .get_sync(header_offset, probe_len.min(self.source.size() - header_offset))?;
        let (header, header_len) = LocalFileHeader::parse(&probe)?;

        let data_offset = header_offset + header_len as u64;
        let compressed = self.source.get_sync(data_offset, header.compressed_size as u64)?;
        let decompressed = self.decompressors.decompress(
            header.compression_method,
            &compressed,
            entry.record.uncompressed_size as u64,
            header.flags,
        )?;

        let data: Arc<[u8]> = decompressed.into();
        let _ = entry.contents.set(data.clone());
        Ok(data)
    }
}

#[async_trait]
impl FileSystem for ZipFileSystem {
    fn label(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn usage(&self) -> Usage {
        let total: u64 = self
            .entries
            .values()
            .filter(|e| !e.is_dir)
            .map(|e| e.record.uncompressed_size as u64)
            .sum();
        Usage {
            total_space: total,
            free_space: 0,
        }
    }

    fn stat_sync(&self, path: &Utf8Path) -> ArchiveResult<Inode> {
        self.inode_for(path)
    }

    async fn stat(&self, path: &Utf8Path) -> ArchiveResult<Inode> {
        self.inode_for(path)
    }

    fn readdir_sync(&self, path: &Utf8Path) -> ArchiveResult<Vec<String>> {
        let normalized = normalize_path(path.as_str());
        if let Some(entry) = self.entries.get(&normalized) {
            if !entry.is_dir {
                return Err(ArchiveError::NotADirectory(normalized));
            }
        }
        self.children
            .get(&normalized)
            .cloned()
            .ok_or_else(|| ArchiveError::NoSuchFile(normalized))
    }

    async fn readdir(&self, path: &Utf8Path) -> ArchiveResult<Vec<String>> {
        self.readdir_sync(path)
    }

    fn read_sync(&self, path: &Utf8Path, dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize> {
        let data = self.resolve_contents_sync(path)?;
        copy_range(&data, dst, offset, end)
    }

    async fn read(&self, path: &Utf8Path, dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize> {
        let data = self.resolve_contents(path).await?;
        copy_range(&data, dst, offset, end)
    }
}

fn copy_range(data: &[u8], dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize> {
    if end < offset {
        return Err(ArchiveError::invalid("read end precedes offset"));
    }
    let offset = offset as usize;
    let end = (end as usize).min(data.len());
    if offset > data.len() {
        return Ok(0);
    }
    let n = end - offset;
    dst[..n].copy_from_slice(&data[offset..end]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytesource::InMemorySource;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn put_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    fn put_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Builds a minimal in-memory ZIP with one stored file `hello.txt` and
    /// one deflated file `dir/nested.txt`.
    fn build_fixture() -> Vec<u8> {
        let stored_name = b"hello.txt";
        let stored_data = b"hello, world!";

        let nested_name = b"dir/nested.txt";
        let nested_plain = b"nested contents";
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(nested_plain).unwrap();
        let nested_compressed = enc.finish().unwrap();

        let mut out = Vec::new();

        let local1_offset = out.len() as u32;
        out.extend_from_slice(&spec::LOCAL_FILE_HEADER_MAGIC);
        put_u16(&mut out, 20); // version needed
        put_u16(&mut out, 0x0800); // flags: UTF-8
        put_u16(&mut out, 0); // method: store
        put_u16(&mut out, 0); // time
        put_u16(&mut out, 0x21); // date: 1980-01-01
        put_u32(&mut out, 0); // crc32
        put_u32(&mut out, stored_data.len() as u32);
        put_u32(&mut out, stored_data.len() as u32);
        put_u16(&mut out, stored_name.len() as u16);
        put_u16(&mut out, 0);
        out.extend_from_slice(stored_name);
        out.extend_from_slice(stored_data);

        let local2_offset = out.len() as u32;
        out.extend_from_slice(&spec::LOCAL_FILE_HEADER_MAGIC);
        put_u16(&mut out, 20);
        put_u16(&mut out, 0x0800);
        put_u16(&mut out, 8); // method: deflate
        put_u16(&mut out, 0);
        put_u16(&mut out, 0x21);
        put_u32(&mut out, 0);
        put_u32(&mut out, nested_compressed.len() as u32);
        put_u32(&mut out, nested_plain.len() as u32);
        put_u16(&mut out, nested_name.len() as u16);
        put_u16(&mut out, 0);
        out.extend_from_slice(nested_name);
        out.extend_from_slice(&nested_compressed);

        let cd_start = out.len() as u32;

        out.extend_from_slice(&spec::CENTRAL_DIRECTORY_MAGIC);
        put_u16(&mut out, 20);
        put_u16(&mut out, 20);
        put_u16(&mut out, 0x0800);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0x21);
        put_u32(&mut out, 0);
        put_u32(&mut out, stored_data.len() as u32);
        put_u32(&mut out, stored_data.len() as u32);
        put_u16(&mut out, stored_name.len() as u16);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u32(&mut out, 0);
        put_u32(&mut out, local1_offset);
        out.extend_from_slice(stored_name);

        out.extend_from_slice(&spec::CENTRAL_DIRECTORY_MAGIC);
        put_u16(&mut out, 20);
        put_u16(&mut out, 20);
        put_u16(&mut out, 0x0800);
        put_u16(&mut out, 8);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0x21);
        put_u32(&mut out, 0);
        put_u32(&mut out, nested_compressed.len() as u32);
        put_u32(&mut out, nested_plain.len() as u32);
        put_u16(&mut out, nested_name.len() as u16);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u32(&mut out, 0);
        put_u32(&mut out, local2_offset);
        out.extend_from_slice(nested_name);

        let cd_size = out.len() as u32 - cd_start;

        out.extend_from_slice(&spec::EOCD_MAGIC);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, 2);
        put_u16(&mut out, 2);
        put_u32(&mut out, cd_size);
        put_u32(&mut out, cd_start);
        put_u16(&mut out, 0);

        out
    }

    #[tokio::test]
    async fn mounts_and_reads_stored_and_deflated_entries() {
        let bytes = build_fixture();
        let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
        let fs = ZipFileSystem::mount(source, Some("fixture.zip".into()), true)
            .await
            .unwrap();

        let stat = fs.stat(Utf8Path::new("/hello.txt")).await.unwrap();
        assert_eq!(stat.size, 13);
        assert!(!stat.is_dir());

        let mut buf = vec![0u8; 13];
        let n = fs.read(Utf8Path::new("/hello.txt"), &mut buf, 0, 13).await.unwrap();
        assert_eq!(&buf[..n], b"hello, world!");

        let mut buf = vec![0u8; 16];
        let n = fs
            .read(Utf8Path::new("/dir/nested.txt"), &mut buf, 0, 16)
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"nested contents");
    }

    #[tokio::test]
    async fn readdir_lists_synthetic_directories() {
        let bytes = build_fixture();
        let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
        let fs = ZipFileSystem::mount(source, None, false).await.unwrap();

        let mut root = fs.readdir(Utf8Path::new("/")).await.unwrap();
        root.sort();
        assert_eq!(root, vec!["dir", "hello.txt"]);

        let dir_stat = fs.stat(Utf8Path::new("/dir")).await.unwrap();
        assert!(dir_stat.is_dir());

        let children = fs.readdir(Utf8Path::new("/dir")).await.unwrap();
        assert_eq!(children, vec!["nested.txt"]);
    }

    #[tokio::test]
    async fn reading_a_directory_fails() {
        let bytes = build_fixture();
        let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
        let fs = ZipFileSystem::mount(source, None, true).await.unwrap();

        let mut buf = vec![0u8; 4];
        let err = fs.read(Utf8Path::new("/dir"), &mut buf, 0, 4).await.unwrap_err();
        assert!(matches!(err, ArchiveError::IsADirectory(_)));
    }

    #[tokio::test]
    async fn missing_path_errors() {
        let bytes = build_fixture();
        let source: Arc<dyn ByteSource> = Arc::new(InMemorySource::new(bytes));
        let fs = ZipFileSystem::mount(source, None, true).await.unwrap();

        let err = fs.stat(Utf8Path::new("/nope.txt")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NoSuchFile(_)));
    }
}
