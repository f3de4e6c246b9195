//! Mounts an ISO 9660 (optionally Joliet, optionally Rock Ridge) image as a
//! [`crate::vfs::FileSystem`].
//!
//! Traversal walks directory records extent-by-extent; it never consults
//! the path table (`spec.md` §9 scopes traversal to directory records).
//! The whole tree is indexed eagerly at mount time, the same way
//! [`crate::zip::ZipFileSystem`] indexes its central directory, so `stat`
//! and `readdir` are simple map lookups afterward.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};

use crate::bytesource::ByteSource;
use crate::error::{ArchiveError, ArchiveResult};
use crate::iso9660::record::{DirectoryRecord, VolumeDescriptor, SECTOR_SIZE, VD_TYPE_PRIMARY, VD_TYPE_SUPPLEMENTARY, VD_TYPE_TERMINATOR, VOLUME_DESCRIPTOR_START};
use crate::iso9660::susp::{self, ExtentFetcher, SystemUseEntry, MAX_SYMLINK_DEPTH};
use crate::iso9660::walker;
use crate::vfs::{mode, CaseFold, FileSystem, Inode, Usage};

struct Node {
    is_dir: bool,
    size: u64,
    extent: u32,
    mode: u32,
    mtime_ms: Option<i64>,
    atime_ms: Option<i64>,
    ctime_ms: Option<i64>,
    symlink_target: Option<Utf8PathBuf>,
}

/// A mounted ISO 9660 image.
///
/// File data lives uncompressed and contiguous on disc, so a read is just a
/// ranged fetch at `extent * block_size + offset` straight out of the
/// source this was mounted from.
pub struct IsoFileSystem {
    source: Arc<dyn ByteSource>,
    name: Option<String>,
    block_size: u64,
    entries: HashMap<Utf8PathBuf, Node>,
    children: HashMap<Utf8PathBuf, Vec<String>>,
    case_fold: CaseFold,
    /// `SP.skip` discovered on the root `.` record, if Rock Ridge is active;
    /// every record's system use area starts this many bytes later than
    /// `su_start` alone would indicate (`spec.md` §3/§4.4).
    rock_ridge_offset: Option<u8>,
    mount_time_ms: i64,
}

struct SyncExtentFetcher<'a> {
    source: &'a dyn ByteSource,
    block_size: u64,
}

impl<'a> ExtentFetcher for SyncExtentFetcher<'a> {
    fn fetch(&mut self, block: u32, offset: u32, length: u32) -> ArchiveResult<Vec<u8>> {
        let abs = block as u64 * self.block_size + offset as u64;
        self.source.get_sync(abs, length as u64)
    }
}

fn round_up_to_block(len: u64, block_size: u64) -> u64 {
    if len == 0 {
        return 0;
    }
    ((len + block_size - 1) / block_size) * block_size
}

fn symlink_components_to_path(components: &[susp::SymlinkComponent]) -> Utf8PathBuf {
    use susp::SymlinkComponentFlags as F;
    let mut parts = Vec::new();
    for c in components {
        if c.flags.contains(F::ROOT) {
            parts.clear();
            parts.push("".to_string());
        } else if c.flags.contains(F::PARENT) {
            parts.push("..".to_string());
        } else if c.flags.contains(F::CURRENT) {
            parts.push(".".to_string());
        } else {
            parts.push(c.content.clone());
        }
    }
    Utf8PathBuf::from(parts.join("/"))
}

impl IsoFileSystem {
    /// Mounts `source` as an ISO 9660 file system. `name` overrides the
    /// volume label as the reported [`FileSystem::label`]. `case_fold`
    /// controls how path segments are normalized for lookup.
    ///
    /// Requires the whole image's relevant bytes (volume descriptors and
    /// every directory extent) to already be available; this is the
    /// synchronous mount path and fails with
    /// [`ArchiveError::TryAgain`] against a stream still filling in.
    pub fn mount_sync(
        source: Arc<dyn ByteSource>,
        name: Option<String>,
        case_fold: CaseFold,
    ) -> ArchiveResult<Self> {
        let mut primary: Option<VolumeDescriptor> = None;
        let mut joliet: Option<VolumeDescriptor> = None;

        let mut sector_offset = VOLUME_DESCRIPTOR_START;
        loop {
            let sector = source.get_sync(sector_offset, SECTOR_SIZE)?;
            if sector[0] == VD_TYPE_TERMINATOR {
                break;
            }
            match VolumeDescriptor::parse(&sector)? {
                Some(vd) if vd.descriptor_type == VD_TYPE_PRIMARY && primary.is_none() => {
                    primary = Some(vd);
                }
                Some(vd) if vd.descriptor_type == VD_TYPE_SUPPLEMENTARY && vd.is_joliet && joliet.is_none() => {
                    joliet = Some(vd);
                }
                _ => {}
            }
            sector_offset += SECTOR_SIZE;
            if sector_offset > source.size() {
                break;
            }
        }

        let primary = primary.ok_or_else(|| ArchiveError::invalid("no Primary Volume Descriptor found"))?;
        // Joliet is preferred when present: it carries full Unicode names
        // without the 8.3-ish restrictions of the primary descriptor.
        let chosen = joliet.as_ref().unwrap_or(&primary);
        let block_size = chosen.logical_block_size as u64;
        let decode_name: fn(&[u8]) -> String = if chosen.is_joliet {
            crate::codecs::decode_utf16be
        } else {
            crate::codecs::decode_ascii
        };

        let rock_ridge_offset = detect_rock_ridge(&*source, &chosen.root_directory_record, block_size)?;

        let mut entries = HashMap::new();
        let mut children: HashMap<Utf8PathBuf, Vec<String>> = HashMap::new();
        children.insert(Utf8PathBuf::from("/"), Vec::new());

        entries.insert(
            Utf8PathBuf::from("/"),
            Node {
                is_dir: true,
                size: 4096,
                extent: chosen.root_directory_record.extent_location,
                mode: mode::READ_ONLY_PERMS | mode::S_IFDIR,
                mtime_ms: None,
                atime_ms: None,
                ctime_ms: None,
                symlink_target: None,
            },
        );

        let mut queue = vec![(
            Utf8PathBuf::from("/"),
            chosen.root_directory_record.extent_location,
            chosen.root_directory_record.data_length,
        )];

        while let Some((dir_path, extent, data_length)) = queue.pop() {
            let fetch_len = round_up_to_block(data_length as u64, block_size);
            let extent_bytes = source.get_sync(extent as u64 * block_size, fetch_len)?;
            let records = walker::children(&extent_bytes, block_size, decode_name)?;

            for record in records {
                let mut fetcher = SyncExtentFetcher {
                    source: &*source,
                    block_size,
                };
                let susp_entries = match rock_ridge_offset {
                    Some(skip) => {
                        let area = record.system_use.get(skip as usize..).unwrap_or(&[]);
                        susp::collect_all(area, &mut fetcher)?
                    }
                    None => Vec::new(),
                };

                if susp_entries.iter().any(|e| matches!(e, SystemUseEntry::Relocated))
                    && !susp_entries.iter().any(|e| matches!(e, SystemUseEntry::ChildLink { .. }))
                {
                    // This record is only reachable through its CL
                    // placeholder elsewhere; don't list it here.
                    continue;
                }

                let resolved_name = resolve_name(&record, &susp_entries, case_fold);
                let child_path = if dir_path.as_str() == "/" {
                    Utf8PathBuf::from(format!("/{resolved_name}"))
                } else {
                    dir_path.join(&resolved_name)
                };

                let child_link_extent = susp_entries.iter().find_map(|e| match e {
                    SystemUseEntry::ChildLink { extent } => Some(*extent),
                    _ => None,
                });

                let posix_attrs = susp_entries.iter().find_map(|e| match e {
                    SystemUseEntry::PosixAttributes { mode: m, .. } => Some(*m),
                    _ => None,
                });
                let timestamps = susp_entries.iter().find_map(|e| match e {
                    SystemUseEntry::Timestamps(ts) => Some(ts.clone()),
                    _ => None,
                });
                let symlink_target = susp_entries.iter().find_map(|e| match e {
                    SystemUseEntry::SymbolicLink { components, .. } => {
                        Some(symlink_components_to_path(components))
                    }
                    _ => None,
                });

                let is_symlink = symlink_target.is_some();
                let is_dir = record.is_directory() && !is_symlink;

                let type_bits = if is_symlink {
                    mode::S_IFLNK
                } else if is_dir {
                    mode::S_IFDIR
                } else {
                    mode::S_IFREG
                };
                let node_mode = mode::READ_ONLY_PERMS | type_bits;
                let _ = posix_attrs; // permission bits from PX are not surfaced: every mount is read-only.

                let recording_ms = record.recording_date.map(|d| d.and_utc().timestamp_millis());

                entries.insert(
                    child_path.clone(),
                    Node {
                        is_dir,
                        size: record.data_length as u64,
                        extent: child_link_extent.unwrap_or(record.extent_location),
                        mode: node_mode,
                        mtime_ms: timestamps.as_ref().and_then(|t| t.modify_ms).or(recording_ms),
                        atime_ms: timestamps.as_ref().and_then(|t| t.access_ms).or(recording_ms),
                        ctime_ms: timestamps.as_ref().and_then(|t| t.attributes_ms).or(recording_ms),
                        symlink_target,
                    },
                );
                children.entry(dir_path.clone()).or_default().push(resolved_name);
                children.entry(child_path.clone()).or_default();

                if is_dir {
                    // A `CL` placeholder's own `data_length` is a filler
                    // value (conventionally one logical block); the real
                    // directory's extent lives wherever `CL` points, sized
                    // by that same filler since the true size isn't
                    // recorded anywhere the placeholder can see.
                    let (extent, len) = match child_link_extent {
                        Some(e) => (e, record.data_length),
                        None => (record.extent_location, record.data_length),
                    };
                    queue.push((child_path, extent, len));
                }
            }
        }

        Ok(Self {
            source,
            name: name.or_else(|| {
                let label = chosen.volume_identifier.trim();
                if label.is_empty() {
                    None
                } else {
                    Some(label.to_string())
                }
            }),
            block_size,
            entries,
            children,
            case_fold,
            rock_ridge_offset,
            mount_time_ms: 0,
        })
    }

    fn fold_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        let folded: Vec<String> = path
            .as_str()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|seg| self.case_fold.apply(seg))
            .collect();
        Utf8PathBuf::from(format!("/{}", folded.join("/")))
    }

    fn resolve(&self, path: &Utf8Path) -> ArchiveResult<(&Utf8PathBuf, &Node)> {
        let normalized = self.fold_path(path);
        let mut current = normalized.clone();
        let mut depth = 0;
        loop {
            let (key, node) = self
                .entries
                .get_key_value(&current)
                .ok_or_else(|| ArchiveError::NoSuchFile(normalized.clone()))?;
            if let Some(target) = &node.symlink_target {
                depth += 1;
                if depth > MAX_SYMLINK_DEPTH {
                    return Err(ArchiveError::invalid("symlink chain too deep"));
                }
                let base = key.parent().unwrap_or(Utf8Path::new("/"));
                current = self.fold_path(&base.join(target));
                continue;
            }
            return Ok((key, node));
        }
    }

    fn inode_for_node(&self, node: &Node) -> Inode {
        Inode {
            mode: node.mode,
            size: node.size,
            atime_ms: node.atime_ms.unwrap_or(self.mount_time_ms),
            mtime_ms: node.mtime_ms.unwrap_or(self.mount_time_ms),
            ctime_ms: node.ctime_ms.unwrap_or(self.mount_time_ms),
            birthtime_ms: node.mtime_ms,
        }
    }

    fn file_range(&self, path: &Utf8Path, offset: u64, end: u64) -> ArchiveResult<(u64, u64)> {
        let (key, node) = self.resolve(path)?;
        if node.is_dir {
            return Err(ArchiveError::IsADirectory(key.clone()));
        }
        if end < offset {
            return Err(ArchiveError::invalid("read end precedes offset"));
        }
        let clamped_end = end.min(node.size);
        if offset > node.size {
            return Ok((0, 0));
        }
        let abs_start = node.extent as u64 * self.block_size + offset;
        Ok((abs_start, clamped_end.saturating_sub(offset)))
    }
}

/// Inspects the root `.` record's system use area and returns the
/// `rockRidgeOffset` (`SP.skip`) if Rock Ridge is active, per `spec.md`
/// §9: the first entry must be a valid `SP`, and a later entry must be
/// `RR` or an `ER` naming [`susp::ROCK_RIDGE_EXT_ID`].
fn detect_rock_ridge(source: &dyn ByteSource, root: &DirectoryRecord, block_size: u64) -> ArchiveResult<Option<u8>> {
    let extent_bytes = source.get_sync(
        root.extent_location as u64 * block_size,
        round_up_to_block(root.data_length as u64, block_size),
    )?;
    if extent_bytes.is_empty() || extent_bytes[0] == 0 {
        return Ok(None);
    }
    let dot = DirectoryRecord::parse(&extent_bytes, crate::codecs::decode_ascii)?;
    let mut fetcher = SyncExtentFetcher { source, block_size };
    let entries = susp::collect_all(&dot.system_use, &mut fetcher)?;
    let skip = match entries.first() {
        Some(SystemUseEntry::SuspIndicator { skip }) => *skip,
        _ => return Ok(None),
    };
    let rock_ridge_marker = entries.iter().skip(1).any(|e| {
        matches!(e, SystemUseEntry::LegacyRockRidge)
            || matches!(e, SystemUseEntry::ExtensionReference { ext_id } if ext_id.contains(susp::ROCK_RIDGE_EXT_ID))
    });
    Ok(rock_ridge_marker.then_some(skip))
}

fn resolve_name(record: &DirectoryRecord, susp_entries: &[SystemUseEntry], case_fold: CaseFold) -> String {
    let alt_name: String = susp_entries
        .iter()
        .filter_map(|e| match e {
            SystemUseEntry::AlternateName { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();
    let raw = if alt_name.is_empty() {
        record.file_name()
    } else {
        alt_name
    };
    case_fold.apply(&raw)
}

#[async_trait]
impl FileSystem for IsoFileSystem {
    fn label(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn usage(&self) -> Usage {
        let total: u64 = self.entries.values().filter(|n| !n.is_dir).map(|n| n.size).sum();
        Usage {
            total_space: total,
            free_space: 0,
        }
    }

    fn stat_sync(&self, path: &Utf8Path) -> ArchiveResult<Inode> {
        let (_, node) = self.resolve(path)?;
        Ok(self.inode_for_node(node))
    }

    async fn stat(&self, path: &Utf8Path) -> ArchiveResult<Inode> {
        self.stat_sync(path)
    }

    fn readdir_sync(&self, path: &Utf8Path) -> ArchiveResult<Vec<String>> {
        let (key, node) = self.resolve(path)?;
        if !node.is_dir {
            return Err(ArchiveError::NotADirectory(key.clone()));
        }
        self.children
            .get(key)
            .cloned()
            .ok_or_else(|| ArchiveError::NoData(key.clone()))
    }

    async fn readdir(&self, path: &Utf8Path) -> ArchiveResult<Vec<String>> {
        self.readdir_sync(path)
    }

    fn read_sync(&self, path: &Utf8Path, dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize> {
        let (abs_start, len) = self.file_range(path, offset, end)?;
        if len == 0 {
            return Ok(0);
        }
        let bytes = self.source.get_sync(abs_start, len)?;
        dst[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    async fn read(&self, path: &Utf8Path, dst: &mut [u8], offset: u64, end: u64) -> ArchiveResult<usize> {
        let (abs_start, len) = self.file_range(path, offset, end)?;
        if len == 0 {
            return Ok(0);
        }
        let bytes = self.source.get(abs_start, len).await?;
        dst[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}
