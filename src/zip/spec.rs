//! Code specific to the PKZIP central-directory format spec (APPNOTE.TXT
//! sections 4.3.7, 4.3.12, 4.3.16). Kept separate from [`super::fs`] for the
//! same reason the teacher keeps this split: the nitty gritty byte layout
//! lives here, the mount/stat/readdir logic lives one level up.

use std::convert::TryInto;

use memchr::memmem;

use crate::codecs;
use crate::error::{ArchiveError, ArchiveResult};

pub const EOCD_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
pub const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// The widest window APPNOTE allows between the actual EOCD and the end of
/// the file (a 16-bit comment length, plus the fixed 22-byte record).
pub const EOCD_SEARCH_WINDOW: u64 = 65535 + 22;

fn read_u16(input: &mut &[u8]) -> ArchiveResult<u16> {
    if input.len() < 2 {
        return Err(ArchiveError::invalid("truncated ZIP record"));
    }
    let (bytes, rest) = input.split_at(2);
    *input = rest;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(input: &mut &[u8]) -> ArchiveResult<u32> {
    if input.len() < 4 {
        return Err(ArchiveError::invalid("truncated ZIP record"));
    }
    let (bytes, rest) = input.split_at(4);
    *input = rest;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// End Of Central Directory record (APPNOTE 4.3.16).
#[derive(Debug)]
pub struct Eocd {
    pub disk: u16,
    pub entries_disk: u16,
    pub disk_entry_count: u16,
    pub total_entry_count: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl Eocd {
    /// Searches backward through `tail` (the last bytes of the archive)
    /// for the EOCD signature, per `spec.md` §4.8: "scanning backward from
    /// `size-22` up to 64 KiB".
    pub fn find(tail: &[u8]) -> ArchiveResult<usize> {
        memmem::rfind(tail, &EOCD_MAGIC)
            .ok_or_else(|| ArchiveError::io_error("couldn't find End Of Central Directory Record"))
    }

    pub fn parse(mut buf: &[u8]) -> ArchiveResult<Self> {
        if buf.len() < 22 || buf[..4] != EOCD_MAGIC {
            return Err(ArchiveError::invalid("invalid EOCD signature"));
        }
        buf = &buf[4..];
        let disk = read_u16(&mut buf)?;
        let entries_disk = read_u16(&mut buf)?;
        let disk_entry_count = read_u16(&mut buf)?;
        let total_entry_count = read_u16(&mut buf)?;
        let cd_size = read_u32(&mut buf)?;
        let cd_offset = read_u32(&mut buf)?;
        let comment_length = read_u16(&mut buf)? as usize;
        let comment = buf.get(..comment_length).unwrap_or(buf).to_vec();

        if disk != entries_disk {
            return Err(ArchiveError::UnsupportedArchive(
                "spanned/multi-disk archives are not supported".into(),
            ));
        }
        if cd_offset == 0xFFFF_FFFF {
            return Err(ArchiveError::UnsupportedArchive(
                "ZIP64 archives are not supported".into(),
            ));
        }

        Ok(Self {
            disk,
            entries_disk,
            disk_entry_count,
            total_entry_count,
            cd_size,
            cd_offset,
            comment,
        })
    }
}

/// Extracts the "names are UTF-8" bit (bit 11) from a general-purpose flags
/// field.
pub fn is_utf8(flags: u16) -> bool {
    flags & (1 << 11) != 0
}

/// Extracts the "this entry is encrypted" bit (bit 0).
pub fn is_encrypted(flags: u16) -> bool {
    flags & 1 != 0
}

/// Decodes a ZIP entry name per its general-purpose flags and normalizes
/// path separators, per `spec.md` §4.7/§3 ("Stored paths are normalized by
/// replacing backslashes with forward slashes").
pub fn decode_name(raw: &[u8], flags: u16) -> String {
    let decoded = if is_utf8(flags) {
        codecs::decode_utf8_lenient(raw)
    } else {
        codecs::decode_cp437(raw)
    };
    decoded.replace('\\', "/")
}

/// A Central Directory File Header (APPNOTE 4.3.12).
#[derive(Debug)]
pub struct CentralDirectoryEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub header_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryEntry {
    /// Parses one entry from the front of `buf`, returning it plus the
    /// number of bytes consumed (`46 + nameLen + extraLen + commentLen`,
    /// per `spec.md` §3).
    pub fn parse(buf: &[u8]) -> ArchiveResult<(Self, usize)> {
        if buf.len() < 46 || buf[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(ArchiveError::invalid("invalid central directory entry"));
        }
        let mut cursor = &buf[4..];
        let version_made_by = read_u16(&mut cursor)?;
        let version_needed = read_u16(&mut cursor)?;
        let flags = read_u16(&mut cursor)?;
        let compression_method = read_u16(&mut cursor)?;
        let last_mod_time = read_u16(&mut cursor)?;
        let last_mod_date = read_u16(&mut cursor)?;
        let crc32 = read_u32(&mut cursor)?;
        let compressed_size = read_u32(&mut cursor)?;
        let uncompressed_size = read_u32(&mut cursor)?;
        let name_len = read_u16(&mut cursor)? as usize;
        let extra_len = read_u16(&mut cursor)? as usize;
        let comment_len = read_u16(&mut cursor)? as usize;
        let disk_number_start = read_u16(&mut cursor)?;
        let internal_attrs = read_u16(&mut cursor)?;
        let external_attrs = read_u32(&mut cursor)?;
        let header_offset = read_u32(&mut cursor)?;

        let total_len = 46 + name_len + extra_len + comment_len;
        if buf.len() < total_len {
            return Err(ArchiveError::invalid("truncated central directory entry"));
        }
        let name = buf[46..46 + name_len].to_vec();
        let extra = buf[46 + name_len..46 + name_len + extra_len].to_vec();
        let comment = buf[46 + name_len + extra_len..total_len].to_vec();

        Ok((
            Self {
                version_made_by,
                version_needed,
                flags,
                compression_method,
                last_mod_time,
                last_mod_date,
                crc32,
                compressed_size,
                uncompressed_size,
                disk_number_start,
                internal_attrs,
                external_attrs,
                header_offset,
                name,
                extra,
                comment,
            },
            total_len,
        ))
    }
}

/// A Local File Header (APPNOTE 4.3.7): the per-entry preamble that
/// immediately precedes an entry's compressed bytes.
#[derive(Debug)]
pub struct LocalFileHeader {
    pub flags: u16,
    pub compression_method: u16,
    pub compressed_size: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Parses the fixed 30-byte header plus the variable name/extra
    /// fields from the front of `buf`.
    pub fn parse(buf: &[u8]) -> ArchiveResult<(Self, usize)> {
        if buf.len() < 30 || buf[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(ArchiveError::invalid("invalid local file header"));
        }
        let mut cursor = &buf[4..];
        let _version_needed = read_u16(&mut cursor)?;
        let flags = read_u16(&mut cursor)?;
        let compression_method = read_u16(&mut cursor)?;
        let _last_mod_time = read_u16(&mut cursor)?;
        let _last_mod_date = read_u16(&mut cursor)?;
        let _crc32 = read_u32(&mut cursor)?;
        let compressed_size = read_u32(&mut cursor)?;
        let _uncompressed_size = read_u32(&mut cursor)?;
        let name_len = read_u16(&mut cursor)? as usize;
        let extra_len = read_u16(&mut cursor)? as usize;

        let total_len = 30 + name_len + extra_len;
        if buf.len() < total_len {
            return Err(ArchiveError::invalid("truncated local file header"));
        }
        let name = buf[30..30 + name_len].to_vec();
        let extra = buf[30 + name_len..total_len].to_vec();

        Ok((
            Self {
                flags,
                compression_method,
                compressed_size,
                name,
                extra,
            },
            total_len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_roundtrip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&EOCD_MAGIC);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&100u32.to_le_bytes());
        buf.extend_from_slice(&200u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());

        let eocd = Eocd::parse(&buf).unwrap();
        assert_eq!(eocd.total_entry_count, 3);
        assert_eq!(eocd.cd_size, 100);
        assert_eq!(eocd.cd_offset, 200);
    }

    #[test]
    fn eocd_rejects_spanned() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&EOCD_MAGIC);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // entries_disk != disk
        buf.extend_from_slice(&[0; 12]);
        buf.extend_from_slice(&0u16.to_le_bytes());
        assert!(matches!(
            Eocd::parse(&buf),
            Err(ArchiveError::UnsupportedArchive(_))
        ));
    }

    #[test]
    fn backslash_paths_are_normalized() {
        assert_eq!(decode_name(b"nested\\omg.txt", 0x0800), "nested/omg.txt");
    }
}
