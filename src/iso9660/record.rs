//! ISO 9660 / ECMA-119 on-disk structures: volume descriptors and directory
//! records. Byte offsets follow ECMA-119 §8 and §9.

use crate::codecs::{decode_ascii, decode_utf16be, parse_iso_long_datetime, parse_iso_short_datetime};
use crate::error::{ArchiveError, ArchiveResult};
use chrono::NaiveDateTime;

pub const SECTOR_SIZE: u64 = 2048;
pub const VOLUME_DESCRIPTOR_START: u64 = 16 * SECTOR_SIZE;

pub const VD_TYPE_BOOT_RECORD: u8 = 0;
pub const VD_TYPE_PRIMARY: u8 = 1;
pub const VD_TYPE_SUPPLEMENTARY: u8 = 2;
pub const VD_TYPE_PARTITION: u8 = 3;
pub const VD_TYPE_TERMINATOR: u8 = 255;

pub const STANDARD_IDENTIFIER: &[u8; 5] = b"CD001";

/// Reads the little-endian half of a both-endian field; ECMA-119 mandates
/// both halves carry the same value, so only the side native to this
/// platform is trusted (per `spec.md` §4.4: "little-endian is
/// authoritative").
fn both_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn both_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// One of the three Joliet "UCS-2 Level" escape sequences that mark a
/// Supplementary Volume Descriptor as Joliet rather than a plain
/// enhanced-volume-descriptor.
const JOLIET_ESCAPE_SEQUENCES: [[u8; 3]; 3] = [
    [0x25, 0x2F, 0x40],
    [0x25, 0x2F, 0x43],
    [0x25, 0x2F, 0x45],
];

fn is_joliet_escape(escape: &[u8]) -> bool {
    JOLIET_ESCAPE_SEQUENCES
        .iter()
        .any(|seq| escape.starts_with(seq))
}

/// A parsed Primary or Supplementary (Joliet) Volume Descriptor.
///
/// Both share a layout (ECMA-119 §8.4/§8.5); what differs is the string
/// encoding of names (ASCII vs UTF-16BE) and, for Joliet, the escape
/// sequence identifying it. Keeping one struct for both, gated on
/// `is_joliet`, avoids duplicating every field per `spec.md` §9 (Joliet
/// detection must key off the escape sequence, not the descriptor's
/// declared name, which is a gotcha some implementations get wrong).
#[derive(Debug, Clone)]
pub struct VolumeDescriptor {
    pub descriptor_type: u8,
    pub is_joliet: bool,
    pub volume_identifier: String,
    pub volume_space_size: u32,
    pub logical_block_size: u16,
    pub path_table_size: u32,
    pub root_directory_record: DirectoryRecord,
    pub creation_date: Option<NaiveDateTime>,
    pub modification_date: Option<NaiveDateTime>,
}

impl VolumeDescriptor {
    /// Parses one 2048-byte volume-descriptor sector. Returns `Ok(None)`
    /// for descriptor types this crate doesn't need to retain (boot
    /// records, partition descriptors, the terminator).
    pub fn parse(sector: &[u8]) -> ArchiveResult<Option<Self>> {
        if sector.len() < SECTOR_SIZE as usize {
            return Err(ArchiveError::invalid("short volume descriptor sector"));
        }
        if &sector[1..6] != STANDARD_IDENTIFIER {
            return Err(ArchiveError::invalid("missing CD001 standard identifier"));
        }
        let descriptor_type = sector[0];

        let (is_joliet, decode_name): (bool, fn(&[u8]) -> String) = match descriptor_type {
            VD_TYPE_PRIMARY => (false, decode_ascii),
            VD_TYPE_SUPPLEMENTARY => {
                let escape = &sector[88..120];
                if is_joliet_escape(escape) {
                    (true, decode_utf16be)
                } else {
                    // An enhanced volume descriptor we don't otherwise
                    // support; let the caller skip it.
                    return Ok(None);
                }
            }
            _ => return Ok(None),
        };

        let volume_identifier = decode_name(&sector[40..72]).trim_end().to_string();
        let volume_space_size = both_u32(&sector[80..88]);
        let logical_block_size = both_u16(&sector[128..132]);
        let path_table_size = both_u32(&sector[132..140]);
        let root_directory_record = DirectoryRecord::parse(&sector[156..190], decode_name)?;
        let creation_date = parse_iso_long_datetime(&sector[813..830]);
        let modification_date = parse_iso_long_datetime(&sector[830..847]);

        Ok(Some(Self {
            descriptor_type,
            is_joliet,
            volume_identifier,
            volume_space_size,
            logical_block_size,
            path_table_size,
            root_directory_record,
            creation_date,
            modification_date,
        }))
    }
}

bitflags::bitflags! {
    /// Directory record flag byte (ECMA-119 §9.1.6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        const HIDDEN       = 0x01;
        const DIRECTORY    = 0x02;
        const ASSOCIATED   = 0x04;
        const RECORD       = 0x08;
        const PROTECTION   = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

/// One ISO 9660 directory record (ECMA-119 §9.1), plus whatever bytes
/// trailed the fixed+name fields (the System Use Area, where Rock Ridge
/// lives).
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub extent_location: u32,
    pub data_length: u32,
    pub recording_date: Option<NaiveDateTime>,
    pub flags: RecordFlags,
    pub file_identifier: String,
    pub system_use: Vec<u8>,
    /// Total length of this record, so callers can advance a cursor.
    pub record_length: u8,
}

impl DirectoryRecord {
    /// Parses one directory record. `decode_name` is the PVD's
    /// (ASCII) or SVD's (UTF-16BE) name decoder.
    pub fn parse(bytes: &[u8], decode_name: fn(&[u8]) -> String) -> ArchiveResult<Self> {
        if bytes.is_empty() {
            return Err(ArchiveError::invalid("empty directory record"));
        }
        let record_length = bytes[0];
        if record_length == 0 {
            return Err(ArchiveError::invalid("zero-length directory record"));
        }
        if bytes.len() < record_length as usize || record_length < 34 {
            return Err(ArchiveError::invalid("truncated directory record"));
        }

        let extent_location = both_u32(&bytes[2..10]);
        let data_length = both_u32(&bytes[10..18]);
        let recording_date = parse_iso_short_datetime(&bytes[18..25]);
        let flags = RecordFlags::from_bits_truncate(bytes[25]);
        let id_len = bytes[32] as usize;
        let id_start = 33;
        let id_end = id_start + id_len;
        if id_end > record_length as usize {
            return Err(ArchiveError::invalid("directory record name overruns record"));
        }

        let file_identifier = match bytes[id_start..id_end] {
            [0u8] => ".".to_string(),
            [1u8] => "..".to_string(),
            ref raw => decode_name(raw),
        };

        // System use area starts right after the name, padded to an even
        // offset (ECMA-119 §9.1.13).
        let su_start = if id_end % 2 == 1 { id_end + 1 } else { id_end };
        let system_use = bytes
            .get(su_start..record_length as usize)
            .unwrap_or(&[])
            .to_vec();

        Ok(Self {
            extent_location,
            data_length,
            recording_date,
            flags,
            file_identifier,
            system_use,
            record_length,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags.contains(RecordFlags::DIRECTORY)
    }

    /// The displayed name, with the `;version` suffix stripped (`spec.md`
    /// §4.4 rule 3). Directory records return the raw identifier unchanged
    /// (rule 2); Rock Ridge `NM` names, when present, take priority over
    /// this at the caller.
    pub fn file_name(&self) -> String {
        if self.is_directory() {
            return self.file_identifier.clone();
        }
        match self.file_identifier.find(';') {
            None => self.file_identifier.clone(),
            Some(pos) if pos > 0 && self.file_identifier.as_bytes()[pos - 1] == b'.' => {
                self.file_identifier[..pos - 1].to_string()
            }
            Some(pos) => self.file_identifier[..pos].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_record(name: &[u8], is_dir: bool, extent: u32, size: u32) -> Vec<u8> {
        let id_len = name.len();
        let pad = id_len % 2 == 0;
        let fixed = 33 + id_len + if pad { 1 } else { 0 };
        let mut buf = vec![0u8; fixed];
        buf[0] = fixed as u8;
        buf[2..6].copy_from_slice(&extent.to_le_bytes());
        buf[6..10].copy_from_slice(&extent.to_be_bytes());
        buf[10..14].copy_from_slice(&size.to_le_bytes());
        buf[14..18].copy_from_slice(&size.to_be_bytes());
        buf[25] = if is_dir { RecordFlags::DIRECTORY.bits() } else { 0 };
        buf[32] = id_len as u8;
        buf[33..33 + id_len].copy_from_slice(name);
        buf
    }

    #[test]
    fn parses_basic_file_record() {
        let bytes = build_record(b"HELLO.TXT;1", false, 20, 13);
        let record = DirectoryRecord::parse(&bytes, decode_ascii).unwrap();
        assert_eq!(record.file_identifier, "hello.txt;1");
        assert_eq!(record.file_name(), "hello.txt");
        assert_eq!(record.extent_location, 20);
        assert_eq!(record.data_length, 13);
        assert!(!record.is_directory());
    }

    #[test]
    fn dot_and_dotdot_records() {
        let dot = DirectoryRecord::parse(&build_record(&[0], true, 1, 2048), decode_ascii).unwrap();
        assert_eq!(dot.file_identifier, ".");
        let dotdot = DirectoryRecord::parse(&build_record(&[1], true, 1, 2048), decode_ascii).unwrap();
        assert_eq!(dotdot.file_identifier, "..");
    }

    #[test]
    fn version_strip_drops_trailing_dot() {
        let record = DirectoryRecord::parse(&build_record(b"FILE.;1", false, 1, 1), decode_ascii).unwrap();
        assert_eq!(record.file_identifier, "file.;1");
        assert_eq!(record.file_name(), "file");
    }

    #[test]
    fn version_strip_without_trailing_dot() {
        let record = DirectoryRecord::parse(&build_record(b"NOEXT;1", false, 1, 1), decode_ascii).unwrap();
        assert_eq!(record.file_name(), "noext");
    }

    #[test]
    fn directory_record_keeps_raw_identifier() {
        let record = DirectoryRecord::parse(&build_record(b"SUBDIR;1", true, 1, 2048), decode_ascii).unwrap();
        assert_eq!(record.file_name(), "subdir;1");
    }

    #[test]
    fn no_version_separator_is_returned_as_is() {
        let record = DirectoryRecord::parse(&build_record(b"NOVERSION", false, 1, 1), decode_ascii).unwrap();
        assert_eq!(record.file_name(), "noversion");
    }
}
