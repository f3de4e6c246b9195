//! System Use Sharing Protocol (SUSP) and Rock Ridge (`IEEE_P1282`) entries.
//!
//! Entries are tagged two-byte records packed into a directory record's
//! System Use Area (and into `CE` continuation areas elsewhere on disc).
//! Each is `[SIG(2)][LEN(1)][VERSION(1)][DATA(LEN-4)]`.

use bitflags::bitflags;

use crate::codecs::decode_ascii;
use crate::error::{ArchiveError, ArchiveResult};

/// Directory walks and symlink resolution both follow `CE`/`SL` chains that
/// a crafted image could make arbitrarily long; both are capped here
/// per `spec.md` §9.
pub const MAX_SUSP_DEPTH: usize = 32;
pub const MAX_SYMLINK_DEPTH: usize = 32;

/// Rock Ridge's registered SUSP extension identifier (the `ER` entry's
/// "ext_id" field), per the IEEE P1282 Rock Ridge Interchange Protocol.
pub const ROCK_RIDGE_EXT_ID: &str = "IEEE_P1282";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlternateNameFlags: u8 {
        const CONTINUE = 1 << 0;
        const CURRENT  = 1 << 1;
        const PARENT   = 1 << 2;
        const HOST     = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymlinkComponentFlags: u8 {
        const CONTINUE = 1 << 0;
        const CURRENT  = 1 << 1;
        const PARENT   = 1 << 2;
        const ROOT     = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimestampFlags: u8 {
        const CREATION   = 1 << 0;
        const MODIFY     = 1 << 1;
        const ACCESS     = 1 << 2;
        const ATTRIBUTES = 1 << 3;
        const BACKUP     = 1 << 4;
        const EXPIRATION = 1 << 5;
        const EFFECTIVE  = 1 << 6;
        const LONG_FORM  = 1 << 7;
    }
}

#[derive(Debug, Clone)]
pub struct SymlinkComponent {
    pub flags: SymlinkComponentFlags,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct PosixTimestamps {
    pub access_ms: Option<i64>,
    pub modify_ms: Option<i64>,
    pub attributes_ms: Option<i64>,
}

/// One decoded System Use entry. Variants not interpreted further than
/// their tag still get their raw payload preserved in `Unknown`, so a
/// consumer walking the chain can see `CE`/`ST` markers go by even though
/// this crate only acts on a subset.
#[derive(Debug, Clone)]
pub enum SystemUseEntry {
    /// `SP`: SUSP indicator. Must be the first entry in the root `.`
    /// record's system use area for the rest of this protocol to apply.
    SuspIndicator { skip: u8 },
    /// `CE`: continue parsing in another extent.
    Continuation { block: u32, offset: u32, length: u32 },
    /// `ST`: no more entries follow in this area.
    Terminator,
    /// `ER`: one extension is in use; `ext_id` identifies which.
    ExtensionReference { ext_id: String },
    /// `PX`: POSIX file mode/links/uid/gid, optionally inode (Rock Ridge 1.12).
    PosixAttributes {
        mode: u32,
        links: u32,
        uid: u32,
        gid: u32,
        inode: Option<u32>,
    },
    /// `PN`: POSIX device major/minor numbers.
    PosixDevice { major: u32, minor: u32 },
    /// `SL`: one segment of a symbolic link's target, `should_continue`
    /// indicating another `SL` entry completes it.
    SymbolicLink {
        should_continue: bool,
        components: Vec<SymlinkComponent>,
    },
    /// `NM`: an alternate (POSIX) name, possibly continued across entries.
    AlternateName { should_continue: bool, name: String },
    /// `CL`: this directory record is a placeholder; the real directory
    /// lives at the given extent.
    ChildLink { extent: u32 },
    /// `PL`: the parent of a relocated directory.
    ParentLink { extent: u32 },
    /// `RE`: this record is itself a relocated directory, no child to follow.
    Relocated,
    /// `TF`: POSIX timestamps.
    Timestamps(PosixTimestamps),
    /// `RR`: legacy "which Rock Ridge fields are present" marker, superseded
    /// by `ER`/`SUSP` but still occasionally seen.
    LegacyRockRidge,
    Unknown { signature: [u8; 2], data: Vec<u8> },
}

fn parse_both_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_timestamp_field(bytes: &[u8], long_form: bool) -> Option<i64> {
    use crate::codecs::{parse_iso_long_datetime, parse_iso_short_datetime};
    let dt = if long_form {
        parse_iso_long_datetime(bytes)
    } else {
        parse_iso_short_datetime(bytes)
    };
    dt.map(|d| d.and_utc().timestamp_millis())
}

/// Walks one System Use Area, yielding entries in order. Does not follow
/// `CE` continuations; callers combine this with [`collect_all`] to walk
/// the whole chain.
fn parse_area(mut input: &[u8]) -> ArchiveResult<Vec<SystemUseEntry>> {
    let mut entries = Vec::new();
    while input.len() >= 4 {
        let signature = [input[0], input[1]];
        let length = input[2] as usize;
        let _version = input[3];
        if length < 4 || length > input.len() {
            break;
        }
        let data = &input[4..length];

        let entry = match &signature {
            b"SP" => {
                if data.len() < 3 || data[0] != 0xBE || data[1] != 0xEF {
                    return Err(ArchiveError::invalid("bad SP magic in SUSP area"));
                }
                SystemUseEntry::SuspIndicator { skip: data[2] }
            }
            b"CE" if data.len() >= 24 => SystemUseEntry::Continuation {
                block: parse_both_u32(&data[0..8]),
                offset: parse_both_u32(&data[8..16]),
                length: parse_both_u32(&data[16..24]),
            },
            b"ST" => SystemUseEntry::Terminator,
            b"ER" if data.len() >= 3 => {
                let id_len = data[0] as usize;
                let desc_len = data[1] as usize;
                let app_len = data[2] as usize;
                let id_start = 3;
                let ext_id = data
                    .get(id_start..id_start + id_len.min(data.len().saturating_sub(id_start)))
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                let _ = (desc_len, app_len);
                SystemUseEntry::ExtensionReference { ext_id }
            }
            b"ES" => SystemUseEntry::Unknown {
                signature,
                data: data.to_vec(),
            },
            b"PX" if data.len() >= 16 => {
                let mode = parse_both_u32(&data[0..8]);
                let links = parse_both_u32(&data[8..16]);
                let uid = if data.len() >= 24 {
                    parse_both_u32(&data[16..24])
                } else {
                    0
                };
                let gid = if data.len() >= 32 {
                    parse_both_u32(&data[24..32])
                } else {
                    0
                };
                let inode = if data.len() >= 40 {
                    Some(parse_both_u32(&data[32..40]))
                } else {
                    None
                };
                SystemUseEntry::PosixAttributes {
                    mode,
                    links,
                    uid,
                    gid,
                    inode,
                }
            }
            b"PN" if data.len() >= 16 => SystemUseEntry::PosixDevice {
                major: parse_both_u32(&data[0..8]),
                minor: parse_both_u32(&data[8..16]),
            },
            b"SL" if !data.is_empty() => {
                let should_continue = data[0] & 0x01 != 0;
                let mut components = Vec::new();
                let mut rest = &data[1..];
                while rest.len() >= 2 {
                    let flags = SymlinkComponentFlags::from_bits_truncate(rest[0]);
                    let len = rest[1] as usize;
                    if rest.len() < 2 + len {
                        break;
                    }
                    let content = String::from_utf8_lossy(&rest[2..2 + len]).to_string();
                    components.push(SymlinkComponent { flags, content });
                    rest = &rest[2 + len..];
                }
                SystemUseEntry::SymbolicLink {
                    should_continue,
                    components,
                }
            }
            b"NM" if !data.is_empty() => {
                let flags = AlternateNameFlags::from_bits_truncate(data[0]);
                let name = decode_ascii(&data[1..]);
                SystemUseEntry::AlternateName {
                    should_continue: flags.contains(AlternateNameFlags::CONTINUE),
                    name,
                }
            }
            b"CL" if data.len() >= 8 => SystemUseEntry::ChildLink {
                extent: parse_both_u32(&data[0..8]),
            },
            b"PL" if data.len() >= 8 => SystemUseEntry::ParentLink {
                extent: parse_both_u32(&data[0..8]),
            },
            b"RE" => SystemUseEntry::Relocated,
            b"TF" if !data.is_empty() => {
                let flags = TimestampFlags::from_bits_truncate(data[0]);
                let long_form = flags.contains(TimestampFlags::LONG_FORM);
                let field_size = if long_form { 17 } else { 7 };
                let mut offset = 1;
                let mut ts = PosixTimestamps::default();
                // Fields appear in this fixed order when their flag is set
                // (SUSP §5.7): creation, modify, access, attributes,
                // backup, expiration, effective. Only modify/access/
                // attributes map onto a POSIX stat field we expose.
                for flag in [
                    TimestampFlags::CREATION,
                    TimestampFlags::MODIFY,
                    TimestampFlags::ACCESS,
                    TimestampFlags::ATTRIBUTES,
                    TimestampFlags::BACKUP,
                    TimestampFlags::EXPIRATION,
                    TimestampFlags::EFFECTIVE,
                ] {
                    if !flags.contains(flag) {
                        continue;
                    }
                    if offset + field_size <= data.len() {
                        let value = parse_timestamp_field(&data[offset..offset + field_size], long_form);
                        match flag {
                            TimestampFlags::MODIFY => ts.modify_ms = value,
                            TimestampFlags::ACCESS => ts.access_ms = value,
                            TimestampFlags::ATTRIBUTES => ts.attributes_ms = value,
                            _ => {}
                        }
                    }
                    offset += field_size;
                }
                SystemUseEntry::Timestamps(ts)
            }
            b"RR" => SystemUseEntry::LegacyRockRidge,
            _ => SystemUseEntry::Unknown {
                signature,
                data: data.to_vec(),
            },
        };

        entries.push(entry);
        input = &input[length..];
    }
    Ok(entries)
}

/// A fetcher for extents referenced by `CE` continuation entries: given a
/// block/offset/length, returns those bytes. Abstracts over sync vs async
/// byte sources without this module depending on either directly.
pub trait ExtentFetcher {
    fn fetch(&mut self, block: u32, offset: u32, length: u32) -> ArchiveResult<Vec<u8>>;
}

/// Parses a System Use Area and follows any `CE` continuations (up to
/// [`MAX_SUSP_DEPTH`]), returning the flattened entry list.
pub fn collect_all(
    initial: &[u8],
    fetcher: &mut impl ExtentFetcher,
) -> ArchiveResult<Vec<SystemUseEntry>> {
    let mut all = Vec::new();
    let mut current = initial.to_vec();
    let mut depth = 0;

    loop {
        let entries = parse_area(&current)?;
        let continuation = entries.iter().find_map(|e| match e {
            SystemUseEntry::Continuation { block, offset, length } => Some((*block, *offset, *length)),
            _ => None,
        });
        all.extend(entries);

        match continuation {
            Some((block, offset, length)) => {
                depth += 1;
                if depth > MAX_SUSP_DEPTH {
                    return Err(ArchiveError::invalid("SUSP continuation area chain too deep"));
                }
                current = fetcher.fetch(block, offset, length)?;
            }
            None => break,
        }
    }

    Ok(all)
}
