//! Directory-record enumeration within one extent's bytes.
//!
//! `spec.md` §9 scopes traversal to walking directory records directly
//! (path-table traversal is a non-goal), so this module's only job is:
//! given the raw bytes of a directory's extent, yield each child record in
//! on-disc order, skipping padding and `.`/`..`.

use crate::error::ArchiveResult;
use crate::iso9660::record::DirectoryRecord;

/// Iterates the directory records packed into `extent_bytes` (a directory's
/// full extent, `data_length` bytes). Records never span a logical-block
/// boundary (ECMA-119 §6.8.1); when a record's length field reads as zero,
/// the rest of the current block is padding and the walk skips to the next
/// block boundary.
pub fn children(
    extent_bytes: &[u8],
    block_size: u64,
    decode_name: fn(&[u8]) -> String,
) -> ArchiveResult<Vec<DirectoryRecord>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let block_size = block_size as usize;

    while pos < extent_bytes.len() {
        let block_end = ((pos / block_size) + 1) * block_size;
        let block_end = block_end.min(extent_bytes.len());
        if pos >= block_end {
            break;
        }

        let record_len = extent_bytes[pos];
        if record_len == 0 {
            pos = block_end;
            continue;
        }

        let record = DirectoryRecord::parse(&extent_bytes[pos..block_end], decode_name)?;
        pos += record.record_length as usize;

        if record.file_identifier == "." || record.file_identifier == ".." {
            continue;
        }
        out.push(record);
    }

    Ok(out)
}
