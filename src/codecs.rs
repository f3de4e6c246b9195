//! Text decoders and MS-DOS/ISO datetime decoding.
//!
//! Every filesystem-visible string coming out of this module is already
//! lower-cased, so case-insensitive lookup (the default fold, see
//! [`crate::vfs`]) falls out of decoding instead of being bolted on at
//! every call site.

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::{BorrowFromCp437, CP437_CONTROL};

/// Decodes `bytes` as ASCII, lower-cased. Non-ASCII bytes are replaced with
/// `U+FFFD`, matching the "lenient; ASCII in practice" tolerance `spec.md`
/// calls for on ISO primary-descriptor strings.
pub fn decode_ascii(bytes: &[u8]) -> String {
    decode_utf8_lenient(bytes)
}

/// Decodes `bytes` as UTF-8, lower-cased, lossily replacing invalid
/// sequences.
pub fn decode_utf8_lenient(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_lowercase()
}

/// Decodes `bytes` as CP437, the historical DOS/OEM codepage ZIP falls back
/// to when the UTF-8 flag bit isn't set.
pub fn decode_cp437(bytes: &[u8]) -> String {
    let cow: std::borrow::Cow<str> = std::borrow::Cow::borrow_from_cp437(bytes, &CP437_CONTROL);
    cow.to_lowercase()
}

/// Decodes `bytes` as big-endian UTF-16 (Joliet names), lower-cased.
/// Unpaired surrogates decode to `U+FFFD`.
pub fn decode_utf16be(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>()
        .to_lowercase()
}

/// Decodes a ZIP-style 32-bit MS-DOS date/time pair (two 16-bit
/// little-endian fields: time then date, per `spec.md` §4.2).
///
/// MS-DOS date/time is clamped rather than rejected on out-of-range fields,
/// since archives in the wild routinely contain a zeroed-out date.
pub fn parse_msdos_datetime(time: u16, date: u16) -> NaiveDateTime {
    let seconds = ((time & 0b0001_1111) as u32) * 2;
    let minutes = ((time >> 5) & 0b0011_1111) as u32;
    let hours = ((time >> 11) & 0b0001_1111) as u32;

    let day = (date & 0b0001_1111) as u32;
    let month = ((date >> 5) & 0b0000_1111) as u32;
    let year = (((date >> 9) & 0b0111_1111) as i32) + 1980;

    let day = day.clamp(1, 31);
    let month = month.clamp(1, 12);
    let hours = hours.min(23);
    let minutes = minutes.min(59);
    let seconds = seconds.min(59);

    // Walk back a day at a time if the clamped day doesn't exist in the
    // given month (e.g. Feb 30 clamped from a corrupt date field).
    for day in (1..=day).rev() {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return date.and_hms_opt(hours, minutes, seconds).unwrap();
        }
    }
    // Completely bogus date: fall back to the Unix epoch.
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Decodes an ISO 9660 directory-record "short form" date (7 bytes, per
/// `spec.md` §4.4): years since 1900, month, day, hour, minute, second,
/// and a GMT offset in 15-minute increments (ignored per the spec).
///
/// A record with all bytes zero (the common "unspecified" sentinel) decodes
/// to `None`.
pub fn parse_iso_short_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    debug_assert!(bytes.len() >= 7);
    if bytes[..7] == [0u8; 7] {
        return None;
    }
    let year = 1900 + bytes[0] as i32;
    let month = bytes[1] as u32;
    let day = bytes[2] as u32;
    let hour = bytes[3] as u32;
    let minute = bytes[4] as u32;
    let second = bytes[5] as u32;

    NaiveDate::from_ymd_opt(year, month.max(1), day.max(1))
        .and_then(|d| d.and_hms_opt(hour.min(23), minute.min(59), second.min(59)))
}

/// Decodes an ISO 9660 "long form" ASCII date used in the Primary Volume
/// Descriptor (17 bytes: `YYYYMMDDhhmmssCC` plus a trailing GMT offset
/// byte). All-zero/all-space records (unspecified) decode to `None`.
pub fn parse_iso_long_datetime(bytes: &[u8]) -> Option<NaiveDateTime> {
    debug_assert!(bytes.len() >= 17);
    let digits = &bytes[..16];
    if digits.iter().all(|&b| b == b'0' || b == 0) {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    let field = |range: std::ops::Range<usize>| text.get(range)?.parse::<u32>().ok();

    let year = field(0..4)? as i32;
    let month = field(4..6)?;
    let day = field(6..8)?;
    let hour = field(8..10)?;
    let minute = field(10..12)?;
    let second = field(12..14)?;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_lower_cases() {
        assert_eq!(decode_ascii(b"HELLO.TXT"), "hello.txt");
    }

    #[test]
    fn utf16be_joliet_names() {
        // "hi" in UTF-16BE
        let bytes = [0x00, b'H', 0x00, b'I'];
        assert_eq!(decode_utf16be(&bytes), "hi");
    }

    #[test]
    fn msdos_datetime_basic() {
        // 2023-03-04 13:37:10 (seconds truncated to even, per 2s resolution)
        let date: u16 = ((2023 - 1980) << 9) | (3 << 5) | 4;
        let time: u16 = (13 << 11) | (37 << 5) | (10 / 2);
        let dt = parse_msdos_datetime(time, date);
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2023-03-04 13:37:10");
    }

    #[test]
    fn msdos_datetime_clamps_invalid_day() {
        // Feb 30th does not exist; should clamp down to a valid date.
        let date: u16 = ((2023 - 1980) << 9) | (2 << 5) | 30;
        let dt = parse_msdos_datetime(0, date);
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2023-02-28");
    }

    #[test]
    fn iso_short_datetime_roundtrip() {
        let bytes = [123, 6, 15, 12, 30, 0, 0]; // 2023-06-15 12:30:00
        let dt = parse_iso_short_datetime(&bytes).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2023-06-15 12:30:00");
    }

    #[test]
    fn iso_short_datetime_all_zero_is_none() {
        assert!(parse_iso_short_datetime(&[0u8; 7]).is_none());
    }

    #[test]
    fn iso_long_datetime_roundtrip() {
        let bytes = b"20230615123045000";
        let dt = parse_iso_long_datetime(bytes).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2023-06-15 12:30:45");
    }
}
