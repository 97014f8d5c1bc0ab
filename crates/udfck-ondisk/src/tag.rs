//! Descriptor tag, CRC, entity identifiers, timestamps and dstrings.

use crc::{Algorithm, Crc};
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, Time, UtcOffset};
use udfck_types::{
    ensure_slice, read_fixed, read_le_u16, read_le_u32, DstringMask, ErrorMask, Lsn, ParseError,
    TAG_SIZE,
};

// ── Descriptor CRC (ECMA-167 7.2.6) ─────────────────────────────────────────

// x^16 + x^12 + x^5 + 1, no reflection, zero init (CRC-16/XMODEM
// parameters). The `check` value is the standard check word for
// "123456789".
const UDF_CRC_ALGO: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x0000,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x31C3,
    residue: 0x0000,
};

const UDF_CRC: Crc<u16> = Crc::<u16>::new(&UDF_CRC_ALGO);

/// Descriptor CRC over a byte range.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    UDF_CRC.checksum(data)
}

// ── Descriptor tag (ECMA-167 3/7.2, 4/7.2) ──────────────────────────────────

/// The 16-byte prefix of every descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tag {
    pub ident: u16,
    pub version: u16,
    pub checksum: u8,
    pub serial: u16,
    pub crc: u16,
    pub crc_length: u16,
    pub location: u32,
}

impl Tag {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, TAG_SIZE)?;
        Ok(Self {
            ident: read_le_u16(bytes, 0)?,
            version: read_le_u16(bytes, 2)?,
            checksum: bytes[4],
            serial: read_le_u16(bytes, 6)?,
            crc: read_le_u16(bytes, 8)?,
            crc_length: read_le_u16(bytes, 10)?,
            location: read_le_u32(bytes, 12)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.ident.to_le_bytes());
        buf[2..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4] = self.checksum;
        buf[5] = 0;
        buf[6..8].copy_from_slice(&self.serial.to_le_bytes());
        buf[8..10].copy_from_slice(&self.crc.to_le_bytes());
        buf[10..12].copy_from_slice(&self.crc_length.to_le_bytes());
        buf[12..16].copy_from_slice(&self.location.to_le_bytes());
    }

    /// 8-bit modular sum of tag bytes 0..16 excluding the checksum byte.
    #[must_use]
    pub fn compute_checksum(tag_bytes: &[u8]) -> u8 {
        tag_bytes[..TAG_SIZE]
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 4)
            .fold(0_u8, |sum, (_, b)| sum.wrapping_add(*b))
    }

    /// Whether the stored checksum matches the bytes.
    #[must_use]
    pub fn checksum_ok(tag_bytes: &[u8]) -> bool {
        tag_bytes.len() >= TAG_SIZE && Self::compute_checksum(tag_bytes) == tag_bytes[4]
    }
}

/// Outcome of structural validation of one descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub mask: ErrorMask,
    /// Parsed tag, present whenever the slice held 16 bytes.
    pub tag: Option<Tag>,
    /// CRC length was shorter than the descriptor body but internally valid.
    pub short_crc: bool,
}

/// Validate checksum, identifier, CRC and recorded position of a descriptor.
///
/// `bytes` must start at the tag and extend at least over the declared CRC
/// length. A declared CRC length shorter than `bytes.len() - 16` is accepted
/// when the CRC over that shorter span matches (`short_crc` is reported so
/// callers can warn).
#[must_use]
pub fn verify_descriptor(bytes: &[u8], expected_ident: u16, position: Lsn) -> VerifyOutcome {
    let mut mask = ErrorMask::empty();
    let Ok(tag) = Tag::parse(bytes) else {
        return VerifyOutcome {
            mask: ErrorMask::WRONG_DESC,
            tag: None,
            short_crc: false,
        };
    };

    if !Tag::checksum_ok(bytes) {
        mask.insert(ErrorMask::CHECKSUM);
    }
    if tag.ident != expected_ident {
        mask.insert(ErrorMask::WRONG_DESC);
    }

    let mut short_crc = false;
    let crc_len = usize::from(tag.crc_length);
    match ensure_slice(bytes, TAG_SIZE, crc_len) {
        Ok(body) => {
            if crc16(body) != tag.crc {
                mask.insert(ErrorMask::CRC);
            } else if crc_len < bytes.len() - TAG_SIZE {
                short_crc = true;
            }
        }
        Err(_) => mask.insert(ErrorMask::CRC),
    }

    if tag.location != position.0 {
        mask.insert(ErrorMask::POSITION);
    }

    VerifyOutcome {
        mask,
        tag: Some(tag),
        short_crc,
    }
}

/// Stamp a freshly serialized descriptor: CRC over the whole body, then the
/// tag checksum. The tag identifier, version, serial and location must
/// already be present in `buf[..16]`.
pub fn finalize_descriptor(buf: &mut [u8]) {
    let crc_len = (buf.len() - TAG_SIZE) as u16;
    buf[10..12].copy_from_slice(&crc_len.to_le_bytes());
    let crc = crc16(&buf[TAG_SIZE..]);
    buf[8..10].copy_from_slice(&crc.to_le_bytes());
    buf[4] = Tag::compute_checksum(buf);
}

/// Rewrite only the recorded location of a descriptor and recompute the tag
/// checksum. The descriptor CRC covers bytes after the tag and stays valid.
pub fn retag_in_place(buf: &mut [u8], location: Lsn) {
    buf[12..16].copy_from_slice(&location.0.to_le_bytes());
    buf[4] = Tag::compute_checksum(buf);
}

// ── Entity identifier (ECMA-167 1/7.4) ──────────────────────────────────────

pub const REGID_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegId {
    pub flags: u8,
    pub identifier: [u8; 23],
    pub suffix: [u8; 8],
}

impl Default for RegId {
    fn default() -> Self {
        Self {
            flags: 0,
            identifier: [0; 23],
            suffix: [0; 8],
        }
    }
}

impl RegId {
    /// Build from an ASCII identifier, NUL-padded.
    #[must_use]
    pub fn from_ident(ident: &[u8]) -> Self {
        let mut identifier = [0_u8; 23];
        let n = ident.len().min(23);
        identifier[..n].copy_from_slice(&ident[..n]);
        Self {
            flags: 0,
            identifier,
            suffix: [0; 8],
        }
    }

    /// Identifier with a UDF revision suffix (first two suffix bytes).
    #[must_use]
    pub fn with_udf_revision(ident: &[u8], revision: u16) -> Self {
        let mut regid = Self::from_ident(ident);
        regid.suffix[0..2].copy_from_slice(&revision.to_le_bytes());
        regid
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, REGID_SIZE)?;
        Ok(Self {
            flags: bytes[0],
            identifier: read_fixed::<23>(bytes, 1)?,
            suffix: read_fixed::<8>(bytes, 24)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0] = self.flags;
        buf[1..24].copy_from_slice(&self.identifier);
        buf[24..32].copy_from_slice(&self.suffix);
    }
}

// ── Timestamp (ECMA-167 1/7.3) ──────────────────────────────────────────────

pub const TIMESTAMP_SIZE: usize = 12;

/// Timestamp type stored in the upper 4 bits of `typeAndTimezone`; 1 means
/// local time with the offset in the signed 12-bit low field.
const TIMESTAMP_TYPE_LOCAL: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub type_and_timezone: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}

impl Timestamp {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, TIMESTAMP_SIZE)?;
        Ok(Self {
            type_and_timezone: read_le_u16(bytes, 0)?,
            year: read_le_u16(bytes, 2)?,
            month: bytes[4],
            day: bytes[5],
            hour: bytes[6],
            minute: bytes[7],
            second: bytes[8],
            centiseconds: bytes[9],
            hundreds_of_microseconds: bytes[10],
            microseconds: bytes[11],
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.type_and_timezone.to_le_bytes());
        buf[2..4].copy_from_slice(&self.year.to_le_bytes());
        buf[4] = self.month;
        buf[5] = self.day;
        buf[6] = self.hour;
        buf[7] = self.minute;
        buf[8] = self.second;
        buf[9] = self.centiseconds;
        buf[10] = self.hundreds_of_microseconds;
        buf[11] = self.microseconds;
    }

    /// Signed timezone offset in minutes, `None` when unspecified (-2047).
    #[must_use]
    pub fn timezone_offset_minutes(&self) -> Option<i16> {
        let raw = self.type_and_timezone & 0x0FFF;
        // Sign-extend the 12-bit field.
        let offset = if raw & 0x0800 != 0 {
            (raw | 0xF000) as i16
        } else {
            raw as i16
        };
        (offset != -2047).then_some(offset)
    }

    /// Convert to a point in time, `None` for out-of-range calendar fields.
    #[must_use]
    pub fn to_datetime(&self) -> Option<OffsetDateTime> {
        let month = Month::try_from(self.month).ok()?;
        let date = Date::from_calendar_date(i32::from(self.year), month, self.day).ok()?;
        let time = Time::from_hms(self.hour, self.minute, self.second).ok()?;
        let offset_minutes = self.timezone_offset_minutes().unwrap_or(0);
        let offset = UtcOffset::from_whole_seconds(i32::from(offset_minutes) * 60).ok()?;
        Some(date.with_time(time).assume_offset(offset))
    }

    /// Build a local-time timestamp from a point in time.
    #[must_use]
    pub fn from_datetime(dt: OffsetDateTime) -> Self {
        let offset_minutes = dt.offset().whole_minutes();
        let tz = (offset_minutes as u16) & 0x0FFF;
        Self {
            type_and_timezone: (TIMESTAMP_TYPE_LOCAL << 12) | tz,
            year: dt.year() as u16,
            month: u8::from(dt.month()),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            centiseconds: (dt.microsecond() / 10_000) as u8,
            hundreds_of_microseconds: ((dt.microsecond() / 100) % 100) as u8,
            microseconds: (dt.microsecond() % 100) as u8,
        }
    }

    /// Current time in the local offset when obtainable, UTC otherwise.
    #[must_use]
    pub fn now() -> Self {
        let dt = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self::from_datetime(dt)
    }

    /// Whether `self` is strictly later than `other`. Unparseable timestamps
    /// compare as not-later.
    #[must_use]
    pub fn is_later_than(&self, other: &Self) -> bool {
        match (self.to_datetime(), other.to_datetime()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }
}

// ── Dstrings (ECMA-167 1/7.2.12, OSTA CS0) ──────────────────────────────────

/// Validate a fixed-width dstring field.
///
/// The first byte is the compression ID; the last byte the declared length
/// (compression ID included), except for IDs 254/255 where the length is
/// implicit. For 16-bit encodings the NUL scan runs over 16-bit units.
#[must_use]
pub fn validate_dstring(field: &[u8]) -> DstringMask {
    let mut mask = DstringMask::empty();
    if field.len() < 2 {
        return mask;
    }

    let comp_id = field[0];
    let declared = field[field.len() - 1];

    if !matches!(comp_id, 0 | 8 | 16 | 254 | 255) {
        mask.insert(DstringMask::UNKNOWN_COMP_ID);
        return mask;
    }

    let implicit_length = matches!(comp_id, 254 | 255);
    let content = &field[1..field.len() - 1];

    if comp_id == 0 || (!implicit_length && declared == 0) {
        // Empty string: every payload byte must be zero.
        if content.iter().any(|b| *b != 0) || (comp_id == 0 && declared != 0) {
            mask.insert(DstringMask::NOT_EMPTY);
        }
        return mask;
    }

    let wide = matches!(comp_id, 16 | 255);
    let unit = if wide { 2 } else { 1 };

    // Index (in bytes, from field start) of the first NUL character.
    let mut first_nul = 1 + content.len() - content.len() % unit;
    for (i, chunk) in content.chunks_exact(unit).enumerate() {
        if chunk.iter().all(|b| *b == 0) {
            first_nul = 1 + i * unit;
            break;
        }
        if wide {
            let unit_val = u16::from(chunk[0]) << 8 | u16::from(chunk[1]);
            if unit_val == 0xFFFE || unit_val == 0xFEFF {
                mask.insert(DstringMask::INVALID_CHARACTERS);
            }
        }
    }

    // Everything past the first NUL must be zero padding.
    if content[first_nul - 1..].iter().any(|b| *b != 0) {
        mask.insert(DstringMask::NONZERO_PADDING);
    }

    if !implicit_length && usize::from(declared) != first_nul {
        mask.insert(DstringMask::WRONG_LENGTH);
    }

    mask
}

/// Encode an ASCII string as an 8-bit dstring into a fixed-width field.
#[must_use]
pub fn encode_dstring<const N: usize>(text: &str) -> [u8; N] {
    let mut out = [0_u8; N];
    if text.is_empty() {
        return out;
    }
    out[0] = 8;
    let n = text.len().min(N - 2);
    out[1..1 + n].copy_from_slice(&text.as_bytes()[..n]);
    out[N - 1] = (1 + n) as u8;
    out
}

/// Decode an 8-bit or 16-bit dstring to text, for listings and reports.
#[must_use]
pub fn decode_dstring(field: &[u8]) -> String {
    if field.len() < 2 {
        return String::new();
    }
    let comp_id = field[0];
    let content = match comp_id {
        8 | 16 => {
            let declared = usize::from(field[field.len() - 1]);
            let end = declared.clamp(1, field.len() - 1);
            &field[1..end]
        }
        254 | 255 => &field[1..],
        _ => return String::new(),
    };
    match comp_id {
        8 | 254 => content
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| char::from(*b))
            .collect(),
        16 | 255 => char::decode_utf16(
            content
                .chunks_exact(2)
                .map(|c| u16::from(c[0]) << 8 | u16::from(c[1]))
                .take_while(|u| *u != 0),
        )
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect(),
        _ => String::new(),
    }
}

/// Decode the raw bytes of a FID file identifier (no trailing length byte).
#[must_use]
pub fn decode_file_identifier(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    match raw[0] {
        8 => raw[1..].iter().map(|b| char::from(*b)).collect(),
        16 => char::decode_utf16(
            raw[1..]
                .chunks_exact(2)
                .map(|c| u16::from(c[0]) << 8 | u16::from(c[1])),
        )
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect(),
        _ => String::new(),
    }
}
