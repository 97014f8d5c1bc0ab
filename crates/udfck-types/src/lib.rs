#![forbid(unsafe_code)]
//! Core newtypes and on-disk constants for udfck.
//!
//! Unit-carrying wrappers for the two UDF address spaces (medium-absolute
//! logical sector numbers, partition-relative logical block numbers), the
//! fixed tag identifiers of ECMA-167, per-descriptor error masks, and the
//! little-endian read helpers every parsing crate builds on.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Tag identifiers (ECMA-167 3/7.2.1 and 4/7.2.1) ──────────────────────────

pub const TAG_IDENT_PVD: u16 = 1;
pub const TAG_IDENT_AVDP: u16 = 2;
pub const TAG_IDENT_VDP: u16 = 3;
pub const TAG_IDENT_IUVD: u16 = 4;
pub const TAG_IDENT_PD: u16 = 5;
pub const TAG_IDENT_LVD: u16 = 6;
pub const TAG_IDENT_USD: u16 = 7;
pub const TAG_IDENT_TD: u16 = 8;
pub const TAG_IDENT_LVID: u16 = 9;

pub const TAG_IDENT_FSD: u16 = 256;
pub const TAG_IDENT_FID: u16 = 257;
pub const TAG_IDENT_AED: u16 = 258;
pub const TAG_IDENT_IE: u16 = 259;
pub const TAG_IDENT_TE: u16 = 260;
pub const TAG_IDENT_FE: u16 = 261;
pub const TAG_IDENT_EAHD: u16 = 262;
pub const TAG_IDENT_USE: u16 = 263;
pub const TAG_IDENT_SBD: u16 = 264;
pub const TAG_IDENT_PIE: u16 = 265;
pub const TAG_IDENT_EFE: u16 = 266;

/// Size of the descriptor tag that prefixes every descriptor.
pub const TAG_SIZE: usize = 16;

// ── ICB tag constants (ECMA-167 4/14.6) ─────────────────────────────────────

pub const ICB_FILE_TYPE_UNDEF: u8 = 0;
pub const ICB_FILE_TYPE_USE: u8 = 1;
pub const ICB_FILE_TYPE_PIE: u8 = 2;
pub const ICB_FILE_TYPE_IE: u8 = 3;
pub const ICB_FILE_TYPE_DIRECTORY: u8 = 4;
pub const ICB_FILE_TYPE_REGULAR: u8 = 5;
pub const ICB_FILE_TYPE_BLOCK: u8 = 6;
pub const ICB_FILE_TYPE_CHAR: u8 = 7;
pub const ICB_FILE_TYPE_EA: u8 = 8;
pub const ICB_FILE_TYPE_FIFO: u8 = 9;
pub const ICB_FILE_TYPE_SOCKET: u8 = 10;
pub const ICB_FILE_TYPE_TE: u8 = 11;
pub const ICB_FILE_TYPE_SYMLINK: u8 = 12;
pub const ICB_FILE_TYPE_STREAMDIR: u8 = 13;

/// Allocation-descriptor encoding, low three bits of `icbTag.flags`.
pub const ICB_FLAG_AD_MASK: u16 = 0x0007;
pub const ICB_FLAG_AD_SHORT: u16 = 0;
pub const ICB_FLAG_AD_LONG: u16 = 1;
pub const ICB_FLAG_AD_EXTENDED: u16 = 2;
pub const ICB_FLAG_AD_IN_ICB: u16 = 3;

// ── FID file characteristics (ECMA-167 4/14.4.3) ────────────────────────────

pub const FID_CHAR_HIDDEN: u8 = 0x01;
pub const FID_CHAR_DIRECTORY: u8 = 0x02;
pub const FID_CHAR_DELETED: u8 = 0x04;
pub const FID_CHAR_PARENT: u8 = 0x08;
pub const FID_CHAR_METADATA: u8 = 0x10;

// ── LVID integrity types (ECMA-167 3/10.10.3) ───────────────────────────────

pub const LVID_INTEGRITY_OPEN: u32 = 0;
pub const LVID_INTEGRITY_CLOSE: u32 = 1;

// ── Extent types (high two bits of an allocation descriptor length) ─────────

/// Low 30 bits of an allocation-descriptor length field.
pub const EXTENT_LENGTH_MASK: u32 = 0x3FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtentType {
    /// Recorded and allocated.
    Recorded,
    /// Allocated but not recorded.
    AllocatedUnrecorded,
    /// Neither recorded nor allocated.
    Unallocated,
    /// Continuation: the extent holds the next Allocation Extent Descriptor.
    NextExtent,
}

impl ExtentType {
    /// Decode the high two bits of a raw `extLength` word.
    #[must_use]
    pub fn from_raw(ext_length: u32) -> Self {
        match ext_length >> 30 {
            0 => Self::Recorded,
            1 => Self::AllocatedUnrecorded,
            2 => Self::Unallocated,
            _ => Self::NextExtent,
        }
    }

    /// Re-encode into the high two bits.
    #[must_use]
    pub fn to_raw(self) -> u32 {
        let bits: u32 = match self {
            Self::Recorded => 0,
            Self::AllocatedUnrecorded => 1,
            Self::Unallocated => 2,
            Self::NextExtent => 3,
        };
        bits << 30
    }

    /// Whether blocks of this extent occupy partition space.
    #[must_use]
    pub fn occupies_space(self) -> bool {
        matches!(self, Self::Recorded | Self::AllocatedUnrecorded)
    }
}

// ── Address-space newtypes ──────────────────────────────────────────────────

/// Logical Sector Number: medium-absolute, `byte offset = lsn * sector size`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Lsn(pub u32);

/// Logical Block Number: partition-relative, `lsn = partition start + lbn`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Lbn(pub u32);

impl Lsn {
    /// Byte offset of this sector, `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self, sector_size: SectorSize) -> Option<u64> {
        u64::from(self.0).checked_mul(u64::from(sector_size.get()))
    }

    #[must_use]
    pub fn checked_add(self, sectors: u32) -> Option<Self> {
        self.0.checked_add(sectors).map(Self)
    }
}

impl Lbn {
    /// Resolve against a partition base.
    #[must_use]
    pub fn to_lsn(self, partition_start: Lsn) -> Option<Lsn> {
        partition_start.0.checked_add(self.0).map(Lsn)
    }

    #[must_use]
    pub fn checked_add(self, blocks: u32) -> Option<Self> {
        self.0.checked_add(blocks).map(Self)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated sector size: a power of two in `[512, 32768]`.
///
/// UDF requires the logical block size of the volume to equal the sector
/// size of the medium, so one validated value serves both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorSize(u32);

impl SectorSize {
    /// Candidate sizes probed during detection, in probe order.
    pub const PROBE_ORDER: [u32; 5] = [512, 1024, 2048, 4096, 8192];

    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(512..=32768).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "sector_size",
                reason: "must be a power of two in 512..=32768",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of whole blocks needed to hold `bytes`.
    #[must_use]
    pub fn blocks_for(self, bytes: u64) -> u64 {
        bytes.div_ceil(u64::from(self.0))
    }
}

impl fmt::Display for SectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Per-descriptor error masks ──────────────────────────────────────────────

/// Accumulated structural findings for one descriptor slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct ErrorMask(pub u16);

impl ErrorMask {
    pub const CHECKSUM: Self = Self(1 << 0);
    pub const CRC: Self = Self(1 << 1);
    pub const POSITION: Self = Self(1 << 2);
    pub const WRONG_DESC: Self = Self(1 << 3);
    pub const EXT_LEN: Self = Self(1 << 4);
    pub const UUID: Self = Self(1 << 5);
    pub const TIMESTAMP: Self = Self(1 << 6);
    pub const FREE_SPACE: Self = Self(1 << 7);
    pub const DSTRING: Self = Self(1 << 8);

    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether the slot is unusable as a copy source: any of checksum, CRC,
    /// or wrong-descriptor findings.
    #[must_use]
    pub fn is_structurally_broken(self) -> bool {
        self.contains(Self::CHECKSUM) || self.contains(Self::CRC) || self.contains(Self::WRONG_DESC)
    }
}

impl std::ops::BitOr for ErrorMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ErrorMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ErrorMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "ok");
        }
        let names = [
            (Self::CHECKSUM, "checksum"),
            (Self::CRC, "crc"),
            (Self::POSITION, "position"),
            (Self::WRONG_DESC, "wrong-desc"),
            (Self::EXT_LEN, "ext-len"),
            (Self::UUID, "uuid"),
            (Self::TIMESTAMP, "timestamp"),
            (Self::FREE_SPACE, "free-space"),
            (Self::DSTRING, "dstring"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        Ok(())
    }
}

// ── Dstring findings ────────────────────────────────────────────────────────

/// Findings from validating one dstring field, OR-combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DstringMask(pub u8);

impl DstringMask {
    pub const UNKNOWN_COMP_ID: Self = Self(1 << 0);
    pub const NOT_EMPTY: Self = Self(1 << 1);
    pub const NONZERO_PADDING: Self = Self(1 << 2);
    pub const WRONG_LENGTH: Self = Self(1 << 3);
    pub const INVALID_CHARACTERS: Self = Self(1 << 4);

    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Little-endian read helpers ──────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

/// Narrow a `u32` to `u16` with an explicit error path.
pub fn u32_to_u16(value: u32, field: &'static str) -> Result<u16, ParseError> {
    u16::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

// ── Descriptor-kind display names ───────────────────────────────────────────

/// Short name for a tag identifier, for log and report lines.
#[must_use]
pub fn descriptor_name(ident: u16) -> &'static str {
    match ident {
        TAG_IDENT_PVD => "PVD",
        TAG_IDENT_AVDP => "AVDP",
        TAG_IDENT_VDP => "VDP",
        TAG_IDENT_IUVD => "IUVD",
        TAG_IDENT_PD => "PD",
        TAG_IDENT_LVD => "LVD",
        TAG_IDENT_USD => "USD",
        TAG_IDENT_TD => "TD",
        TAG_IDENT_LVID => "LVID",
        TAG_IDENT_FSD => "FSD",
        TAG_IDENT_FID => "FID",
        TAG_IDENT_AED => "AED",
        TAG_IDENT_IE => "IE",
        TAG_IDENT_TE => "TE",
        TAG_IDENT_FE => "FE",
        TAG_IDENT_EAHD => "EAHD",
        TAG_IDENT_USE => "USE",
        TAG_IDENT_SBD => "SBD",
        TAG_IDENT_PIE => "PIE",
        TAG_IDENT_EFE => "EFE",
        _ => "unknown",
    }
}
