//! Allocation descriptors and extent addressing (ECMA-167 4/14.14, 3/7.1).

use serde::{Deserialize, Serialize};
use udfck_types::{
    ensure_slice, read_fixed, read_le_u16, read_le_u32, ExtentType, Lbn, ParseError,
    EXTENT_LENGTH_MASK,
};

pub const EXTENT_AD_SIZE: usize = 8;
pub const LB_ADDR_SIZE: usize = 6;
pub const SHORT_AD_SIZE: usize = 8;
pub const LONG_AD_SIZE: usize = 16;
pub const EXT_AD_SIZE: usize = 20;

// ── extent_ad: length in bytes + absolute sector ────────────────────────────

/// Medium-absolute extent (ECMA-167 3/7.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtentAd {
    pub length: u32,
    pub location: u32,
}

impl ExtentAd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, EXTENT_AD_SIZE)?;
        Ok(Self {
            length: read_le_u32(bytes, 0)?,
            location: read_le_u32(bytes, 4)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.location.to_le_bytes());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

// ── lb_addr: partition-relative block address ───────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LbAddr {
    pub logical_block_num: u32,
    pub partition_ref: u16,
}

impl LbAddr {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, LB_ADDR_SIZE)?;
        Ok(Self {
            logical_block_num: read_le_u32(bytes, 0)?,
            partition_ref: read_le_u16(bytes, 4)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.logical_block_num.to_le_bytes());
        buf[4..6].copy_from_slice(&self.partition_ref.to_le_bytes());
    }

    #[must_use]
    pub fn lbn(&self) -> Lbn {
        Lbn(self.logical_block_num)
    }
}

// ── short_ad ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShortAd {
    pub ext_length: u32,
    pub ext_position: u32,
}

impl ShortAd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, SHORT_AD_SIZE)?;
        Ok(Self {
            ext_length: read_le_u32(bytes, 0)?,
            ext_position: read_le_u32(bytes, 4)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.ext_length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ext_position.to_le_bytes());
    }

    #[must_use]
    pub fn length_bytes(&self) -> u32 {
        self.ext_length & EXTENT_LENGTH_MASK
    }

    #[must_use]
    pub fn extent_type(&self) -> ExtentType {
        ExtentType::from_raw(self.ext_length)
    }
}

// ── long_ad ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LongAd {
    pub ext_length: u32,
    pub ext_location: LbAddr,
    pub imp_use: [u8; 6],
}

impl LongAd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, LONG_AD_SIZE)?;
        Ok(Self {
            ext_length: read_le_u32(bytes, 0)?,
            ext_location: LbAddr::parse(&bytes[4..10])?,
            imp_use: read_fixed::<6>(bytes, 10)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.ext_length.to_le_bytes());
        self.ext_location.serialize_into(&mut buf[4..10]);
        buf[10..16].copy_from_slice(&self.imp_use);
    }

    #[must_use]
    pub fn length_bytes(&self) -> u32 {
        self.ext_length & EXTENT_LENGTH_MASK
    }

    #[must_use]
    pub fn extent_type(&self) -> ExtentType {
        ExtentType::from_raw(self.ext_length)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length_bytes() == 0
    }

    /// UDF unique ID carried in `impUse[2..6]` of a FID's ICB field.
    #[must_use]
    pub fn udf_unique_id(&self) -> u32 {
        u32::from_le_bytes([
            self.imp_use[2],
            self.imp_use[3],
            self.imp_use[4],
            self.imp_use[5],
        ])
    }

    pub fn set_udf_unique_id(&mut self, uuid: u32) {
        self.imp_use[2..6].copy_from_slice(&uuid.to_le_bytes());
    }
}

// ── ext_ad (ECMA-167 4/14.14.3) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtAd {
    pub ext_length: u32,
    pub recorded_length: u32,
    pub information_length: u32,
    pub ext_location: LbAddr,
    pub imp_use: [u8; 2],
}

impl ExtAd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, EXT_AD_SIZE)?;
        Ok(Self {
            ext_length: read_le_u32(bytes, 0)?,
            recorded_length: read_le_u32(bytes, 4)?,
            information_length: read_le_u32(bytes, 8)?,
            ext_location: LbAddr::parse(&bytes[12..18])?,
            imp_use: read_fixed::<2>(bytes, 18)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.ext_length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.recorded_length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.information_length.to_le_bytes());
        self.ext_location.serialize_into(&mut buf[12..18]);
        buf[18..20].copy_from_slice(&self.imp_use);
    }

    #[must_use]
    pub fn length_bytes(&self) -> u32 {
        self.ext_length & EXTENT_LENGTH_MASK
    }

    #[must_use]
    pub fn extent_type(&self) -> ExtentType {
        ExtentType::from_raw(self.ext_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ad_length_and_type() {
        let ad = ShortAd {
            ext_length: ExtentType::AllocatedUnrecorded.to_raw() | 4096,
            ext_position: 17,
        };
        assert_eq!(ad.length_bytes(), 4096);
        assert_eq!(ad.extent_type(), ExtentType::AllocatedUnrecorded);

        let mut buf = [0_u8; SHORT_AD_SIZE];
        ad.serialize_into(&mut buf);
        assert_eq!(ShortAd::parse(&buf).expect("parse"), ad);
    }

    #[test]
    fn long_ad_uuid_field() {
        let mut ad = LongAd {
            ext_length: 2048,
            ext_location: LbAddr {
                logical_block_num: 5,
                partition_ref: 0,
            },
            imp_use: [0; 6],
        };
        ad.set_udf_unique_id(0xDEAD_BEEF);
        assert_eq!(ad.udf_unique_id(), 0xDEAD_BEEF);
        // Flag bytes stay untouched.
        assert_eq!(ad.imp_use[0], 0);
        assert_eq!(ad.imp_use[1], 0);

        let mut buf = [0_u8; LONG_AD_SIZE];
        ad.serialize_into(&mut buf);
        assert_eq!(LongAd::parse(&buf).expect("parse"), ad);
    }

    #[test]
    fn ext_ad_round_trip() {
        let ad = ExtAd {
            ext_length: ExtentType::Recorded.to_raw() | 8192,
            recorded_length: 8192,
            information_length: 8000,
            ext_location: LbAddr {
                logical_block_num: 99,
                partition_ref: 0,
            },
            imp_use: [0; 2],
        };
        let mut buf = [0_u8; EXT_AD_SIZE];
        ad.serialize_into(&mut buf);
        assert_eq!(ExtAd::parse(&buf).expect("parse"), ad);
        assert_eq!(ad.length_bytes(), 8192);
    }

    #[test]
    fn zero_length_extent_terminates() {
        let ad = ShortAd {
            ext_length: ExtentType::Recorded.to_raw(),
            ext_position: 0,
        };
        assert_eq!(ad.length_bytes(), 0);
    }
}
