//! Volume-level descriptors: VRS structures, AVDP, the VDS member
//! descriptors, and the Logical Volume Integrity Descriptor.

use crate::ad::{ExtentAd, LongAd, ShortAd, EXTENT_AD_SIZE, SHORT_AD_SIZE};
use crate::tag::{finalize_descriptor, RegId, Tag, Timestamp, REGID_SIZE, TIMESTAMP_SIZE};
use udfck_types::{
    ensure_slice, read_fixed, read_le_u16, read_le_u32, read_le_u64, u64_to_usize, ParseError,
    TAG_SIZE,
};

pub const VSD_SIZE: usize = 2048;
/// The Volume Recognition Sequence begins 16 × 2048 bytes into the medium.
pub const VSD_START_OFFSET: u64 = 16 * 2048;

pub const AVDP_SIZE: usize = 512;
pub const PVD_SIZE: usize = 512;
pub const PD_SIZE: usize = 512;
pub const IUVD_SIZE: usize = 512;
pub const TD_SIZE: usize = 512;
pub const LVD_FIXED_SIZE: usize = 440;
pub const USD_FIXED_SIZE: usize = 24;
pub const LVID_FIXED_SIZE: usize = 80;
pub const LVID_IMP_USE_FIXED_SIZE: usize = 46;

// ── Volume Recognition Sequence (ECMA-167 2/9, 3/9.1) ───────────────────────

/// One Volume Structure Descriptor from the recognition area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolStructDesc {
    pub structure_type: u8,
    pub std_ident: [u8; 5],
    pub structure_version: u8,
}

impl VolStructDesc {
    pub const BEA01: &'static [u8; 5] = b"BEA01";
    pub const NSR02: &'static [u8; 5] = b"NSR02";
    pub const NSR03: &'static [u8; 5] = b"NSR03";
    pub const TEA01: &'static [u8; 5] = b"TEA01";
    pub const BOOT2: &'static [u8; 5] = b"BOOT2";
    pub const CDW02: &'static [u8; 5] = b"CDW02";
    pub const CD001: &'static [u8; 5] = b"CD001";

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, 7)?;
        Ok(Self {
            structure_type: bytes[0],
            std_ident: read_fixed::<5>(bytes, 1)?,
            structure_version: bytes[6],
        })
    }

    /// Serialize a recognition sector (identifier only, rest zero).
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; VSD_SIZE];
        buf[0] = self.structure_type;
        buf[1..6].copy_from_slice(&self.std_ident);
        buf[6] = self.structure_version;
        buf
    }
}

// ── AVDP (ECMA-167 3/10.2) ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Avdp {
    pub tag: Tag,
    pub main_vds_ext: ExtentAd,
    pub reserve_vds_ext: ExtentAd,
}

impl Avdp {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, AVDP_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
            main_vds_ext: ExtentAd::parse(&bytes[16..24])?,
            reserve_vds_ext: ExtentAd::parse(&bytes[24..32])?,
        })
    }

    /// Serialize with a freshly computed CRC and checksum.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; AVDP_SIZE];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        self.main_vds_ext.serialize_into(&mut buf[16..24]);
        self.reserve_vds_ext.serialize_into(&mut buf[24..32]);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── PVD (ECMA-167 3/10.1) ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pvd {
    pub tag: Tag,
    pub vds_number: u32,
    pub primary_vd_number: u32,
    pub vol_ident: [u8; 32],
    pub vol_seq_number: u16,
    pub max_vol_seq_number: u16,
    pub interchange_level: u16,
    pub max_interchange_level: u16,
    pub charset_list: u32,
    pub max_charset_list: u32,
    pub vol_set_ident: Vec<u8>,
    pub desc_charset: Vec<u8>,
    pub explanatory_charset: Vec<u8>,
    pub vol_abstract: ExtentAd,
    pub vol_copyright: ExtentAd,
    pub app_ident: RegId,
    pub recording_time: Timestamp,
    pub impl_ident: RegId,
    pub impl_use: Vec<u8>,
    pub predecessor_vds_location: u32,
    pub flags: u16,
}

impl Pvd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, PVD_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
            vds_number: read_le_u32(bytes, 16)?,
            primary_vd_number: read_le_u32(bytes, 20)?,
            vol_ident: read_fixed::<32>(bytes, 24)?,
            vol_seq_number: read_le_u16(bytes, 56)?,
            max_vol_seq_number: read_le_u16(bytes, 58)?,
            interchange_level: read_le_u16(bytes, 60)?,
            max_interchange_level: read_le_u16(bytes, 62)?,
            charset_list: read_le_u32(bytes, 64)?,
            max_charset_list: read_le_u32(bytes, 68)?,
            vol_set_ident: bytes[72..200].to_vec(),
            desc_charset: bytes[200..264].to_vec(),
            explanatory_charset: bytes[264..328].to_vec(),
            vol_abstract: ExtentAd::parse(&bytes[328..336])?,
            vol_copyright: ExtentAd::parse(&bytes[336..344])?,
            app_ident: RegId::parse(&bytes[344..376])?,
            recording_time: Timestamp::parse(&bytes[376..388])?,
            impl_ident: RegId::parse(&bytes[388..420])?,
            impl_use: bytes[420..484].to_vec(),
            predecessor_vds_location: read_le_u32(bytes, 484)?,
            flags: read_le_u16(bytes, 488)?,
        })
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; PVD_SIZE];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.vds_number.to_le_bytes());
        buf[20..24].copy_from_slice(&self.primary_vd_number.to_le_bytes());
        buf[24..56].copy_from_slice(&self.vol_ident);
        buf[56..58].copy_from_slice(&self.vol_seq_number.to_le_bytes());
        buf[58..60].copy_from_slice(&self.max_vol_seq_number.to_le_bytes());
        buf[60..62].copy_from_slice(&self.interchange_level.to_le_bytes());
        buf[62..64].copy_from_slice(&self.max_interchange_level.to_le_bytes());
        buf[64..68].copy_from_slice(&self.charset_list.to_le_bytes());
        buf[68..72].copy_from_slice(&self.max_charset_list.to_le_bytes());
        buf[72..200].copy_from_slice(&self.vol_set_ident);
        buf[200..264].copy_from_slice(&self.desc_charset);
        buf[264..328].copy_from_slice(&self.explanatory_charset);
        self.vol_abstract.serialize_into(&mut buf[328..336]);
        self.vol_copyright.serialize_into(&mut buf[336..344]);
        self.app_ident.serialize_into(&mut buf[344..376]);
        self.recording_time.serialize_into(&mut buf[376..388]);
        self.impl_ident.serialize_into(&mut buf[388..420]);
        buf[420..484].copy_from_slice(&self.impl_use);
        buf[484..488].copy_from_slice(&self.predecessor_vds_location.to_le_bytes());
        buf[488..490].copy_from_slice(&self.flags.to_le_bytes());
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── LVD (ECMA-167 3/10.6) ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lvd {
    pub tag: Tag,
    pub vds_number: u32,
    pub desc_charset: Vec<u8>,
    pub logical_vol_ident: Vec<u8>,
    pub logical_block_size: u32,
    pub domain_ident: RegId,
    /// Interpreted as a `long_ad` addressing the File Set Descriptor.
    pub logical_vol_contents_use: [u8; 16],
    pub map_table_length: u32,
    pub num_partition_maps: u32,
    pub impl_ident: RegId,
    pub impl_use: Vec<u8>,
    pub integrity_seq_ext: ExtentAd,
    pub partition_maps: Vec<u8>,
}

impl Lvd {
    /// Parse, including the variable-length map table: `bytes` must extend
    /// at least `LVD_FIXED_SIZE + mapTableLength`.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, LVD_FIXED_SIZE)?;
        let map_table_length = read_le_u32(bytes, 264)?;
        let map_len = u64_to_usize(u64::from(map_table_length), "map_table_length")?;
        let maps = ensure_slice(bytes, LVD_FIXED_SIZE, map_len)?.to_vec();
        Ok(Self {
            tag: Tag::parse(bytes)?,
            vds_number: read_le_u32(bytes, 16)?,
            desc_charset: bytes[20..84].to_vec(),
            logical_vol_ident: bytes[84..212].to_vec(),
            logical_block_size: read_le_u32(bytes, 212)?,
            domain_ident: RegId::parse(&bytes[216..248])?,
            logical_vol_contents_use: read_fixed::<16>(bytes, 248)?,
            map_table_length,
            num_partition_maps: read_le_u32(bytes, 268)?,
            impl_ident: RegId::parse(&bytes[272..304])?,
            impl_use: bytes[304..432].to_vec(),
            integrity_seq_ext: ExtentAd::parse(&bytes[432..440])?,
            partition_maps: maps,
        })
    }

    /// The File Set Descriptor address carried in `logicalVolContentsUse`.
    pub fn fsd_location(&self) -> Result<LongAd, ParseError> {
        LongAd::parse(&self.logical_vol_contents_use)
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        LVD_FIXED_SIZE + self.partition_maps.len()
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.total_size()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.vds_number.to_le_bytes());
        buf[20..84].copy_from_slice(&self.desc_charset);
        buf[84..212].copy_from_slice(&self.logical_vol_ident);
        buf[212..216].copy_from_slice(&self.logical_block_size.to_le_bytes());
        self.domain_ident.serialize_into(&mut buf[216..248]);
        buf[248..264].copy_from_slice(&self.logical_vol_contents_use);
        buf[264..268].copy_from_slice(&self.map_table_length.to_le_bytes());
        buf[268..272].copy_from_slice(&self.num_partition_maps.to_le_bytes());
        self.impl_ident.serialize_into(&mut buf[272..304]);
        buf[304..432].copy_from_slice(&self.impl_use);
        self.integrity_seq_ext.serialize_into(&mut buf[432..440]);
        buf[LVD_FIXED_SIZE..].copy_from_slice(&self.partition_maps);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── PD (ECMA-167 3/10.5) and the partition header (4/14.3) ──────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pd {
    pub tag: Tag,
    pub vds_number: u32,
    pub partition_flags: u16,
    pub partition_number: u16,
    pub partition_contents: RegId,
    pub partition_contents_use: Vec<u8>,
    pub access_type: u32,
    pub partition_starting_location: u32,
    pub partition_length: u32,
    pub impl_ident: RegId,
    pub impl_use: Vec<u8>,
}

impl Pd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, PD_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
            vds_number: read_le_u32(bytes, 16)?,
            partition_flags: read_le_u16(bytes, 20)?,
            partition_number: read_le_u16(bytes, 22)?,
            partition_contents: RegId::parse(&bytes[24..56])?,
            partition_contents_use: bytes[56..184].to_vec(),
            access_type: read_le_u32(bytes, 184)?,
            partition_starting_location: read_le_u32(bytes, 188)?,
            partition_length: read_le_u32(bytes, 192)?,
            impl_ident: RegId::parse(&bytes[196..228])?,
            impl_use: bytes[228..356].to_vec(),
        })
    }

    /// Partition header (space-management descriptors) from
    /// `partitionContentsUse`.
    pub fn partition_header(&self) -> Result<PartitionHeaderDesc, ParseError> {
        PartitionHeaderDesc::parse(&self.partition_contents_use)
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; PD_SIZE];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.vds_number.to_le_bytes());
        buf[20..22].copy_from_slice(&self.partition_flags.to_le_bytes());
        buf[22..24].copy_from_slice(&self.partition_number.to_le_bytes());
        self.partition_contents.serialize_into(&mut buf[24..56]);
        buf[56..184].copy_from_slice(&self.partition_contents_use);
        buf[184..188].copy_from_slice(&self.access_type.to_le_bytes());
        buf[188..192].copy_from_slice(&self.partition_starting_location.to_le_bytes());
        buf[192..196].copy_from_slice(&self.partition_length.to_le_bytes());
        self.impl_ident.serialize_into(&mut buf[196..228]);
        buf[228..356].copy_from_slice(&self.impl_use);
        finalize_descriptor(&mut buf);
        buf
    }
}

/// Space-management pointers at the head of `PD.partitionContentsUse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionHeaderDesc {
    pub unalloc_space_table: ShortAd,
    pub unalloc_space_bitmap: ShortAd,
    pub partition_integrity_table: ShortAd,
    pub freed_space_table: ShortAd,
    pub freed_space_bitmap: ShortAd,
}

impl PartitionHeaderDesc {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, 5 * SHORT_AD_SIZE)?;
        Ok(Self {
            unalloc_space_table: ShortAd::parse(&bytes[0..8])?,
            unalloc_space_bitmap: ShortAd::parse(&bytes[8..16])?,
            partition_integrity_table: ShortAd::parse(&bytes[16..24])?,
            freed_space_table: ShortAd::parse(&bytes[24..32])?,
            freed_space_bitmap: ShortAd::parse(&bytes[32..40])?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        self.unalloc_space_table.serialize_into(&mut buf[0..8]);
        self.unalloc_space_bitmap.serialize_into(&mut buf[8..16]);
        self.partition_integrity_table
            .serialize_into(&mut buf[16..24]);
        self.freed_space_table.serialize_into(&mut buf[24..32]);
        self.freed_space_bitmap.serialize_into(&mut buf[32..40]);
    }
}

// ── IUVD (ECMA-167 3/10.4) ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iuvd {
    pub tag: Tag,
    pub vds_number: u32,
    pub impl_ident: RegId,
    pub impl_use: Vec<u8>,
}

impl Iuvd {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, IUVD_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
            vds_number: read_le_u32(bytes, 16)?,
            impl_ident: RegId::parse(&bytes[20..52])?,
            impl_use: bytes[52..512].to_vec(),
        })
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; IUVD_SIZE];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.vds_number.to_le_bytes());
        self.impl_ident.serialize_into(&mut buf[20..52]);
        buf[52..512].copy_from_slice(&self.impl_use);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── USD (ECMA-167 3/10.8) ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usd {
    pub tag: Tag,
    pub vds_number: u32,
    pub alloc_descs: Vec<ExtentAd>,
}

impl Usd {
    /// Parse, including the variable-length allocation descriptor tail.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, USD_FIXED_SIZE)?;
        let num = read_le_u32(bytes, 20)?;
        let count = u64_to_usize(u64::from(num), "num_alloc_descs")?;
        let mut alloc_descs = Vec::with_capacity(count);
        for i in 0..count {
            let off = USD_FIXED_SIZE + i * EXTENT_AD_SIZE;
            alloc_descs.push(ExtentAd::parse(ensure_slice(bytes, off, EXTENT_AD_SIZE)?)?);
        }
        Ok(Self {
            tag: Tag::parse(bytes)?,
            vds_number: read_le_u32(bytes, 16)?,
            alloc_descs,
        })
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        USD_FIXED_SIZE + self.alloc_descs.len() * EXTENT_AD_SIZE
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.total_size()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.vds_number.to_le_bytes());
        buf[20..24].copy_from_slice(&(self.alloc_descs.len() as u32).to_le_bytes());
        for (i, ad) in self.alloc_descs.iter().enumerate() {
            let off = USD_FIXED_SIZE + i * EXTENT_AD_SIZE;
            ad.serialize_into(&mut buf[off..off + EXTENT_AD_SIZE]);
        }
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── TD (ECMA-167 3/10.9) ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Td {
    pub tag: Tag,
}

impl Td {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, TAG_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
        })
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; TD_SIZE];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── LVID (ECMA-167 3/10.10) with the UDF implementation-use tail ────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lvid {
    pub tag: Tag,
    pub recording_time: Timestamp,
    pub integrity_type: u32,
    pub next_integrity_ext: ExtentAd,
    /// First 8 bytes of `logicalVolContentsUse`: next unique ID.
    pub next_unique_id: u64,
    pub contents_use_rest: [u8; 24],
    pub num_partitions: u32,
    pub free_space_table: Vec<u32>,
    pub size_table: Vec<u32>,
    pub imp_use: LvidImpUse,
}

/// UDF 2.2.6.4 implementation use for the LVID.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LvidImpUse {
    pub impl_id: RegId,
    pub num_files: u32,
    pub num_dirs: u32,
    pub min_udf_read_rev: u16,
    pub min_udf_write_rev: u16,
    pub max_udf_write_rev: u16,
    pub extra: Vec<u8>,
}

impl LvidImpUse {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, LVID_IMP_USE_FIXED_SIZE)?;
        Ok(Self {
            impl_id: RegId::parse(&bytes[0..32])?,
            num_files: read_le_u32(bytes, 32)?,
            num_dirs: read_le_u32(bytes, 36)?,
            min_udf_read_rev: read_le_u16(bytes, 40)?,
            min_udf_write_rev: read_le_u16(bytes, 42)?,
            max_udf_write_rev: read_le_u16(bytes, 44)?,
            extra: bytes[LVID_IMP_USE_FIXED_SIZE..].to_vec(),
        })
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        LVID_IMP_USE_FIXED_SIZE + self.extra.len()
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        self.impl_id.serialize_into(&mut buf[0..REGID_SIZE]);
        buf[32..36].copy_from_slice(&self.num_files.to_le_bytes());
        buf[36..40].copy_from_slice(&self.num_dirs.to_le_bytes());
        buf[40..42].copy_from_slice(&self.min_udf_read_rev.to_le_bytes());
        buf[42..44].copy_from_slice(&self.min_udf_write_rev.to_le_bytes());
        buf[44..46].copy_from_slice(&self.max_udf_write_rev.to_le_bytes());
        buf[LVID_IMP_USE_FIXED_SIZE..self.total_size()].copy_from_slice(&self.extra);
    }
}

impl Lvid {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, LVID_FIXED_SIZE)?;
        let num_partitions = read_le_u32(bytes, 72)?;
        let np = u64_to_usize(u64::from(num_partitions), "num_partitions")?;
        let imp_len_field = read_le_u32(bytes, 76)?;
        let imp_len = u64_to_usize(u64::from(imp_len_field), "length_of_imp_use")?;

        let tables_end = LVID_FIXED_SIZE + 8 * np;
        let mut free_space_table = Vec::with_capacity(np);
        let mut size_table = Vec::with_capacity(np);
        for i in 0..np {
            free_space_table.push(read_le_u32(bytes, LVID_FIXED_SIZE + 4 * i)?);
            size_table.push(read_le_u32(bytes, LVID_FIXED_SIZE + 4 * np + 4 * i)?);
        }
        let imp_use = LvidImpUse::parse(ensure_slice(bytes, tables_end, imp_len)?)?;

        Ok(Self {
            tag: Tag::parse(bytes)?,
            recording_time: Timestamp::parse(&bytes[16..28])?,
            integrity_type: read_le_u32(bytes, 28)?,
            next_integrity_ext: ExtentAd::parse(&bytes[32..40])?,
            next_unique_id: read_le_u64(bytes, 40)?,
            contents_use_rest: read_fixed::<24>(bytes, 48)?,
            num_partitions,
            free_space_table,
            size_table,
            imp_use,
        })
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        LVID_FIXED_SIZE + 8 * self.free_space_table.len() + self.imp_use.total_size()
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let np = self.free_space_table.len();
        let mut buf = vec![0_u8; self.total_size()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        self.recording_time.serialize_into(&mut buf[16..16 + TIMESTAMP_SIZE]);
        buf[28..32].copy_from_slice(&self.integrity_type.to_le_bytes());
        self.next_integrity_ext.serialize_into(&mut buf[32..40]);
        buf[40..48].copy_from_slice(&self.next_unique_id.to_le_bytes());
        buf[48..72].copy_from_slice(&self.contents_use_rest);
        buf[72..76].copy_from_slice(&(np as u32).to_le_bytes());
        buf[76..80].copy_from_slice(&(self.imp_use.total_size() as u32).to_le_bytes());
        for (i, v) in self.free_space_table.iter().enumerate() {
            let off = LVID_FIXED_SIZE + 4 * i;
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
        }
        for (i, v) in self.size_table.iter().enumerate() {
            let off = LVID_FIXED_SIZE + 4 * np + 4 * i;
            buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
        }
        let imp_off = LVID_FIXED_SIZE + 8 * np;
        self.imp_use
            .serialize_into(&mut buf[imp_off..imp_off + self.imp_use.total_size()]);
        finalize_descriptor(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::verify_descriptor;
    use udfck_types::{Lsn, TAG_IDENT_AVDP, TAG_IDENT_LVID, TAG_IDENT_PD, TAG_IDENT_PVD};

    fn tag(ident: u16, location: u32) -> Tag {
        Tag {
            ident,
            version: 2,
            checksum: 0,
            serial: 1,
            crc: 0,
            crc_length: 0,
            location,
        }
    }

    #[test]
    fn avdp_serialize_parse_round_trip() {
        let avdp = Avdp {
            tag: tag(TAG_IDENT_AVDP, 256),
            main_vds_ext: ExtentAd {
                length: 16 * 2048,
                location: 32,
            },
            reserve_vds_ext: ExtentAd {
                length: 16 * 2048,
                location: 48,
            },
        };
        let bytes = avdp.serialize();
        assert_eq!(bytes.len(), AVDP_SIZE);
        let outcome = verify_descriptor(&bytes, TAG_IDENT_AVDP, Lsn(256));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = Avdp::parse(&bytes).expect("parse");
        assert_eq!(parsed.main_vds_ext, avdp.main_vds_ext);
        assert_eq!(parsed.reserve_vds_ext, avdp.reserve_vds_ext);
    }

    #[test]
    fn pvd_round_trip_validates() {
        let pvd = Pvd {
            tag: tag(TAG_IDENT_PVD, 32),
            vds_number: 0,
            primary_vd_number: 0,
            vol_ident: crate::tag::encode_dstring::<32>("udfck-vol"),
            vol_seq_number: 1,
            max_vol_seq_number: 1,
            interchange_level: 2,
            max_interchange_level: 3,
            charset_list: 1,
            max_charset_list: 1,
            vol_set_ident: vec![0; 128],
            desc_charset: vec![0; 64],
            explanatory_charset: vec![0; 64],
            vol_abstract: ExtentAd::default(),
            vol_copyright: ExtentAd::default(),
            app_ident: RegId::from_ident(b"*udfck"),
            recording_time: Timestamp::default(),
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 64],
            predecessor_vds_location: 0,
            flags: 0,
        };
        let bytes = pvd.serialize();
        let outcome = verify_descriptor(&bytes, TAG_IDENT_PVD, Lsn(32));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);
        let parsed = Pvd::parse(&bytes).expect("parse");
        assert_eq!(parsed.vol_ident, pvd.vol_ident);
        assert_eq!(parsed.interchange_level, 2);
    }

    #[test]
    fn lvd_carries_map_table() {
        let mut maps = vec![0_u8; 6];
        maps[0] = 1; // type 1 map
        maps[1] = 6;
        maps[2..4].copy_from_slice(&1_u16.to_le_bytes());
        maps[4..6].copy_from_slice(&0_u16.to_le_bytes());

        let lvd = Lvd {
            tag: tag(udfck_types::TAG_IDENT_LVD, 33),
            vds_number: 1,
            desc_charset: vec![0; 64],
            logical_vol_ident: vec![0; 128],
            logical_block_size: 2048,
            domain_ident: RegId::from_ident(b"*OSTA UDF Compliant"),
            logical_vol_contents_use: [0; 16],
            map_table_length: 6,
            num_partition_maps: 1,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
            integrity_seq_ext: ExtentAd {
                length: 2048,
                location: 64,
            },
            partition_maps: maps.clone(),
        };
        let bytes = lvd.serialize();
        assert_eq!(bytes.len(), LVD_FIXED_SIZE + 6);
        let parsed = Lvd::parse(&bytes).expect("parse");
        assert_eq!(parsed.partition_maps, maps);
        assert_eq!(parsed.logical_block_size, 2048);
        assert_eq!(parsed.integrity_seq_ext.location, 64);
    }

    #[test]
    fn pd_partition_header_decodes_space_bitmap() {
        let mut contents_use = vec![0_u8; 128];
        let sbd_ad = ShortAd {
            ext_length: 2048,
            ext_position: 4,
        };
        sbd_ad.serialize_into(&mut contents_use[8..16]);

        let pd = Pd {
            tag: tag(TAG_IDENT_PD, 34),
            vds_number: 2,
            partition_flags: 1,
            partition_number: 0,
            partition_contents: RegId::from_ident(b"+NSR02"),
            partition_contents_use: contents_use,
            access_type: 1,
            partition_starting_location: 257,
            partition_length: 1024,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
        };
        let bytes = pd.serialize();
        let parsed = Pd::parse(&bytes).expect("parse");
        let header = parsed.partition_header().expect("header");
        assert_eq!(header.unalloc_space_bitmap.ext_position, 4);
        assert_eq!(header.unalloc_space_bitmap.length_bytes(), 2048);
        assert!(header.unalloc_space_table.length_bytes() == 0);
    }

    #[test]
    fn usd_alloc_desc_tail() {
        let usd = Usd {
            tag: tag(udfck_types::TAG_IDENT_USD, 35),
            vds_number: 3,
            alloc_descs: vec![
                ExtentAd {
                    length: 4096,
                    location: 100,
                },
                ExtentAd {
                    length: 2048,
                    location: 200,
                },
            ],
        };
        let bytes = usd.serialize();
        assert_eq!(bytes.len(), USD_FIXED_SIZE + 2 * EXTENT_AD_SIZE);
        let parsed = Usd::parse(&bytes).expect("parse");
        assert_eq!(parsed.alloc_descs.len(), 2);
        assert_eq!(parsed.alloc_descs[1].location, 200);
    }

    #[test]
    fn lvid_tables_and_imp_use_round_trip() {
        let lvid = Lvid {
            tag: tag(TAG_IDENT_LVID, 64),
            recording_time: Timestamp {
                year: 2021,
                month: 7,
                day: 4,
                ..Timestamp::default()
            },
            integrity_type: udfck_types::LVID_INTEGRITY_CLOSE,
            next_integrity_ext: ExtentAd::default(),
            next_unique_id: 42,
            contents_use_rest: [0; 24],
            num_partitions: 1,
            free_space_table: vec![900],
            size_table: vec![1024],
            imp_use: LvidImpUse {
                impl_id: RegId::from_ident(b"*udfck"),
                num_files: 3,
                num_dirs: 2,
                min_udf_read_rev: 0x0102,
                min_udf_write_rev: 0x0102,
                max_udf_write_rev: 0x0201,
                extra: Vec::new(),
            },
        };
        let bytes = lvid.serialize();
        assert_eq!(bytes.len(), LVID_FIXED_SIZE + 8 + LVID_IMP_USE_FIXED_SIZE);
        let outcome = verify_descriptor(&bytes, TAG_IDENT_LVID, Lsn(64));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = Lvid::parse(&bytes).expect("parse");
        assert_eq!(parsed.next_unique_id, 42);
        assert_eq!(parsed.free_space_table, vec![900]);
        assert_eq!(parsed.size_table, vec![1024]);
        assert_eq!(parsed.imp_use.num_files, 3);
        assert_eq!(parsed.imp_use.num_dirs, 2);
        assert_eq!(parsed.imp_use.min_udf_read_rev, 0x0102);
    }

    #[test]
    fn vsd_identifiers() {
        let vsd = VolStructDesc {
            structure_type: 0,
            std_ident: *VolStructDesc::NSR02,
            structure_version: 1,
        };
        let bytes = vsd.serialize();
        assert_eq!(bytes.len(), VSD_SIZE);
        let parsed = VolStructDesc::parse(&bytes).expect("parse");
        assert_eq!(&parsed.std_ident, VolStructDesc::NSR02);
    }
}
