//! File-level descriptors: FSD, FE/EFE, FID, AED and the Space Bitmap.

use crate::ad::{LongAd, LONG_AD_SIZE};
use crate::tag::{finalize_descriptor, RegId, Tag, Timestamp};
use udfck_types::{
    ensure_slice, read_fixed, read_le_u16, read_le_u32, read_le_u64, u64_to_usize, ParseError,
    FID_CHAR_DELETED, FID_CHAR_DIRECTORY, FID_CHAR_PARENT, ICB_FILE_TYPE_DIRECTORY,
    ICB_FILE_TYPE_STREAMDIR, ICB_FLAG_AD_MASK, TAG_IDENT_EFE, TAG_IDENT_FE, TAG_SIZE,
};

pub const FSD_SIZE: usize = 512;
pub const ICB_TAG_SIZE: usize = 20;
pub const FE_FIXED_SIZE: usize = 176;
pub const EFE_FIXED_SIZE: usize = 216;
pub const FID_FIXED_SIZE: usize = 38;
pub const AED_HEADER_SIZE: usize = 24;
pub const SBD_HEADER_SIZE: usize = 24;

// ── File Set Descriptor (ECMA-167 4/14.1) ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSetDesc {
    pub tag: Tag,
    pub recording_time: Timestamp,
    pub interchange_level: u16,
    pub max_interchange_level: u16,
    pub charset_list: u32,
    pub max_charset_list: u32,
    pub file_set_number: u32,
    pub file_set_desc_number: u32,
    pub logical_vol_ident_charset: Vec<u8>,
    pub logical_vol_ident: Vec<u8>,
    pub file_set_charset: Vec<u8>,
    pub file_set_ident: [u8; 32],
    pub copyright_file_ident: [u8; 32],
    pub abstract_file_ident: [u8; 32],
    pub root_directory_icb: LongAd,
    pub domain_ident: RegId,
    pub next_extent: LongAd,
    pub stream_directory_icb: LongAd,
}

impl FileSetDesc {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, FSD_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
            recording_time: Timestamp::parse(&bytes[16..28])?,
            interchange_level: read_le_u16(bytes, 28)?,
            max_interchange_level: read_le_u16(bytes, 30)?,
            charset_list: read_le_u32(bytes, 32)?,
            max_charset_list: read_le_u32(bytes, 36)?,
            file_set_number: read_le_u32(bytes, 40)?,
            file_set_desc_number: read_le_u32(bytes, 44)?,
            logical_vol_ident_charset: bytes[48..112].to_vec(),
            logical_vol_ident: bytes[112..240].to_vec(),
            file_set_charset: bytes[240..304].to_vec(),
            file_set_ident: read_fixed::<32>(bytes, 304)?,
            copyright_file_ident: read_fixed::<32>(bytes, 336)?,
            abstract_file_ident: read_fixed::<32>(bytes, 368)?,
            root_directory_icb: LongAd::parse(&bytes[400..416])?,
            domain_ident: RegId::parse(&bytes[416..448])?,
            next_extent: LongAd::parse(&bytes[448..464])?,
            stream_directory_icb: LongAd::parse(&bytes[464..480])?,
        })
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; FSD_SIZE];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        self.recording_time.serialize_into(&mut buf[16..28]);
        buf[28..30].copy_from_slice(&self.interchange_level.to_le_bytes());
        buf[30..32].copy_from_slice(&self.max_interchange_level.to_le_bytes());
        buf[32..36].copy_from_slice(&self.charset_list.to_le_bytes());
        buf[36..40].copy_from_slice(&self.max_charset_list.to_le_bytes());
        buf[40..44].copy_from_slice(&self.file_set_number.to_le_bytes());
        buf[44..48].copy_from_slice(&self.file_set_desc_number.to_le_bytes());
        buf[48..112].copy_from_slice(&self.logical_vol_ident_charset);
        buf[112..240].copy_from_slice(&self.logical_vol_ident);
        buf[240..304].copy_from_slice(&self.file_set_charset);
        buf[304..336].copy_from_slice(&self.file_set_ident);
        buf[336..368].copy_from_slice(&self.copyright_file_ident);
        buf[368..400].copy_from_slice(&self.abstract_file_ident);
        self.root_directory_icb.serialize_into(&mut buf[400..416]);
        self.domain_ident.serialize_into(&mut buf[416..448]);
        self.next_extent.serialize_into(&mut buf[448..464]);
        self.stream_directory_icb.serialize_into(&mut buf[464..480]);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── ICB tag (ECMA-167 4/14.6) ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IcbTag {
    pub prior_direct_entries: u32,
    pub strategy_type: u16,
    pub strategy_parameter: [u8; 2],
    pub max_entries: u16,
    pub file_type: u8,
    pub parent_icb_location: crate::ad::LbAddr,
    pub flags: u16,
}

impl IcbTag {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, ICB_TAG_SIZE)?;
        Ok(Self {
            prior_direct_entries: read_le_u32(bytes, 0)?,
            strategy_type: read_le_u16(bytes, 4)?,
            strategy_parameter: read_fixed::<2>(bytes, 6)?,
            max_entries: read_le_u16(bytes, 8)?,
            file_type: bytes[11],
            parent_icb_location: crate::ad::LbAddr::parse(&bytes[12..18])?,
            flags: read_le_u16(bytes, 18)?,
        })
    }

    pub fn serialize_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.prior_direct_entries.to_le_bytes());
        buf[4..6].copy_from_slice(&self.strategy_type.to_le_bytes());
        buf[6..8].copy_from_slice(&self.strategy_parameter);
        buf[8..10].copy_from_slice(&self.max_entries.to_le_bytes());
        buf[10] = 0;
        buf[11] = self.file_type;
        self.parent_icb_location.serialize_into(&mut buf[12..18]);
        buf[18..20].copy_from_slice(&self.flags.to_le_bytes());
    }

    /// Allocation-descriptor encoding, low bits of `flags`.
    #[must_use]
    pub fn ad_kind(&self) -> u16 {
        self.flags & ICB_FLAG_AD_MASK
    }
}

// ── File Entry / Extended File Entry (ECMA-167 4/14.9, 4/14.17) ─────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEntryKind {
    Fe,
    Efe,
}

/// A File Entry or Extended File Entry, normalized to one value type.
///
/// The EFE-only fields (`object_size`, `creation_time`,
/// `stream_directory_icb`) are zero/default when `kind` is `Fe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub tag: Tag,
    pub kind: FileEntryKind,
    pub icb_tag: IcbTag,
    pub uid: u32,
    pub gid: u32,
    pub permissions: u32,
    pub file_link_count: u16,
    pub record_format: u8,
    pub record_display_attrs: u8,
    pub record_length: u32,
    pub information_length: u64,
    pub object_size: u64,
    pub logical_blocks_recorded: u64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub creation_time: Timestamp,
    pub attribute_time: Timestamp,
    pub checkpoint: u32,
    pub extended_attr_icb: LongAd,
    pub stream_directory_icb: LongAd,
    pub impl_ident: RegId,
    pub unique_id: u64,
    pub length_extended_attr: u32,
    pub length_alloc_descs: u32,
    pub extended_attrs: Vec<u8>,
    pub alloc_descs: Vec<u8>,
}

impl FileEntry {
    /// Parse an FE or EFE, dispatching on the tag identifier.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let tag = Tag::parse(bytes)?;
        match tag.ident {
            TAG_IDENT_FE => Self::parse_fe(bytes, tag),
            TAG_IDENT_EFE => Self::parse_efe(bytes, tag),
            _ => Err(ParseError::InvalidField {
                field: "tag_ident",
                reason: "not a file entry",
            }),
        }
    }

    fn parse_fe(bytes: &[u8], tag: Tag) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, FE_FIXED_SIZE)?;
        let lea = read_le_u32(bytes, 168)?;
        let lad = read_le_u32(bytes, 172)?;
        let lea_len = u64_to_usize(u64::from(lea), "length_extended_attr")?;
        let lad_len = u64_to_usize(u64::from(lad), "length_alloc_descs")?;
        let ea = ensure_slice(bytes, FE_FIXED_SIZE, lea_len)?.to_vec();
        let ads = ensure_slice(bytes, FE_FIXED_SIZE + lea_len, lad_len)?.to_vec();
        Ok(Self {
            tag,
            kind: FileEntryKind::Fe,
            icb_tag: IcbTag::parse(&bytes[16..36])?,
            uid: read_le_u32(bytes, 36)?,
            gid: read_le_u32(bytes, 40)?,
            permissions: read_le_u32(bytes, 44)?,
            file_link_count: read_le_u16(bytes, 48)?,
            record_format: bytes[50],
            record_display_attrs: bytes[51],
            record_length: read_le_u32(bytes, 52)?,
            information_length: read_le_u64(bytes, 56)?,
            object_size: 0,
            logical_blocks_recorded: read_le_u64(bytes, 64)?,
            access_time: Timestamp::parse(&bytes[72..84])?,
            modification_time: Timestamp::parse(&bytes[84..96])?,
            creation_time: Timestamp::default(),
            attribute_time: Timestamp::parse(&bytes[96..108])?,
            checkpoint: read_le_u32(bytes, 108)?,
            extended_attr_icb: LongAd::parse(&bytes[112..128])?,
            stream_directory_icb: LongAd::default(),
            impl_ident: RegId::parse(&bytes[128..160])?,
            unique_id: read_le_u64(bytes, 160)?,
            length_extended_attr: lea,
            length_alloc_descs: lad,
            extended_attrs: ea,
            alloc_descs: ads,
        })
    }

    fn parse_efe(bytes: &[u8], tag: Tag) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, EFE_FIXED_SIZE)?;
        let lea = read_le_u32(bytes, 208)?;
        let lad = read_le_u32(bytes, 212)?;
        let lea_len = u64_to_usize(u64::from(lea), "length_extended_attr")?;
        let lad_len = u64_to_usize(u64::from(lad), "length_alloc_descs")?;
        let ea = ensure_slice(bytes, EFE_FIXED_SIZE, lea_len)?.to_vec();
        let ads = ensure_slice(bytes, EFE_FIXED_SIZE + lea_len, lad_len)?.to_vec();
        Ok(Self {
            tag,
            kind: FileEntryKind::Efe,
            icb_tag: IcbTag::parse(&bytes[16..36])?,
            uid: read_le_u32(bytes, 36)?,
            gid: read_le_u32(bytes, 40)?,
            permissions: read_le_u32(bytes, 44)?,
            file_link_count: read_le_u16(bytes, 48)?,
            record_format: bytes[50],
            record_display_attrs: bytes[51],
            record_length: read_le_u32(bytes, 52)?,
            information_length: read_le_u64(bytes, 56)?,
            object_size: read_le_u64(bytes, 64)?,
            logical_blocks_recorded: read_le_u64(bytes, 72)?,
            access_time: Timestamp::parse(&bytes[80..92])?,
            modification_time: Timestamp::parse(&bytes[92..104])?,
            creation_time: Timestamp::parse(&bytes[104..116])?,
            attribute_time: Timestamp::parse(&bytes[116..128])?,
            checkpoint: read_le_u32(bytes, 128)?,
            extended_attr_icb: LongAd::parse(&bytes[136..152])?,
            stream_directory_icb: LongAd::parse(&bytes[152..168])?,
            impl_ident: RegId::parse(&bytes[168..200])?,
            unique_id: read_le_u64(bytes, 200)?,
            length_extended_attr: lea,
            length_alloc_descs: lad,
            extended_attrs: ea,
            alloc_descs: ads,
        })
    }

    #[must_use]
    pub fn fixed_size(&self) -> usize {
        match self.kind {
            FileEntryKind::Fe => FE_FIXED_SIZE,
            FileEntryKind::Efe => EFE_FIXED_SIZE,
        }
    }

    /// Descriptor length covered by the CRC plus the tag.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.fixed_size() + self.extended_attrs.len() + self.alloc_descs.len()
    }

    #[must_use]
    pub fn ad_kind(&self) -> u16 {
        self.icb_tag.ad_kind()
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(
            self.icb_tag.file_type,
            ICB_FILE_TYPE_DIRECTORY | ICB_FILE_TYPE_STREAMDIR
        )
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self.kind {
            FileEntryKind::Fe => self.serialize_fe(),
            FileEntryKind::Efe => self.serialize_efe(),
        }
    }

    fn serialize_fe(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.total_size()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        self.icb_tag.serialize_into(&mut buf[16..36]);
        buf[36..40].copy_from_slice(&self.uid.to_le_bytes());
        buf[40..44].copy_from_slice(&self.gid.to_le_bytes());
        buf[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        buf[48..50].copy_from_slice(&self.file_link_count.to_le_bytes());
        buf[50] = self.record_format;
        buf[51] = self.record_display_attrs;
        buf[52..56].copy_from_slice(&self.record_length.to_le_bytes());
        buf[56..64].copy_from_slice(&self.information_length.to_le_bytes());
        buf[64..72].copy_from_slice(&self.logical_blocks_recorded.to_le_bytes());
        self.access_time.serialize_into(&mut buf[72..84]);
        self.modification_time.serialize_into(&mut buf[84..96]);
        self.attribute_time.serialize_into(&mut buf[96..108]);
        buf[108..112].copy_from_slice(&self.checkpoint.to_le_bytes());
        self.extended_attr_icb.serialize_into(&mut buf[112..128]);
        self.impl_ident.serialize_into(&mut buf[128..160]);
        buf[160..168].copy_from_slice(&self.unique_id.to_le_bytes());
        buf[168..172].copy_from_slice(&(self.extended_attrs.len() as u32).to_le_bytes());
        buf[172..176].copy_from_slice(&(self.alloc_descs.len() as u32).to_le_bytes());
        let ea_end = FE_FIXED_SIZE + self.extended_attrs.len();
        buf[FE_FIXED_SIZE..ea_end].copy_from_slice(&self.extended_attrs);
        buf[ea_end..].copy_from_slice(&self.alloc_descs);
        finalize_descriptor(&mut buf);
        buf
    }

    fn serialize_efe(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.total_size()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        self.icb_tag.serialize_into(&mut buf[16..36]);
        buf[36..40].copy_from_slice(&self.uid.to_le_bytes());
        buf[40..44].copy_from_slice(&self.gid.to_le_bytes());
        buf[44..48].copy_from_slice(&self.permissions.to_le_bytes());
        buf[48..50].copy_from_slice(&self.file_link_count.to_le_bytes());
        buf[50] = self.record_format;
        buf[51] = self.record_display_attrs;
        buf[52..56].copy_from_slice(&self.record_length.to_le_bytes());
        buf[56..64].copy_from_slice(&self.information_length.to_le_bytes());
        buf[64..72].copy_from_slice(&self.object_size.to_le_bytes());
        buf[72..80].copy_from_slice(&self.logical_blocks_recorded.to_le_bytes());
        self.access_time.serialize_into(&mut buf[80..92]);
        self.modification_time.serialize_into(&mut buf[92..104]);
        self.creation_time.serialize_into(&mut buf[104..116]);
        self.attribute_time.serialize_into(&mut buf[116..128]);
        buf[128..132].copy_from_slice(&self.checkpoint.to_le_bytes());
        self.extended_attr_icb.serialize_into(&mut buf[136..152]);
        self.stream_directory_icb.serialize_into(&mut buf[152..168]);
        self.impl_ident.serialize_into(&mut buf[168..200]);
        buf[200..208].copy_from_slice(&self.unique_id.to_le_bytes());
        buf[208..212].copy_from_slice(&(self.extended_attrs.len() as u32).to_le_bytes());
        buf[212..216].copy_from_slice(&(self.alloc_descs.len() as u32).to_le_bytes());
        let ea_end = EFE_FIXED_SIZE + self.extended_attrs.len();
        buf[EFE_FIXED_SIZE..ea_end].copy_from_slice(&self.extended_attrs);
        buf[ea_end..].copy_from_slice(&self.alloc_descs);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── File Identifier Descriptor (ECMA-167 4/14.4) ────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fid {
    pub tag: Tag,
    pub file_version_num: u16,
    pub file_characteristics: u8,
    pub icb: LongAd,
    pub imp_use: Vec<u8>,
    pub file_ident: Vec<u8>,
}

impl Fid {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, FID_FIXED_SIZE)?;
        let ident_len = usize::from(bytes[19]);
        let imp_use_len = usize::from(read_le_u16(bytes, 36)?);
        let imp_use = ensure_slice(bytes, FID_FIXED_SIZE, imp_use_len)?.to_vec();
        let file_ident = ensure_slice(bytes, FID_FIXED_SIZE + imp_use_len, ident_len)?.to_vec();
        Ok(Self {
            tag: Tag::parse(bytes)?,
            file_version_num: read_le_u16(bytes, 16)?,
            file_characteristics: bytes[18],
            icb: LongAd::parse(&bytes[20..36])?,
            imp_use,
            file_ident,
        })
    }

    /// Unpadded record length: `38 + lengthOfImpUse + lengthFileIdent`.
    #[must_use]
    pub fn record_len(&self) -> usize {
        FID_FIXED_SIZE + self.imp_use.len() + self.file_ident.len()
    }

    /// Record length rounded up to the 4-byte FID alignment.
    #[must_use]
    pub fn padded_len(&self) -> usize {
        self.record_len().div_ceil(4) * 4
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.file_characteristics & FID_CHAR_DELETED != 0
    }

    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.file_characteristics & FID_CHAR_PARENT != 0
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.file_characteristics & FID_CHAR_DIRECTORY != 0
    }

    /// Serialize padded to the 4-byte boundary, with CRC over record plus
    /// padding, the way FIDs are recorded inside directory extents.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.padded_len()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..18].copy_from_slice(&self.file_version_num.to_le_bytes());
        buf[18] = self.file_characteristics;
        buf[19] = self.file_ident.len() as u8;
        self.icb.serialize_into(&mut buf[20..36]);
        buf[36..38].copy_from_slice(&(self.imp_use.len() as u16).to_le_bytes());
        let iu_end = FID_FIXED_SIZE + self.imp_use.len();
        buf[FID_FIXED_SIZE..iu_end].copy_from_slice(&self.imp_use);
        buf[iu_end..iu_end + self.file_ident.len()].copy_from_slice(&self.file_ident);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── Allocation Extent Descriptor (ECMA-167 4/14.5) ──────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aed {
    pub tag: Tag,
    pub prev_alloc_ext_location: u32,
    pub length_alloc_descs: u32,
}

impl Aed {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, AED_HEADER_SIZE)?;
        Ok(Self {
            tag: Tag::parse(bytes)?,
            prev_alloc_ext_location: read_le_u32(bytes, 16)?,
            length_alloc_descs: read_le_u32(bytes, 20)?,
        })
    }

    /// Serialize header plus AD bytes, finalized.
    #[must_use]
    pub fn serialize(&self, ad_bytes: &[u8]) -> Vec<u8> {
        let mut buf = vec![0_u8; AED_HEADER_SIZE + ad_bytes.len()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.prev_alloc_ext_location.to_le_bytes());
        buf[20..24].copy_from_slice(&(ad_bytes.len() as u32).to_le_bytes());
        buf[AED_HEADER_SIZE..].copy_from_slice(ad_bytes);
        finalize_descriptor(&mut buf);
        buf
    }
}

// ── Space Bitmap Descriptor (ECMA-167 4/14.12) ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpaceBitmapDesc {
    pub tag: Tag,
    pub num_bits: u32,
    pub num_bytes: u32,
    pub bitmap: Vec<u8>,
}

impl SpaceBitmapDesc {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        ensure_slice(bytes, 0, SBD_HEADER_SIZE)?;
        let num_bits = read_le_u32(bytes, 16)?;
        let num_bytes = read_le_u32(bytes, 20)?;
        let len = u64_to_usize(u64::from(num_bytes), "sbd_num_bytes")?;
        let bitmap = ensure_slice(bytes, SBD_HEADER_SIZE, len)?.to_vec();
        Ok(Self {
            tag: Tag::parse(bytes)?,
            num_bits,
            num_bytes,
            bitmap,
        })
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        SBD_HEADER_SIZE + self.bitmap.len()
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0_u8; self.total_size()];
        self.tag.serialize_into(&mut buf[..TAG_SIZE]);
        buf[16..20].copy_from_slice(&self.num_bits.to_le_bytes());
        buf[20..24].copy_from_slice(&self.num_bytes.to_le_bytes());
        buf[SBD_HEADER_SIZE..].copy_from_slice(&self.bitmap);
        finalize_descriptor(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad::{LbAddr, ShortAd};
    use crate::tag::verify_descriptor;
    use udfck_types::{
        ExtentType, Lsn, TAG_IDENT_AED, TAG_IDENT_FID, TAG_IDENT_FSD, TAG_IDENT_SBD,
    };

    fn tag(ident: u16, location: u32) -> Tag {
        Tag {
            ident,
            version: 2,
            serial: 1,
            location,
            ..Tag::default()
        }
    }

    #[test]
    fn fsd_round_trip() {
        let fsd = FileSetDesc {
            tag: tag(TAG_IDENT_FSD, 0),
            recording_time: Timestamp::default(),
            interchange_level: 3,
            max_interchange_level: 3,
            charset_list: 1,
            max_charset_list: 1,
            file_set_number: 0,
            file_set_desc_number: 0,
            logical_vol_ident_charset: vec![0; 64],
            logical_vol_ident: vec![0; 128],
            file_set_charset: vec![0; 64],
            file_set_ident: crate::tag::encode_dstring::<32>("fileset"),
            copyright_file_ident: [0; 32],
            abstract_file_ident: [0; 32],
            root_directory_icb: LongAd {
                ext_length: 2048,
                ext_location: LbAddr {
                    logical_block_num: 1,
                    partition_ref: 0,
                },
                imp_use: [0; 6],
            },
            domain_ident: RegId::from_ident(b"*OSTA UDF Compliant"),
            next_extent: LongAd::default(),
            stream_directory_icb: LongAd::default(),
        };
        let bytes = fsd.serialize();
        let outcome = verify_descriptor(&bytes, TAG_IDENT_FSD, Lsn(0));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);
        let parsed = FileSetDesc::parse(&bytes).expect("parse");
        assert_eq!(parsed.root_directory_icb.ext_location.logical_block_num, 1);
        assert!(parsed.stream_directory_icb.is_empty());
    }

    fn sample_fe(kind: FileEntryKind, file_type: u8, ads: Vec<u8>) -> FileEntry {
        FileEntry {
            tag: tag(
                match kind {
                    FileEntryKind::Fe => TAG_IDENT_FE,
                    FileEntryKind::Efe => TAG_IDENT_EFE,
                },
                1,
            ),
            kind,
            icb_tag: IcbTag {
                strategy_type: 4,
                max_entries: 1,
                file_type,
                flags: udfck_types::ICB_FLAG_AD_SHORT,
                ..IcbTag::default()
            },
            uid: 0,
            gid: 0,
            permissions: 0o1_4555,
            file_link_count: 1,
            record_format: 0,
            record_display_attrs: 0,
            record_length: 0,
            information_length: 5,
            object_size: 0,
            logical_blocks_recorded: 1,
            access_time: Timestamp::default(),
            modification_time: Timestamp::default(),
            creation_time: Timestamp::default(),
            attribute_time: Timestamp::default(),
            checkpoint: 1,
            extended_attr_icb: LongAd::default(),
            stream_directory_icb: LongAd::default(),
            impl_ident: RegId::from_ident(b"*udfck"),
            unique_id: 16,
            length_extended_attr: 0,
            length_alloc_descs: ads.len() as u32,
            extended_attrs: Vec::new(),
            alloc_descs: ads,
        }
    }

    #[test]
    fn fe_round_trip_with_short_ads() {
        let ad = ShortAd {
            ext_length: ExtentType::Recorded.to_raw() | 2048,
            ext_position: 3,
        };
        let mut ad_bytes = vec![0_u8; 8];
        ad.serialize_into(&mut ad_bytes);

        let fe = sample_fe(FileEntryKind::Fe, udfck_types::ICB_FILE_TYPE_REGULAR, ad_bytes);
        let bytes = fe.serialize();
        assert_eq!(bytes.len(), FE_FIXED_SIZE + 8);
        let outcome = verify_descriptor(&bytes, TAG_IDENT_FE, Lsn(1));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = FileEntry::parse(&bytes).expect("parse");
        assert_eq!(parsed.kind, FileEntryKind::Fe);
        assert_eq!(parsed.unique_id, 16);
        assert_eq!(parsed.information_length, 5);
        assert_eq!(parsed.alloc_descs.len(), 8);
        assert!(!parsed.is_directory());
    }

    #[test]
    fn efe_round_trip() {
        let efe = sample_fe(
            FileEntryKind::Efe,
            udfck_types::ICB_FILE_TYPE_DIRECTORY,
            Vec::new(),
        );
        let bytes = efe.serialize();
        assert_eq!(bytes.len(), EFE_FIXED_SIZE);
        let outcome = verify_descriptor(&bytes, TAG_IDENT_EFE, Lsn(1));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = FileEntry::parse(&bytes).expect("parse");
        assert_eq!(parsed.kind, FileEntryKind::Efe);
        assert!(parsed.is_directory());
    }

    #[test]
    fn fid_record_length_and_padding() {
        let mut fid = Fid {
            tag: tag(TAG_IDENT_FID, 2),
            file_version_num: 1,
            file_characteristics: 0,
            icb: LongAd {
                ext_length: 2048,
                ext_location: LbAddr {
                    logical_block_num: 2,
                    partition_ref: 0,
                },
                imp_use: [0; 6],
            },
            imp_use: Vec::new(),
            file_ident: b"\x08hello.txt".to_vec(),
        };
        // 38 + 0 + 10 = 48, already aligned
        assert_eq!(fid.record_len(), 48);
        assert_eq!(fid.padded_len(), 48);

        fid.file_ident = b"\x08hi".to_vec();
        // 38 + 0 + 3 = 41, pads to 44
        assert_eq!(fid.record_len(), 41);
        assert_eq!(fid.padded_len(), 44);

        let bytes = fid.serialize();
        assert_eq!(bytes.len(), 44);
        let outcome = verify_descriptor(&bytes, TAG_IDENT_FID, Lsn(2));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = Fid::parse(&bytes).expect("parse");
        assert_eq!(parsed.file_ident, b"\x08hi".to_vec());
        assert!(!parsed.is_deleted());
    }

    #[test]
    fn fid_parent_entry() {
        let fid = Fid {
            tag: tag(TAG_IDENT_FID, 2),
            file_version_num: 1,
            file_characteristics: FID_CHAR_DIRECTORY | FID_CHAR_PARENT,
            icb: LongAd::default(),
            imp_use: Vec::new(),
            file_ident: Vec::new(),
        };
        assert!(fid.is_parent());
        assert!(fid.is_directory());
        assert_eq!(fid.record_len(), 38);
        assert_eq!(fid.padded_len(), 40);
    }

    #[test]
    fn aed_round_trip() {
        let ad_bytes = vec![0xAB_u8; 16];
        let aed = Aed {
            tag: tag(TAG_IDENT_AED, 9),
            prev_alloc_ext_location: 0,
            length_alloc_descs: 16,
        };
        let bytes = aed.serialize(&ad_bytes);
        assert_eq!(bytes.len(), AED_HEADER_SIZE + 16);
        let outcome = verify_descriptor(&bytes, TAG_IDENT_AED, Lsn(9));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = Aed::parse(&bytes).expect("parse");
        assert_eq!(parsed.length_alloc_descs, 16);
        assert_eq!(&bytes[AED_HEADER_SIZE..], &ad_bytes[..]);
    }

    #[test]
    fn sbd_round_trip() {
        let sbd = SpaceBitmapDesc {
            tag: tag(TAG_IDENT_SBD, 4),
            num_bits: 1024,
            num_bytes: 128,
            bitmap: vec![0xFF; 128],
        };
        let bytes = sbd.serialize();
        let outcome = verify_descriptor(&bytes, TAG_IDENT_SBD, Lsn(4));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);

        let parsed = SpaceBitmapDesc::parse(&bytes).expect("parse");
        assert_eq!(parsed.num_bits, 1024);
        assert_eq!(parsed.bitmap.len(), 128);
    }
}
