#![forbid(unsafe_code)]
//! Synthetic UDF image builder for end-to-end tests.
//!
//! Builds a small but complete UDF volume entirely through the on-disk
//! serializers, so every descriptor's CRC and checksum hold by construction.
//! The image carries a single regular file in the root directory plus the
//! full volume scaffolding: recognition sequence, anchors at sector 256 and
//! the last sector, main and reserve VDS, LVID, FSD, and a recorded Space
//! Bitmap that matches the occupied blocks exactly.

use std::io::Write;
use tempfile::NamedTempFile;
use udfck_ondisk::{
    encode_dstring, Avdp, ExtentAd, Fid, FileEntry, FileEntryKind, FileSetDesc, IcbTag, Iuvd,
    LbAddr, LongAd, Lvd, Lvid, LvidImpUse, PartitionHeaderDesc, Pd, Pvd, RegId, ShortAd,
    SpaceBitmapDesc, Tag, Td, Timestamp, Usd, VolStructDesc,
};
use udfck_types::{
    ExtentType, FID_CHAR_DIRECTORY, FID_CHAR_PARENT, ICB_FILE_TYPE_DIRECTORY,
    ICB_FILE_TYPE_REGULAR, ICB_FLAG_AD_SHORT, LVID_INTEGRITY_CLOSE, TAG_IDENT_AVDP, TAG_IDENT_EFE,
    TAG_IDENT_FE, TAG_IDENT_FID, TAG_IDENT_FSD, TAG_IDENT_IUVD, TAG_IDENT_LVD, TAG_IDENT_LVID,
    TAG_IDENT_PD, TAG_IDENT_PVD, TAG_IDENT_SBD, TAG_IDENT_TD, TAG_IDENT_USD,
};

// ── Fixed geometry of the built image ───────────────────────────────────────

pub const SECTOR_SIZE: u32 = 2048;
pub const TOTAL_SECTORS: u32 = 2048;
pub const MAIN_VDS_LSN: u32 = 32;
pub const RESERVE_VDS_LSN: u32 = 48;
pub const LVID_LSN: u32 = 64;
pub const FIRST_AVDP_LSN: u32 = 256;
pub const PARTITION_START: u32 = 257;
pub const PARTITION_LENGTH: u32 = 1024;

pub const LBN_FSD: u32 = 0;
pub const LBN_ROOT_FE: u32 = 1;
pub const LBN_ROOT_DIR: u32 = 2;
pub const LBN_FILE_FE: u32 = 3;
pub const LBN_FILE_DATA: u32 = 4;
pub const LBN_SBD: u32 = 5;

/// Blocks the clean image occupies inside the partition.
pub const USED_LBNS: [u32; 6] = [
    LBN_FSD,
    LBN_ROOT_FE,
    LBN_ROOT_DIR,
    LBN_FILE_FE,
    LBN_FILE_DATA,
    LBN_SBD,
];

fn default_time(year: u16) -> Timestamp {
    Timestamp {
        type_and_timezone: 1 << 12,
        year,
        month: 3,
        day: 10,
        hour: 12,
        minute: 0,
        second: 0,
        ..Timestamp::default()
    }
}

/// Parameterized builder. The defaults produce a clean, closed volume with
/// one file; the knobs stage the corruption scenarios without breaking
/// checksums where the scenario needs them intact.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    pub serial: u16,
    pub file_name: String,
    pub file_contents: Vec<u8>,
    pub file_unique_id: u64,
    pub file_fe_serial: Option<u16>,
    pub file_fid_serial: Option<u16>,
    pub file_fid_uuid: Option<u32>,
    pub file_mtime: Timestamp,
    pub file_entry_kind: FileEntryKind,
    pub lvid_recording_time: Timestamp,
    pub min_udf_read_rev: u16,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            serial: 1,
            file_name: "hello.txt".to_owned(),
            file_contents: b"hello".to_vec(),
            file_unique_id: 16,
            file_fe_serial: None,
            file_fid_serial: None,
            file_fid_uuid: None,
            file_mtime: default_time(2019),
            file_entry_kind: FileEntryKind::Fe,
            lvid_recording_time: default_time(2020),
            min_udf_read_rev: 0x0102,
        }
    }
}

impl ImageBuilder {
    fn tag(&self, ident: u16, location: u32) -> Tag {
        Tag {
            ident,
            version: 2,
            serial: self.serial,
            location,
            ..Tag::default()
        }
    }

    fn place(image: &mut [u8], lsn: u32, bytes: &[u8]) {
        let off = lsn as usize * SECTOR_SIZE as usize;
        image[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn short_ad(kind: ExtentType, length: u32, position: u32) -> [u8; 8] {
        let mut buf = [0_u8; 8];
        ShortAd {
            ext_length: kind.to_raw() | length,
            ext_position: position,
        }
        .serialize_into(&mut buf);
        buf
    }

    fn pvd(&self, location: u32) -> Pvd {
        Pvd {
            tag: self.tag(TAG_IDENT_PVD, location),
            vds_number: 0,
            primary_vd_number: 0,
            vol_ident: encode_dstring::<32>("udfck-test"),
            vol_seq_number: 1,
            max_vol_seq_number: 1,
            interchange_level: 2,
            max_interchange_level: 3,
            charset_list: 1,
            max_charset_list: 1,
            vol_set_ident: encode_dstring::<128>("udfck-test-set").to_vec(),
            desc_charset: osta_charspec(),
            explanatory_charset: osta_charspec(),
            vol_abstract: ExtentAd::default(),
            vol_copyright: ExtentAd::default(),
            app_ident: RegId::from_ident(b"*udfck"),
            recording_time: self.lvid_recording_time,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 64],
            predecessor_vds_location: 0,
            flags: 0,
        }
    }

    fn lvd(&self, location: u32) -> Lvd {
        let mut contents_use = [0_u8; 16];
        LongAd {
            ext_length: SECTOR_SIZE,
            ext_location: LbAddr {
                logical_block_num: LBN_FSD,
                partition_ref: 0,
            },
            imp_use: [0; 6],
        }
        .serialize_into(&mut contents_use);

        let mut maps = vec![0_u8; 6];
        maps[0] = 1;
        maps[1] = 6;
        maps[2..4].copy_from_slice(&1_u16.to_le_bytes());
        maps[4..6].copy_from_slice(&0_u16.to_le_bytes());

        Lvd {
            tag: self.tag(TAG_IDENT_LVD, location),
            vds_number: 1,
            desc_charset: osta_charspec(),
            logical_vol_ident: encode_dstring::<128>("udfck-test").to_vec(),
            logical_block_size: SECTOR_SIZE,
            domain_ident: RegId::from_ident(b"*OSTA UDF Compliant"),
            logical_vol_contents_use: contents_use,
            map_table_length: 6,
            num_partition_maps: 1,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
            integrity_seq_ext: ExtentAd {
                length: SECTOR_SIZE,
                location: LVID_LSN,
            },
            partition_maps: maps,
        }
    }

    fn pd(&self, location: u32) -> Pd {
        let mut contents_use = vec![0_u8; 128];
        PartitionHeaderDesc {
            unalloc_space_bitmap: ShortAd {
                ext_length: SECTOR_SIZE,
                ext_position: LBN_SBD,
            },
            ..Default::default()
        }
        .serialize_into(&mut contents_use);

        Pd {
            tag: self.tag(TAG_IDENT_PD, location),
            vds_number: 2,
            partition_flags: 1,
            partition_number: 0,
            partition_contents: RegId::from_ident(b"+NSR02"),
            partition_contents_use: contents_use,
            access_type: 3,
            partition_starting_location: PARTITION_START,
            partition_length: PARTITION_LENGTH,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
        }
    }

    fn lvid(&self) -> Lvid {
        Lvid {
            tag: self.tag(TAG_IDENT_LVID, LVID_LSN),
            recording_time: self.lvid_recording_time,
            integrity_type: LVID_INTEGRITY_CLOSE,
            next_integrity_ext: ExtentAd::default(),
            next_unique_id: self.file_unique_id + 1,
            contents_use_rest: [0; 24],
            num_partitions: 1,
            free_space_table: vec![PARTITION_LENGTH - USED_LBNS.len() as u32],
            size_table: vec![PARTITION_LENGTH],
            imp_use: LvidImpUse {
                impl_id: RegId::from_ident(b"*udfck"),
                num_files: 1,
                num_dirs: 1,
                min_udf_read_rev: self.min_udf_read_rev,
                min_udf_write_rev: self.min_udf_read_rev,
                max_udf_write_rev: 0x0201,
                extra: Vec::new(),
            },
        }
    }

    fn fsd(&self) -> FileSetDesc {
        FileSetDesc {
            tag: self.tag(TAG_IDENT_FSD, PARTITION_START + LBN_FSD),
            recording_time: self.lvid_recording_time,
            interchange_level: 3,
            max_interchange_level: 3,
            charset_list: 1,
            max_charset_list: 1,
            file_set_number: 0,
            file_set_desc_number: 0,
            logical_vol_ident_charset: osta_charspec(),
            logical_vol_ident: encode_dstring::<128>("udfck-test").to_vec(),
            file_set_charset: osta_charspec(),
            file_set_ident: encode_dstring::<32>("udfck-test"),
            copyright_file_ident: [0; 32],
            abstract_file_ident: [0; 32],
            root_directory_icb: LongAd {
                ext_length: SECTOR_SIZE,
                ext_location: LbAddr {
                    logical_block_num: LBN_ROOT_FE,
                    partition_ref: 0,
                },
                imp_use: [0; 6],
            },
            domain_ident: RegId::with_udf_revision(b"*OSTA UDF Compliant", self.min_udf_read_rev),
            next_extent: LongAd::default(),
            stream_directory_icb: LongAd::default(),
        }
    }

    fn file_entry(
        &self,
        kind: FileEntryKind,
        location: u32,
        file_type: u8,
        serial: u16,
        unique_id: u64,
        information_length: u64,
        mtime: Timestamp,
        ads: Vec<u8>,
    ) -> FileEntry {
        let ident = match kind {
            FileEntryKind::Fe => TAG_IDENT_FE,
            FileEntryKind::Efe => TAG_IDENT_EFE,
        };
        FileEntry {
            tag: Tag {
                ident,
                version: 2,
                serial,
                location,
                ..Tag::default()
            },
            kind,
            icb_tag: IcbTag {
                strategy_type: 4,
                max_entries: 1,
                file_type,
                flags: ICB_FLAG_AD_SHORT,
                ..IcbTag::default()
            },
            uid: 0,
            gid: 0,
            permissions: 0o644,
            file_link_count: 1,
            record_format: 0,
            record_display_attrs: 0,
            record_length: 0,
            information_length,
            object_size: information_length,
            logical_blocks_recorded: 1,
            access_time: mtime,
            modification_time: mtime,
            creation_time: mtime,
            attribute_time: mtime,
            checkpoint: 1,
            extended_attr_icb: LongAd::default(),
            stream_directory_icb: LongAd::default(),
            impl_ident: RegId::from_ident(b"*udfck"),
            unique_id,
            length_extended_attr: 0,
            length_alloc_descs: ads.len() as u32,
            extended_attrs: Vec::new(),
            alloc_descs: ads,
        }
    }

    /// Build the image bytes.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0_u8; SECTOR_SIZE as usize * TOTAL_SECTORS as usize];

        // Volume recognition sequence.
        for (i, ident) in [
            VolStructDesc::BEA01,
            VolStructDesc::NSR02,
            VolStructDesc::TEA01,
        ]
        .iter()
        .enumerate()
        {
            let vsd = VolStructDesc {
                structure_type: 0,
                std_ident: **ident,
                structure_version: 1,
            };
            Self::place(&mut image, 16 + i as u32, &vsd.serialize());
        }

        // Both VDS copies.
        for start in [MAIN_VDS_LSN, RESERVE_VDS_LSN] {
            Self::place(&mut image, start, &self.pvd(start).serialize());
            Self::place(&mut image, start + 1, &self.lvd(start + 1).serialize());
            Self::place(&mut image, start + 2, &self.pd(start + 2).serialize());
            Self::place(
                &mut image,
                start + 3,
                &Usd {
                    tag: self.tag(TAG_IDENT_USD, start + 3),
                    vds_number: 3,
                    alloc_descs: vec![],
                }
                .serialize(),
            );
            Self::place(
                &mut image,
                start + 4,
                &Iuvd {
                    tag: self.tag(TAG_IDENT_IUVD, start + 4),
                    vds_number: 4,
                    impl_ident: RegId::from_ident(b"*UDF LV Info"),
                    impl_use: vec![0; 460],
                }
                .serialize(),
            );
            Self::place(
                &mut image,
                start + 5,
                &Td {
                    tag: self.tag(TAG_IDENT_TD, start + 5),
                }
                .serialize(),
            );
        }

        // Integrity descriptor.
        Self::place(&mut image, LVID_LSN, &self.lvid().serialize());

        // Anchors at sector 256 and the last sector.
        let avdp = Avdp {
            tag: self.tag(TAG_IDENT_AVDP, FIRST_AVDP_LSN),
            main_vds_ext: ExtentAd {
                length: 16 * SECTOR_SIZE,
                location: MAIN_VDS_LSN,
            },
            reserve_vds_ext: ExtentAd {
                length: 16 * SECTOR_SIZE,
                location: RESERVE_VDS_LSN,
            },
        };
        Self::place(&mut image, FIRST_AVDP_LSN, &avdp.serialize());
        let mut last = avdp;
        last.tag.location = TOTAL_SECTORS - 1;
        Self::place(&mut image, TOTAL_SECTORS - 1, &last.serialize());

        // Partition contents.
        Self::place(&mut image, PARTITION_START + LBN_FSD, &self.fsd().serialize());

        // Root directory: FE plus one data block of FIDs.
        let root_fe = self.file_entry(
            FileEntryKind::Fe,
            PARTITION_START + LBN_ROOT_FE,
            ICB_FILE_TYPE_DIRECTORY,
            self.serial,
            0,
            0,
            self.lvid_recording_time,
            Self::short_ad(ExtentType::Recorded, SECTOR_SIZE, LBN_ROOT_DIR).to_vec(),
        );

        let parent_fid = Fid {
            tag: self.tag(TAG_IDENT_FID, LBN_ROOT_DIR),
            file_version_num: 1,
            file_characteristics: FID_CHAR_DIRECTORY | FID_CHAR_PARENT,
            icb: LongAd {
                ext_length: SECTOR_SIZE,
                ext_location: LbAddr {
                    logical_block_num: LBN_ROOT_FE,
                    partition_ref: 0,
                },
                imp_use: [0; 6],
            },
            imp_use: Vec::new(),
            file_ident: Vec::new(),
        };

        let mut file_icb = LongAd {
            ext_length: SECTOR_SIZE,
            ext_location: LbAddr {
                logical_block_num: LBN_FILE_FE,
                partition_ref: 0,
            },
            imp_use: [0; 6],
        };
        file_icb.set_udf_unique_id(
            self.file_fid_uuid.unwrap_or(self.file_unique_id as u32),
        );
        let mut name_bytes = vec![8_u8];
        name_bytes.extend_from_slice(self.file_name.as_bytes());
        let file_fid = Fid {
            tag: Tag {
                ident: TAG_IDENT_FID,
                version: 2,
                serial: self.file_fid_serial.unwrap_or(self.serial),
                location: LBN_ROOT_DIR,
                ..Tag::default()
            },
            file_version_num: 1,
            file_characteristics: 0,
            icb: file_icb,
            imp_use: Vec::new(),
            file_ident: name_bytes,
        };

        let mut dir_data = parent_fid.serialize();
        dir_data.extend_from_slice(&file_fid.serialize());
        let dir_len = dir_data.len() as u64;

        let mut root_fe = root_fe;
        root_fe.information_length = dir_len;
        root_fe.object_size = dir_len;
        Self::place(&mut image, PARTITION_START + LBN_ROOT_FE, &root_fe.serialize());
        Self::place(&mut image, PARTITION_START + LBN_ROOT_DIR, &dir_data);

        // The file itself.
        let file_fe = self.file_entry(
            self.file_entry_kind,
            PARTITION_START + LBN_FILE_FE,
            ICB_FILE_TYPE_REGULAR,
            self.file_fe_serial.unwrap_or(self.serial),
            self.file_unique_id,
            self.file_contents.len() as u64,
            self.file_mtime,
            Self::short_ad(ExtentType::Recorded, SECTOR_SIZE, LBN_FILE_DATA).to_vec(),
        );
        Self::place(&mut image, PARTITION_START + LBN_FILE_FE, &file_fe.serialize());
        Self::place(&mut image, PARTITION_START + LBN_FILE_DATA, &self.file_contents);

        // Recorded space bitmap: exactly the occupied blocks are used.
        let mut bitmap = vec![0xFF_u8; (PARTITION_LENGTH as usize).div_ceil(8)];
        for lbn in USED_LBNS {
            bitmap[(lbn / 8) as usize] &= !(1 << (lbn % 8));
        }
        let sbd = SpaceBitmapDesc {
            tag: self.tag(TAG_IDENT_SBD, PARTITION_START + LBN_SBD),
            num_bits: PARTITION_LENGTH,
            num_bytes: bitmap.len() as u32,
            bitmap,
        };
        Self::place(&mut image, PARTITION_START + LBN_SBD, &sbd.serialize());

        image
    }
}

/// The OSTA Compressed Unicode charspec all identifier fields carry.
#[must_use]
pub fn osta_charspec() -> Vec<u8> {
    let mut spec = vec![0_u8; 64];
    spec[1..24].copy_from_slice(b"OSTA Compressed Unicode");
    spec
}

/// Byte offset of a whole sector in the image.
#[must_use]
pub fn sector_offset(lsn: u32) -> usize {
    lsn as usize * SECTOR_SIZE as usize
}

/// Write image bytes into a temp file for a `Medium` to open.
pub fn write_image(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp image");
    file.write_all(bytes).expect("write image");
    file.flush().expect("flush image");
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use udfck_ondisk::verify_descriptor;
    use udfck_types::Lsn;

    #[test]
    fn clean_image_descriptors_validate() {
        let image = ImageBuilder::default().build();
        let checks = [
            (TAG_IDENT_AVDP, FIRST_AVDP_LSN),
            (TAG_IDENT_AVDP, TOTAL_SECTORS - 1),
            (TAG_IDENT_PVD, MAIN_VDS_LSN),
            (TAG_IDENT_LVD, MAIN_VDS_LSN + 1),
            (TAG_IDENT_PD, MAIN_VDS_LSN + 2),
            (TAG_IDENT_USD, MAIN_VDS_LSN + 3),
            (TAG_IDENT_IUVD, MAIN_VDS_LSN + 4),
            (TAG_IDENT_TD, MAIN_VDS_LSN + 5),
            (TAG_IDENT_PVD, RESERVE_VDS_LSN),
            (TAG_IDENT_LVID, LVID_LSN),
            (TAG_IDENT_FSD, PARTITION_START + LBN_FSD),
            (TAG_IDENT_FE, PARTITION_START + LBN_ROOT_FE),
            (TAG_IDENT_FE, PARTITION_START + LBN_FILE_FE),
            (TAG_IDENT_SBD, PARTITION_START + LBN_SBD),
        ];
        for (ident, lsn) in checks {
            let off = sector_offset(lsn);
            let outcome =
                verify_descriptor(&image[off..off + SECTOR_SIZE as usize], ident, Lsn(lsn));
            assert!(
                outcome.mask.is_empty(),
                "descriptor {ident} at LSN {lsn}: {}",
                outcome.mask
            );
        }
    }

    #[test]
    fn image_has_expected_geometry() {
        let image = ImageBuilder::default().build();
        assert_eq!(image.len(), SECTOR_SIZE as usize * TOTAL_SECTORS as usize);
        // File data is where the FE's allocation descriptor says.
        let off = sector_offset(PARTITION_START + LBN_FILE_DATA);
        assert_eq!(&image[off..off + 5], b"hello");
    }
}
