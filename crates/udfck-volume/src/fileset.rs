//! File Set Descriptor loading and partition base resolution.

use tracing::{debug, info, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{validate_dstring, verify_descriptor, FileSetDesc, LongAd, Lvd, Pd, FSD_SIZE};
use udfck_types::{ErrorMask, Lsn, SectorSize, TAG_IDENT_FSD};

/// The FSD plus the LBN→LSN base it was resolved through.
#[derive(Debug, Clone)]
pub struct FilesetInfo {
    pub fsd: FileSetDesc,
    pub mask: ErrorMask,
    /// Partition base: `lsn = partition_start + lbn`.
    pub partition_start: Lsn,
    /// Where the FSD itself sits.
    pub fsd_lsn: Lsn,
}

impl FilesetInfo {
    #[must_use]
    pub fn root_icb(&self) -> LongAd {
        self.fsd.root_directory_icb
    }

    /// Stream directory ICB, when one is recorded.
    #[must_use]
    pub fn stream_icb(&self) -> Option<LongAd> {
        let icb = self.fsd.stream_directory_icb;
        (!icb.is_empty()).then_some(icb)
    }
}

/// Resolve `LVD.logicalVolContentsUse` and load the File Set Descriptor.
pub fn load_fsd(
    medium: &Medium,
    lvd: &Lvd,
    pd: &Pd,
    sector_size: SectorSize,
) -> Result<FilesetInfo> {
    let fsd_ad = lvd.fsd_location().map_err(UdfckError::Parse)?;
    debug!(
        lbn = fsd_ad.ext_location.logical_block_num,
        partition = fsd_ad.ext_location.partition_ref,
        length = fsd_ad.length_bytes(),
        "file set descriptor address"
    );

    if fsd_ad.ext_location.partition_ref != pd.partition_number {
        return Err(UdfckError::Corruption {
            what: "FSD",
            lsn: Lsn(0),
            detail: format!(
                "FSD partition reference {} does not match partition number {}",
                fsd_ad.ext_location.partition_ref, pd.partition_number
            ),
        });
    }

    let partition_start = Lsn(pd.partition_starting_location);
    let fsd_lsn = fsd_ad
        .ext_location
        .lbn()
        .to_lsn(partition_start)
        .ok_or(UdfckError::Corruption {
            what: "FSD",
            lsn: partition_start,
            detail: "FSD block number overflows the address space".into(),
        })?;

    let offset = fsd_lsn
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::OutOfBounds {
            offset: u64::MAX,
            length: FSD_SIZE,
            medium_len: medium.len_bytes(),
        })?;
    let bytes = medium.read_at(offset, FSD_SIZE)?;

    let outcome = verify_descriptor(&bytes, TAG_IDENT_FSD, fsd_lsn);
    let mut mask = outcome.mask;
    if mask.is_structurally_broken() {
        return Err(UdfckError::Corruption {
            what: "FSD",
            lsn: fsd_lsn,
            detail: format!("file set descriptor failed validation ({mask})"),
        });
    }

    let fsd = FileSetDesc::parse(&bytes).map_err(UdfckError::Parse)?;

    if !validate_dstring(&fsd.logical_vol_ident).is_empty()
        || !validate_dstring(&fsd.file_set_ident).is_empty()
    {
        warn!("FSD identifier dstrings are malformed");
        mask.insert(ErrorMask::DSTRING);
    }

    info!(
        fsd_lsn = fsd_lsn.0,
        partition_start = partition_start.0,
        root_lbn = fsd.root_directory_icb.ext_location.logical_block_num,
        "file set descriptor loaded"
    );

    Ok(FilesetInfo {
        fsd,
        mask,
        partition_start,
        fsd_lsn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use udfck_media::AccessMode;
    use udfck_ondisk::{encode_dstring, ExtentAd, LbAddr, RegId, Tag, Timestamp};

    const SS: u32 = 2048;

    fn lvd_with_fsd_at(lbn: u32, partition_ref: u16) -> Lvd {
        let mut contents_use = [0_u8; 16];
        LongAd {
            ext_length: SS,
            ext_location: LbAddr {
                logical_block_num: lbn,
                partition_ref,
            },
            imp_use: [0; 6],
        }
        .serialize_into(&mut contents_use);
        Lvd {
            tag: Tag::default(),
            vds_number: 1,
            desc_charset: vec![0; 64],
            logical_vol_ident: vec![0; 128],
            logical_block_size: SS,
            domain_ident: RegId::from_ident(b"*OSTA UDF Compliant"),
            logical_vol_contents_use: contents_use,
            map_table_length: 0,
            num_partition_maps: 1,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
            integrity_seq_ext: ExtentAd::default(),
            partition_maps: vec![],
        }
    }

    fn sample_pd() -> Pd {
        Pd {
            tag: Tag::default(),
            vds_number: 2,
            partition_flags: 1,
            partition_number: 0,
            partition_contents: RegId::from_ident(b"+NSR02"),
            partition_contents_use: vec![0; 128],
            access_type: 1,
            partition_starting_location: 257,
            partition_length: 512,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
        }
    }

    fn sample_fsd(location: u32) -> FileSetDesc {
        FileSetDesc {
            tag: Tag {
                ident: TAG_IDENT_FSD,
                version: 2,
                serial: 1,
                location,
                ..Tag::default()
            },
            recording_time: Timestamp::default(),
            interchange_level: 3,
            max_interchange_level: 3,
            charset_list: 1,
            max_charset_list: 1,
            file_set_number: 0,
            file_set_desc_number: 0,
            logical_vol_ident_charset: vec![0; 64],
            logical_vol_ident: encode_dstring::<128>("lv").to_vec(),
            file_set_charset: vec![0; 64],
            file_set_ident: encode_dstring::<32>("fs"),
            copyright_file_ident: [0; 32],
            abstract_file_ident: [0; 32],
            root_directory_icb: LongAd {
                ext_length: SS,
                ext_location: LbAddr {
                    logical_block_num: 2,
                    partition_ref: 0,
                },
                imp_use: [0; 6],
            },
            domain_ident: RegId::from_ident(b"*OSTA UDF Compliant"),
            next_extent: LongAd::default(),
            stream_directory_icb: LongAd::default(),
        }
    }

    fn medium_with(image: &[u8]) -> (NamedTempFile, Medium) {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(image).expect("write");
        file.flush().expect("flush");
        let medium = Medium::open(file.path(), AccessMode::ReadOnly).expect("open");
        (file, medium)
    }

    #[test]
    fn fsd_resolves_through_partition_base() {
        let mut image = vec![0_u8; SS as usize * 600];
        // FSD at LBN 0 of a partition starting at LSN 257.
        let bytes = sample_fsd(257).serialize();
        let off = 257 * SS as usize;
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = medium_with(&image);

        let info = load_fsd(
            &medium,
            &lvd_with_fsd_at(0, 0),
            &sample_pd(),
            SectorSize::new(SS).unwrap(),
        )
        .expect("load");
        assert_eq!(info.partition_start, Lsn(257));
        assert_eq!(info.fsd_lsn, Lsn(257));
        assert!(info.mask.is_empty(), "mask: {}", info.mask);
        assert_eq!(info.root_icb().ext_location.logical_block_num, 2);
        assert!(info.stream_icb().is_none());
    }

    #[test]
    fn partition_reference_mismatch_is_fatal() {
        let image = vec![0_u8; SS as usize * 600];
        let (_f, medium) = medium_with(&image);

        let result = load_fsd(
            &medium,
            &lvd_with_fsd_at(0, 5),
            &sample_pd(),
            SectorSize::new(SS).unwrap(),
        );
        assert!(matches!(result, Err(UdfckError::Corruption { .. })));
    }

    #[test]
    fn broken_fsd_is_fatal() {
        // Nothing at the FSD location: zero bytes fail validation.
        let image = vec![0_u8; SS as usize * 600];
        let (_f, medium) = medium_with(&image);

        let result = load_fsd(
            &medium,
            &lvd_with_fsd_at(0, 0),
            &sample_pd(),
            SectorSize::new(SS).unwrap(),
        );
        assert!(matches!(result, Err(UdfckError::Corruption { .. })));
    }
}
