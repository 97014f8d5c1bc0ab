//! Logical Volume Integrity Descriptor loading.

use tracing::{debug, info, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{verify_descriptor, Lvd, Lvid};
use udfck_types::{ErrorMask, Lsn, SectorSize, LVID_INTEGRITY_CLOSE, TAG_IDENT_LVID, TAG_SIZE};

/// The LVID as found on the medium, whatever its state.
///
/// A structurally broken or unparseable LVID is not fatal: the repair driver
/// rebuilds it from the walk, so the extent geometry is preserved here even
/// when `lvid` is absent.
#[derive(Debug, Clone)]
pub struct LvidInfo {
    pub lvid: Option<Lvid>,
    pub mask: ErrorMask,
    /// Start of the integrity sequence extent.
    pub location: Lsn,
    /// Length of the integrity sequence extent in bytes.
    pub extent_length: u32,
}

impl LvidInfo {
    /// Whether the recorded integrity state is `CLOSE`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lvid
            .as_ref()
            .is_some_and(|lvid| lvid.integrity_type == LVID_INTEGRITY_CLOSE)
    }
}

/// Load the LVID addressed by `LVD.integritySeqExt`.
pub fn load_lvid(medium: &Medium, lvd: &Lvd, sector_size: SectorSize) -> Result<LvidInfo> {
    let extent = lvd.integrity_seq_ext;
    if extent.is_empty() {
        warn!("LVD carries no integrity sequence extent");
        return Ok(LvidInfo {
            lvid: None,
            mask: ErrorMask::WRONG_DESC,
            location: Lsn(extent.location),
            extent_length: 0,
        });
    }

    let location = Lsn(extent.location);
    let offset = location
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::OutOfBounds {
            offset: u64::MAX,
            length: extent.length as usize,
            medium_len: medium.len_bytes(),
        })?;
    let length = (extent.length as usize).min(sector_size.as_usize() * 16);
    debug!(lsn = location.0, length, "reading integrity sequence extent");
    let bytes = medium.read_at(offset, length)?;

    let outcome = verify_descriptor(&bytes, TAG_IDENT_LVID, location);
    let mut mask = outcome.mask;

    let lvid = if mask.is_structurally_broken() {
        warn!(findings = %mask, "LVID is structurally broken, will rebuild");
        None
    } else {
        let crc_span = outcome
            .tag
            .map_or(bytes.len(), |t| TAG_SIZE + usize::from(t.crc_length));
        match Lvid::parse(&bytes[..crc_span.min(bytes.len())]) {
            Ok(lvid) => {
                info!(
                    integrity_type = lvid.integrity_type,
                    next_unique_id = lvid.next_unique_id,
                    files = lvid.imp_use.num_files,
                    dirs = lvid.imp_use.num_dirs,
                    "LVID loaded"
                );
                if lvid.next_integrity_ext.length > 0 {
                    warn!("further integrity extents present, only the first is checked");
                }
                Some(lvid)
            }
            Err(err) => {
                warn!(%err, "LVID bytes did not parse, will rebuild");
                mask.insert(ErrorMask::WRONG_DESC);
                None
            }
        }
    };

    Ok(LvidInfo {
        lvid,
        mask,
        location,
        extent_length: extent.length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use udfck_media::AccessMode;
    use udfck_ondisk::{ExtentAd, LvidImpUse, RegId, Tag, Timestamp};

    const SS: u32 = 2048;

    fn sample_lvd_pointing_at(lsn: u32) -> Lvd {
        Lvd {
            tag: Tag {
                ident: udfck_types::TAG_IDENT_LVD,
                version: 2,
                serial: 1,
                location: 33,
                ..Tag::default()
            },
            vds_number: 1,
            desc_charset: vec![0; 64],
            logical_vol_ident: vec![0; 128],
            logical_block_size: SS,
            domain_ident: RegId::from_ident(b"*OSTA UDF Compliant"),
            logical_vol_contents_use: [0; 16],
            map_table_length: 0,
            num_partition_maps: 1,
            impl_ident: RegId::from_ident(b"*udfck"),
            impl_use: vec![0; 128],
            integrity_seq_ext: ExtentAd {
                length: SS,
                location: lsn,
            },
            partition_maps: vec![],
        }
    }

    fn sample_lvid(location: u32) -> Lvid {
        Lvid {
            tag: Tag {
                ident: TAG_IDENT_LVID,
                version: 2,
                serial: 1,
                location,
                ..Tag::default()
            },
            recording_time: Timestamp {
                year: 2019,
                month: 5,
                day: 20,
                ..Timestamp::default()
            },
            integrity_type: LVID_INTEGRITY_CLOSE,
            next_integrity_ext: ExtentAd::default(),
            next_unique_id: 21,
            contents_use_rest: [0; 24],
            num_partitions: 1,
            free_space_table: vec![400],
            size_table: vec![512],
            imp_use: LvidImpUse {
                impl_id: RegId::from_ident(b"*udfck"),
                num_files: 1,
                num_dirs: 1,
                min_udf_read_rev: 0x0102,
                min_udf_write_rev: 0x0102,
                max_udf_write_rev: 0x0201,
                extra: Vec::new(),
            },
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
    fn clean_lvid_loads() {
        let mut image = vec![0_u8; SS as usize * 128];
        let bytes = sample_lvid(64).serialize();
        let off = 64 * SS as usize;
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = medium_with(&image);

        let info = load_lvid(&medium, &sample_lvd_pointing_at(64), SectorSize::new(SS).unwrap())
            .expect("load");
        assert!(info.mask.is_empty(), "mask: {}", info.mask);
        assert!(info.is_closed());
        let lvid = info.lvid.expect("lvid");
        assert_eq!(lvid.next_unique_id, 21);
        assert_eq!(lvid.free_space_table, vec![400]);
    }

    #[test]
    fn zeroed_lvid_flagged_not_fatal() {
        let image = vec![0_u8; SS as usize * 128];
        let (_f, medium) = medium_with(&image);

        let info = load_lvid(&medium, &sample_lvd_pointing_at(64), SectorSize::new(SS).unwrap())
            .expect("load");
        assert!(info.lvid.is_none());
        assert!(info.mask.is_structurally_broken());
        assert!(!info.is_closed());
        assert_eq!(info.location, Lsn(64));
    }

    #[test]
    fn open_integrity_reported() {
        let mut lvid = sample_lvid(64);
        lvid.integrity_type = udfck_types::LVID_INTEGRITY_OPEN;
        let mut image = vec![0_u8; SS as usize * 128];
        let bytes = lvid.serialize();
        let off = 64 * SS as usize;
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = medium_with(&image);

        let info = load_lvid(&medium, &sample_lvd_pointing_at(64), SectorSize::new(SS).unwrap())
            .expect("load");
        assert!(info.lvid.is_some());
        assert!(!info.is_closed());
    }
}
