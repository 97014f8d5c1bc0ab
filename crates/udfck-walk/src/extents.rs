//! Allocation-descriptor collection and directory buffer assembly.
//!
//! The raw AD area of a file entry is copied out and walked at the stride
//! its encoding implies. A type-3 entry is transparently replaced by the
//! contents of the Allocation Extent Descriptor it points at, so callers
//! only ever see a straight list of concrete extents.

use crate::WalkGeometry;
use tracing::{debug, error, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{
    verify_descriptor, Aed, ExtAd, FileEntry, LongAd, ShortAd, AED_HEADER_SIZE, EXT_AD_SIZE,
    LONG_AD_SIZE, SHORT_AD_SIZE,
};
use udfck_space::PartitionBitmap;
use udfck_types::{
    ExtentType, Lbn, Lsn, ICB_FLAG_AD_EXTENDED, ICB_FLAG_AD_LONG, ICB_FLAG_AD_SHORT,
    TAG_IDENT_AED,
};

/// One concrete extent, partition-relative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub lbn: Lbn,
    /// Length in bytes (the 30-bit field).
    pub length: u32,
    pub kind: ExtentType,
}

fn ad_stride(ad_kind: u16) -> Option<usize> {
    match ad_kind {
        ICB_FLAG_AD_SHORT => Some(SHORT_AD_SIZE),
        ICB_FLAG_AD_LONG => Some(LONG_AD_SIZE),
        ICB_FLAG_AD_EXTENDED => Some(EXT_AD_SIZE),
        _ => None,
    }
}

fn decode_ad(ad_kind: u16, bytes: &[u8]) -> Result<(u32, u32)> {
    let (raw_length, location) = match ad_kind {
        ICB_FLAG_AD_SHORT => {
            let ad = ShortAd::parse(bytes).map_err(UdfckError::Parse)?;
            (ad.ext_length, ad.ext_position)
        }
        ICB_FLAG_AD_LONG => {
            let ad = LongAd::parse(bytes).map_err(UdfckError::Parse)?;
            (ad.ext_length, ad.ext_location.logical_block_num)
        }
        ICB_FLAG_AD_EXTENDED => {
            let ad = ExtAd::parse(bytes).map_err(UdfckError::Parse)?;
            (ad.ext_length, ad.ext_location.logical_block_num)
        }
        other => {
            return Err(UdfckError::Unsupported(format!(
                "allocation descriptor kind {other}"
            )))
        }
    };
    Ok((raw_length, location))
}

/// Collect the concrete extent list of a file entry, chasing AED chains.
///
/// Blocks occupied by chained AEDs are marked used as they are visited; the
/// chain itself is invisible in the returned list.
pub fn collect_extents(
    medium: &Medium,
    geometry: &WalkGeometry,
    fe: &FileEntry,
    bitmap: &mut PartitionBitmap,
) -> Result<Vec<Extent>> {
    let Some(stride) = ad_stride(fe.ad_kind()) else {
        return Ok(Vec::new());
    };

    let mut ads = fe.alloc_descs.clone();
    let mut extents = Vec::new();
    let mut pos = 0_usize;
    // A malicious chain must terminate; each AED is at most a block.
    let mut chained_aeds = 0_u32;

    while pos + stride <= ads.len() {
        let (raw_length, location) = decode_ad(fe.ad_kind(), &ads[pos..pos + stride])?;
        let length = raw_length & udfck_types::EXTENT_LENGTH_MASK;
        if length == 0 {
            break;
        }
        let kind = ExtentType::from_raw(raw_length);

        if kind == ExtentType::NextExtent {
            chained_aeds += 1;
            if chained_aeds > 64 {
                error!("allocation extent chain too long, stopping");
                return Err(UdfckError::Corruption {
                    what: "AED",
                    lsn: Lsn(0),
                    detail: "allocation extent chain exceeds 64 links".into(),
                });
            }
            let aed_lbn = Lbn(location);
            let continuation = read_aed(medium, geometry, aed_lbn)?;
            bitmap.mark_used(aed_lbn, 1);
            debug!(
                lbn = aed_lbn.0,
                bytes = continuation.len(),
                "allocation extent descriptor spliced in"
            );
            // The chain entry slot is overwritten by the continuation and
            // processing restarts at the same index.
            ads.truncate(pos);
            ads.extend_from_slice(&continuation);
            continue;
        }

        extents.push(Extent {
            lbn: Lbn(location),
            length,
            kind,
        });
        pos += stride;
    }

    Ok(extents)
}

fn read_aed(medium: &Medium, geometry: &WalkGeometry, lbn: Lbn) -> Result<Vec<u8>> {
    let lsn = lbn
        .to_lsn(geometry.partition_start)
        .ok_or(UdfckError::Corruption {
            what: "AED",
            lsn: Lsn(0),
            detail: "AED block number overflow".into(),
        })?;
    let offset = lsn
        .to_byte_offset(geometry.sector_size)
        .ok_or(UdfckError::OutOfBounds {
            offset: u64::MAX,
            length: AED_HEADER_SIZE,
            medium_len: medium.len_bytes(),
        })?;
    let sector = medium.read_at(offset, geometry.sector_size.as_usize())?;

    let outcome = verify_descriptor(&sector, TAG_IDENT_AED, lsn);
    if outcome.mask.is_structurally_broken() || outcome.mask.contains(udfck_types::ErrorMask::POSITION)
    {
        return Err(UdfckError::Corruption {
            what: "AED",
            lsn,
            detail: format!("allocation extent descriptor failed validation ({})", outcome.mask),
        });
    }

    let aed = Aed::parse(&sector).map_err(UdfckError::Parse)?;
    let length = aed.length_alloc_descs as usize;
    if AED_HEADER_SIZE + length > sector.len() {
        return Err(UdfckError::Corruption {
            what: "AED",
            lsn,
            detail: "allocation descriptor area exceeds the block".into(),
        });
    }
    Ok(sector[AED_HEADER_SIZE..AED_HEADER_SIZE + length].to_vec())
}

// ── Directory buffers ───────────────────────────────────────────────────────

/// A segment of directory bytes and the medium range it came from.
#[derive(Debug, Clone, Copy)]
struct Segment {
    buf_start: usize,
    medium_offset: u64,
    len: usize,
}

/// Directory contents assembled from concrete extents, with enough mapping
/// to locate any FID's bytes back on the medium.
#[derive(Debug, Clone)]
pub struct DirBuffer {
    pub bytes: Vec<u8>,
    segments: Vec<Segment>,
}

impl DirBuffer {
    /// Concatenate the recorded extents of a directory. Unrecorded extents
    /// contribute nothing to the byte stream.
    pub fn read(medium: &Medium, geometry: &WalkGeometry, extents: &[Extent]) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut segments = Vec::new();

        for extent in extents {
            if extent.kind != ExtentType::Recorded {
                if extent.kind == ExtentType::AllocatedUnrecorded {
                    warn!(lbn = extent.lbn.0, "directory extent allocated but not recorded");
                }
                continue;
            }
            let lsn = extent
                .lbn
                .to_lsn(geometry.partition_start)
                .ok_or(UdfckError::Corruption {
                    what: "directory",
                    lsn: Lsn(0),
                    detail: "directory extent overflow".into(),
                })?;
            let offset = lsn
                .to_byte_offset(geometry.sector_size)
                .ok_or(UdfckError::OutOfBounds {
                    offset: u64::MAX,
                    length: extent.length as usize,
                    medium_len: medium.len_bytes(),
                })?;
            let data = medium.read_at(offset, extent.length as usize)?;
            segments.push(Segment {
                buf_start: bytes.len(),
                medium_offset: offset,
                len: data.len(),
            });
            bytes.extend_from_slice(&data);
        }

        Ok(Self { bytes, segments })
    }

    /// Absolute medium offset of `len` buffer bytes starting at `buf_off`,
    /// provided they do not straddle extents (UDF keeps FIDs inside one
    /// block, so a straddle means the directory is malformed).
    #[must_use]
    pub fn abs_offset(&self, buf_off: usize, len: usize) -> Option<u64> {
        let segment = self
            .segments
            .iter()
            .find(|s| buf_off >= s.buf_start && buf_off < s.buf_start + s.len)?;
        if buf_off + len > segment.buf_start + segment.len {
            return None;
        }
        Some(segment.medium_offset + (buf_off - segment.buf_start) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use udfck_media::AccessMode;
    use udfck_ondisk::{IcbTag, RegId, Tag, Timestamp};
    use udfck_types::{SectorSize, ICB_FILE_TYPE_REGULAR, TAG_IDENT_FE};

    const SS: u32 = 2048;

    fn geometry() -> WalkGeometry {
        WalkGeometry {
            sector_size: SectorSize::new(SS).unwrap(),
            partition_start: Lsn(257),
            partition_length: 512,
            root_lbn: Lbn(1),
        }
    }

    fn medium_with(image: &[u8]) -> (NamedTempFile, Medium) {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(image).expect("write");
        file.flush().expect("flush");
        let medium = Medium::open(file.path(), AccessMode::ReadOnly).expect("open");
        (file, medium)
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

    fn fe_with_ads(ads: Vec<u8>) -> FileEntry {
        FileEntry {
            tag: Tag {
                ident: TAG_IDENT_FE,
                version: 2,
                serial: 1,
                location: 258,
                ..Tag::default()
            },
            kind: udfck_ondisk::FileEntryKind::Fe,
            icb_tag: IcbTag {
                strategy_type: 4,
                max_entries: 1,
                file_type: ICB_FILE_TYPE_REGULAR,
                flags: ICB_FLAG_AD_SHORT,
                ..IcbTag::default()
            },
            uid: 0,
            gid: 0,
            permissions: 0,
            file_link_count: 1,
            record_format: 0,
            record_display_attrs: 0,
            record_length: 0,
            information_length: 0,
            object_size: 0,
            logical_blocks_recorded: 0,
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
    fn straight_extent_list() {
        let mut ads = Vec::new();
        ads.extend_from_slice(&short_ad(ExtentType::Recorded, 2048, 10));
        ads.extend_from_slice(&short_ad(ExtentType::AllocatedUnrecorded, 4096, 20));
        ads.extend_from_slice(&short_ad(ExtentType::Recorded, 0, 0)); // terminator

        let image = vec![0_u8; SS as usize * 800];
        let (_f, medium) = medium_with(&image);
        let mut bitmap = PartitionBitmap::new_all_free(512);

        let extents =
            collect_extents(&medium, &geometry(), &fe_with_ads(ads), &mut bitmap).expect("collect");
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].lbn, Lbn(10));
        assert_eq!(extents[0].kind, ExtentType::Recorded);
        assert_eq!(extents[1].length, 4096);
        assert_eq!(extents[1].kind, ExtentType::AllocatedUnrecorded);
    }

    #[test]
    fn zero_length_terminates_iteration() {
        let mut ads = Vec::new();
        ads.extend_from_slice(&short_ad(ExtentType::Recorded, 0, 99));
        ads.extend_from_slice(&short_ad(ExtentType::Recorded, 2048, 10));

        let image = vec![0_u8; SS as usize * 800];
        let (_f, medium) = medium_with(&image);
        let mut bitmap = PartitionBitmap::new_all_free(512);

        let extents =
            collect_extents(&medium, &geometry(), &fe_with_ads(ads), &mut bitmap).expect("collect");
        assert!(extents.is_empty(), "nothing after the zero-length entry");
    }

    #[test]
    fn aed_chain_is_transparent() {
        // FE carries one extent then a type-3 link to an AED at LBN 50; the
        // AED continues with two more extents.
        let mut fe_ads = Vec::new();
        fe_ads.extend_from_slice(&short_ad(ExtentType::Recorded, 2048, 10));
        fe_ads.extend_from_slice(&short_ad(ExtentType::NextExtent, 2048, 50));

        let mut aed_ads = Vec::new();
        aed_ads.extend_from_slice(&short_ad(ExtentType::Recorded, 2048, 11));
        aed_ads.extend_from_slice(&short_ad(ExtentType::Recorded, 2048, 12));
        aed_ads.extend_from_slice(&short_ad(ExtentType::Recorded, 0, 0));

        let aed = Aed {
            tag: Tag {
                ident: TAG_IDENT_AED,
                version: 2,
                serial: 1,
                location: 257 + 50,
                ..Tag::default()
            },
            prev_alloc_ext_location: 0,
            length_alloc_descs: aed_ads.len() as u32,
        };
        let mut image = vec![0_u8; SS as usize * 800];
        let aed_bytes = aed.serialize(&aed_ads);
        let off = (257 + 50) * SS as usize;
        image[off..off + aed_bytes.len()].copy_from_slice(&aed_bytes);
        let (_f, medium) = medium_with(&image);
        let mut bitmap = PartitionBitmap::new_all_free(512);

        let extents = collect_extents(&medium, &geometry(), &fe_with_ads(fe_ads), &mut bitmap)
            .expect("collect");
        assert_eq!(extents.len(), 3, "chain is invisible to the caller");
        assert_eq!(extents[0].lbn, Lbn(10));
        assert_eq!(extents[1].lbn, Lbn(11));
        assert_eq!(extents[2].lbn, Lbn(12));
        // The AED's own block was accounted.
        assert!(!bitmap.is_free(Lbn(50)));
    }

    #[test]
    fn corrupt_aed_is_an_error() {
        let mut fe_ads = Vec::new();
        fe_ads.extend_from_slice(&short_ad(ExtentType::NextExtent, 2048, 50));
        let image = vec![0_u8; SS as usize * 800]; // nothing at the AED slot
        let (_f, medium) = medium_with(&image);
        let mut bitmap = PartitionBitmap::new_all_free(512);

        let result = collect_extents(&medium, &geometry(), &fe_with_ads(fe_ads), &mut bitmap);
        assert!(matches!(result, Err(UdfckError::Corruption { .. })));
    }

    #[test]
    fn dir_buffer_maps_offsets_back() {
        let mut image = vec![0_u8; SS as usize * 800];
        // Two recorded one-block extents at LBN 30 and 40 with marker bytes.
        image[(257 + 30) * SS as usize] = 0xAA;
        image[(257 + 40) * SS as usize] = 0xBB;
        let (_f, medium) = medium_with(&image);

        let extents = [
            Extent {
                lbn: Lbn(30),
                length: SS,
                kind: ExtentType::Recorded,
            },
            Extent {
                lbn: Lbn(35),
                length: SS,
                kind: ExtentType::Unallocated,
            },
            Extent {
                lbn: Lbn(40),
                length: SS,
                kind: ExtentType::Recorded,
            },
        ];
        let dir = DirBuffer::read(&medium, &geometry(), &extents).expect("read");
        assert_eq!(dir.bytes.len(), 2 * SS as usize, "unrecorded extent contributes nothing");
        assert_eq!(dir.bytes[0], 0xAA);
        assert_eq!(dir.bytes[SS as usize], 0xBB);

        assert_eq!(
            dir.abs_offset(0, 16),
            Some((257 + 30) as u64 * u64::from(SS))
        );
        assert_eq!(
            dir.abs_offset(SS as usize, 16),
            Some((257 + 40) as u64 * u64::from(SS))
        );
        // A range straddling the extent seam cannot be located.
        assert_eq!(dir.abs_offset(SS as usize - 8, 16), None);
    }
}
