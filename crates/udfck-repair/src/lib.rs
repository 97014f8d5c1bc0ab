#![forbid(unsafe_code)]
//! Repair driver.
//!
//! Every mutation of the medium lives here or behind the same gate: a
//! `RepairPolicy` decides per site whether a fix is applied (autofix),
//! prompted for (interactive) or skipped (check-only). Fixes write whole
//! descriptors whose CRC and checksum are recomputed before writeback, and
//! the touched range is synced before success is reported.

pub mod policy;

pub use policy::{FixDecision, Prompter, RepairMode, RepairPolicy, ScriptedPrompter, StdinPrompter};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{
    retag_in_place, verify_descriptor, Avdp, Lvid, LvidImpUse, RegId, SpaceBitmapDesc, Tag,
    Timestamp, AVDP_SIZE, TAG_SIZE,
};
use udfck_space::FoundCounters;
use udfck_types::{
    descriptor_name, ErrorMask, Lbn, Lsn, SectorSize, LVID_INTEGRITY_CLOSE, TAG_IDENT_LVID,
    TAG_IDENT_SBD,
};
use udfck_volume::{avdp_byte_offset, AvdpSlot, LvidInfo, Vds, VDS_KINDS};

/// Smallest legal VDS extent: 16 sectors.
pub const MIN_VDS_EXTENT_SECTORS: u32 = 16;

// ── Fix bookkeeping ─────────────────────────────────────────────────────────

/// What happened at one fix site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    /// Nothing wrong at this site.
    Clean,
    /// Error found and fixed.
    Applied,
    /// Error found, fix declined or check-only.
    Declined,
    /// Error found with no usable redundancy to fix from.
    Uncorrectable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub site: String,
    pub outcome: FixOutcome,
}

/// Accumulated fix records for one run.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RepairLog {
    pub records: Vec<FixRecord>,
}

impl RepairLog {
    pub fn push(&mut self, site: impl Into<String>, outcome: FixOutcome) {
        self.records.push(FixRecord {
            site: site.into(),
            outcome,
        });
    }

    #[must_use]
    pub fn any_applied(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.outcome == FixOutcome::Applied)
    }

    #[must_use]
    pub fn any_unfixed(&self) -> bool {
        self.records
            .iter()
            .any(|r| matches!(r.outcome, FixOutcome::Declined | FixOutcome::Uncorrectable))
    }
}

// ── copy_descriptor ─────────────────────────────────────────────────────────

/// Copy `amount` bytes of descriptor from one sector to another, rewriting
/// the embedded tag so the recorded location names the destination. The
/// descriptor CRC covers only bytes after the tag and stays valid.
pub fn copy_descriptor(
    medium: &Medium,
    sector_size: SectorSize,
    source: Lsn,
    destination: Lsn,
    amount: usize,
) -> Result<()> {
    let src_offset = source
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::RepairFailed("source offset overflow".into()))?;
    let dst_offset = destination
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::RepairFailed("destination offset overflow".into()))?;

    let mut bytes = medium.read_at(src_offset, amount)?;
    if bytes.len() < TAG_SIZE {
        return Err(UdfckError::RepairFailed("descriptor shorter than a tag".into()));
    }
    retag_in_place(&mut bytes, destination);
    medium.write_at(dst_offset, &bytes)?;
    medium.sync_range(dst_offset, amount)?;
    info!(src = source.0, dst = destination.0, amount, "descriptor copied");
    Ok(())
}

// ── AVDP fixes ──────────────────────────────────────────────────────────────

/// Duplicate an AVDP between well-known slots.
pub fn write_avdp(
    medium: &Medium,
    sector_size: SectorSize,
    source: AvdpSlot,
    target: AvdpSlot,
) -> Result<()> {
    let src = avdp_byte_offset(source, sector_size, medium.len_bytes())
        .ok_or(UdfckError::RepairFailed("medium too small for AVDP slot".into()))?;
    let dst = avdp_byte_offset(target, sector_size, medium.len_bytes())
        .ok_or(UdfckError::RepairFailed("medium too small for AVDP slot".into()))?;
    let ss = u64::from(sector_size.get());
    copy_descriptor(
        medium,
        sector_size,
        Lsn((src / ss) as u32),
        Lsn((dst / ss) as u32),
        AVDP_SIZE,
    )?;

    // Read back and prove the copy validates where it landed.
    let bytes = medium.read_at(dst, AVDP_SIZE)?;
    let outcome = verify_descriptor(
        &bytes,
        udfck_types::TAG_IDENT_AVDP,
        Lsn((dst / ss) as u32),
    );
    if outcome.mask.is_structurally_broken() || outcome.mask.contains(ErrorMask::POSITION) {
        return Err(UdfckError::RepairFailed(format!(
            "AVDP copy failed verification ({})",
            outcome.mask
        )));
    }
    info!(slot = target.index(), "AVDP written");
    Ok(())
}

/// Ensure an AVDP's two VDS extent lengths agree and cover at least 16
/// sectors, adopting the larger of the two.
pub fn fix_avdp(
    medium: &Medium,
    sector_size: SectorSize,
    slot: AvdpSlot,
    policy: &mut RepairPolicy,
    log: &mut RepairLog,
) -> Result<()> {
    let offset = avdp_byte_offset(slot, sector_size, medium.len_bytes())
        .ok_or(UdfckError::RepairFailed("medium too small for AVDP slot".into()))?;
    let bytes = medium.read_at(offset, AVDP_SIZE)?;
    let mut avdp = Avdp::parse(&bytes).map_err(UdfckError::Parse)?;

    let min_len = MIN_VDS_EXTENT_SECTORS * sector_size.get();
    let adopted = avdp
        .main_vds_ext
        .length
        .max(avdp.reserve_vds_ext.length)
        .max(min_len);

    if avdp.main_vds_ext.length == adopted && avdp.reserve_vds_ext.length == adopted {
        log.push(format!("AVDP[{}] extent lengths", slot.index()), FixOutcome::Clean);
        return Ok(());
    }

    warn!(
        slot = slot.index(),
        main = avdp.main_vds_ext.length,
        reserve = avdp.reserve_vds_ext.length,
        adopted,
        "AVDP extent lengths inconsistent"
    );

    let site = format!("AVDP[{}] extent lengths", slot.index());
    if policy.decide(&site) != FixDecision::Apply {
        log.push(site, FixOutcome::Declined);
        return Ok(());
    }

    avdp.main_vds_ext.length = adopted;
    avdp.reserve_vds_ext.length = adopted;
    let out = avdp.serialize();
    medium.write_at(offset, &out)?;
    medium.sync_range(offset, out.len())?;
    log.push(site, FixOutcome::Applied);
    Ok(())
}

// ── fix_vds ─────────────────────────────────────────────────────────────────

/// Reconcile the two VDS copies slot by slot: copy the intact side over the
/// broken one, report when both are gone.
pub fn fix_vds(
    medium: &Medium,
    sector_size: SectorSize,
    vds: &Vds,
    policy: &mut RepairPolicy,
    log: &mut RepairLog,
) -> Result<()> {
    for ident in VDS_KINDS {
        let name = descriptor_name(ident);
        let main_mask = vds.main.mask_for(ident);
        let reserve_mask = vds.reserve.mask_for(ident);

        match (main_mask.is_empty(), reserve_mask.is_empty()) {
            (true, true) => {
                log.push(name, FixOutcome::Clean);
            }
            (false, false) => {
                error!(descriptor = name, "both VDS copies are broken, cannot fix");
                log.push(name, FixOutcome::Uncorrectable);
            }
            (false, true) => {
                repair_slot(medium, sector_size, vds, ident, true, policy, log)?;
            }
            (true, false) => {
                repair_slot(medium, sector_size, vds, ident, false, policy, log)?;
            }
        }
    }
    Ok(())
}

fn repair_slot(
    medium: &Medium,
    sector_size: SectorSize,
    vds: &Vds,
    ident: u16,
    main_is_broken: bool,
    policy: &mut RepairPolicy,
    log: &mut RepairLog,
) -> Result<()> {
    let name = descriptor_name(ident);
    let (intact, broken) = if main_is_broken {
        (&vds.reserve, &vds.main)
    } else {
        (&vds.main, &vds.reserve)
    };
    let Some(source) = intact.slot(ident) else {
        log.push(name, FixOutcome::Uncorrectable);
        return Ok(());
    };
    let Some(destination) = broken.slot(ident) else {
        // The kind never loaded on the broken side; without its slot
        // position there is nowhere safe to write.
        warn!(descriptor = name, "broken copy has no slot to rewrite");
        log.push(name, FixOutcome::Uncorrectable);
        return Ok(());
    };

    let side = if main_is_broken { "main" } else { "reserve" };
    let site = format!("{side} {name}");
    if policy.decide(&site) != FixDecision::Apply {
        log.push(site, FixOutcome::Declined);
        return Ok(());
    }

    copy_descriptor(
        medium,
        sector_size,
        source.location,
        destination.location,
        sector_size.as_usize(),
    )?;
    info!(descriptor = name, side, "VDS descriptor restored from redundant copy");
    log.push(site, FixOutcome::Applied);
    Ok(())
}

// ── fix_lvid ────────────────────────────────────────────────────────────────

/// Rebuild or refresh the LVID from the walk results.
///
/// A structurally broken LVID gets a full rebuild: the integrity extent is
/// zeroed and a fresh descriptor installed. An intact one keeps its identity
/// fields and gets the derived counters, a closed integrity type and a
/// current recording time.
#[allow(clippy::too_many_arguments)]
pub fn fix_lvid(
    medium: &Medium,
    sector_size: SectorSize,
    info: &LvidInfo,
    found: &FoundCounters,
    free_space_blocks: u32,
    partition_blocks: u32,
    serial: u16,
    min_udf_read_rev: u16,
    policy: &mut RepairPolicy,
    log: &mut RepairLog,
) -> Result<()> {
    let site = "LVID";
    if policy.decide(site) != FixDecision::Apply {
        log.push(site, FixOutcome::Declined);
        return Ok(());
    }

    let version = if min_udf_read_rev >= 0x0200 { 3 } else { 2 };
    let next_unique_id = found.next_unique_id().max(16);

    let mut lvid = match (&info.lvid, info.mask.is_structurally_broken()) {
        (Some(existing), false) => existing.clone(),
        _ => {
            info!(lsn = info.location.0, "rebuilding LVID from scratch");
            Lvid {
                tag: Tag {
                    ident: TAG_IDENT_LVID,
                    version,
                    serial,
                    location: info.location.0,
                    ..Tag::default()
                },
                recording_time: Timestamp::default(),
                integrity_type: LVID_INTEGRITY_CLOSE,
                next_integrity_ext: Default::default(),
                next_unique_id,
                contents_use_rest: [0; 24],
                num_partitions: 1,
                free_space_table: vec![0],
                size_table: vec![0],
                imp_use: LvidImpUse {
                    impl_id: RegId::from_ident(b"*udfck"),
                    num_files: 0,
                    num_dirs: 0,
                    min_udf_read_rev,
                    min_udf_write_rev: min_udf_read_rev,
                    max_udf_write_rev: 0x0201,
                    extra: Vec::new(),
                },
            }
        }
    };

    lvid.tag.location = info.location.0;
    lvid.tag.serial = serial;
    lvid.integrity_type = LVID_INTEGRITY_CLOSE;
    lvid.recording_time = Timestamp::now();
    lvid.next_unique_id = next_unique_id;
    lvid.imp_use.num_files = found.num_files;
    lvid.imp_use.num_dirs = found.num_dirs;
    if lvid.free_space_table.is_empty() {
        lvid.free_space_table.push(0);
        lvid.size_table.push(0);
    }
    lvid.free_space_table[0] = free_space_blocks;
    lvid.size_table[0] = partition_blocks;

    let offset = info
        .location
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::RepairFailed("LVID offset overflow".into()))?;

    // Zero the integrity extent so stale descriptors cannot shadow the new
    // one, then install it.
    let extent_len = (info.extent_length as usize)
        .max(sector_size.as_usize())
        .min(sector_size.as_usize() * 16);
    medium.write_at(offset, &vec![0_u8; extent_len])?;
    let bytes = lvid.serialize();
    medium.write_at(offset, &bytes)?;
    medium.sync_range(offset, extent_len)?;

    info!(
        files = found.num_files,
        dirs = found.num_dirs,
        next_unique_id,
        free_space_blocks,
        "LVID rewritten"
    );
    log.push(site, FixOutcome::Applied);
    Ok(())
}

// ── fix_pd (Space Bitmap rewrite) ───────────────────────────────────────────

/// Overwrite the recorded Space Bitmap with the derived bitmap.
///
/// Table-based space management (Unallocated Space Table, Freed Space Table,
/// Freed Space Bitmap) is not supported and is reported as such.
pub fn fix_pd(
    medium: &Medium,
    sector_size: SectorSize,
    header: &udfck_ondisk::PartitionHeaderDesc,
    partition_start: Lsn,
    derived_bitmap: &[u8],
    partition_blocks: u32,
    policy: &mut RepairPolicy,
    log: &mut RepairLog,
) -> Result<()> {
    if header.unalloc_space_table.length_bytes() > 0 {
        warn!("unallocated space table is not supported");
        log.push("unallocated space table", FixOutcome::Uncorrectable);
    }
    if header.freed_space_table.length_bytes() > 0 {
        warn!("freed space table is not supported");
        log.push("freed space table", FixOutcome::Uncorrectable);
    }
    if header.freed_space_bitmap.length_bytes() > 0 {
        warn!("freed space bitmap is not supported");
        log.push("freed space bitmap", FixOutcome::Uncorrectable);
    }

    let sbd_ad = header.unalloc_space_bitmap;
    if sbd_ad.length_bytes() == 0 {
        warn!("partition header declares no space bitmap");
        log.push("SBD", FixOutcome::Uncorrectable);
        return Ok(());
    }

    let sbd_lsn = Lbn(sbd_ad.ext_position)
        .to_lsn(partition_start)
        .ok_or(UdfckError::RepairFailed("SBD address overflow".into()))?;
    let offset = sbd_lsn
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::RepairFailed("SBD offset overflow".into()))?;

    // The SBD's own tag must hold before it is rewritten in place.
    let header_bytes = medium.read_at(offset, udfck_ondisk::SBD_HEADER_SIZE)?;
    let tag = Tag::parse(&header_bytes).map_err(UdfckError::Parse)?;
    if tag.ident != TAG_IDENT_SBD || !Tag::checksum_ok(&header_bytes) {
        error!(lsn = sbd_lsn.0, "space bitmap descriptor tag is invalid");
        log.push("SBD", FixOutcome::Uncorrectable);
        return Ok(());
    }

    let site = "SBD bitmap";
    if policy.decide(site) != FixDecision::Apply {
        log.push(site, FixOutcome::Declined);
        return Ok(());
    }

    let sbd = SpaceBitmapDesc {
        tag: Tag {
            ident: TAG_IDENT_SBD,
            version: tag.version,
            serial: tag.serial,
            location: sbd_lsn.0,
            ..Tag::default()
        },
        num_bits: partition_blocks,
        num_bytes: derived_bitmap.len() as u32,
        bitmap: derived_bitmap.to_vec(),
    };
    let bytes = sbd.serialize();
    medium.write_at(offset, &bytes)?;
    medium.sync_range(offset, bytes.len())?;
    info!(lsn = sbd_lsn.0, bits = partition_blocks, "space bitmap rewritten");
    log.push(site, FixOutcome::Applied);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use udfck_media::AccessMode;
    use udfck_ondisk::{finalize_descriptor, ExtentAd};

    const SS: u32 = 2048;

    fn writable_medium(image: &[u8]) -> (NamedTempFile, Medium) {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(image).expect("write");
        file.flush().expect("flush");
        let medium = Medium::open(file.path(), AccessMode::ReadWrite).expect("open");
        (file, medium)
    }

    fn sector_size() -> SectorSize {
        SectorSize::new(SS).unwrap()
    }

    fn descriptor_at(ident: u16, location: u32, payload: u8) -> Vec<u8> {
        let mut buf = vec![0_u8; 512];
        let tag = Tag {
            ident,
            version: 2,
            serial: 1,
            location,
            ..Tag::default()
        };
        tag.serialize_into(&mut buf[..16]);
        buf[40] = payload;
        finalize_descriptor(&mut buf);
        buf
    }

    #[test]
    fn copy_descriptor_retargets_and_validates() {
        let mut image = vec![0_u8; SS as usize * 64];
        let src = descriptor_at(udfck_types::TAG_IDENT_PVD, 10, 0x5A);
        image[10 * SS as usize..10 * SS as usize + 512].copy_from_slice(&src);
        let (_f, medium) = writable_medium(&image);

        copy_descriptor(&medium, sector_size(), Lsn(10), Lsn(20), 512).expect("copy");

        let copied = medium.read_at(20 * u64::from(SS), 512).expect("read");
        let outcome = verify_descriptor(&copied, udfck_types::TAG_IDENT_PVD, Lsn(20));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);
        assert_eq!(copied[40], 0x5A);
        // Payload CRC is untouched; the source still validates at its home.
        let original = medium.read_at(10 * u64::from(SS), 512).expect("read");
        assert!(
            verify_descriptor(&original, udfck_types::TAG_IDENT_PVD, Lsn(10))
                .mask
                .is_empty()
        );
    }

    #[test]
    fn copy_descriptor_is_symmetric() {
        let mut image = vec![0_u8; SS as usize * 64];
        let src = descriptor_at(udfck_types::TAG_IDENT_PD, 5, 0x77);
        image[5 * SS as usize..5 * SS as usize + 512].copy_from_slice(&src);
        let (_f, medium) = writable_medium(&image);

        copy_descriptor(&medium, sector_size(), Lsn(5), Lsn(6), 512).expect("copy there");
        copy_descriptor(&medium, sector_size(), Lsn(6), Lsn(5), 512).expect("copy back");

        let back = medium.read_at(5 * u64::from(SS), 512).expect("read");
        assert_eq!(back, src, "round trip reproduces the original bytes");
    }

    #[test]
    fn write_avdp_duplicates_between_slots() {
        let mut image = vec![0_u8; SS as usize * 1024];
        let avdp = Avdp {
            tag: Tag {
                ident: udfck_types::TAG_IDENT_AVDP,
                version: 2,
                serial: 1,
                location: 256,
                ..Tag::default()
            },
            main_vds_ext: ExtentAd {
                length: 16 * SS,
                location: 32,
            },
            reserve_vds_ext: ExtentAd {
                length: 16 * SS,
                location: 48,
            },
        };
        let off = 256 * SS as usize;
        let bytes = avdp.serialize();
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = writable_medium(&image);

        write_avdp(&medium, sector_size(), AvdpSlot::First, AvdpSlot::Second).expect("write");

        let last = medium
            .read_at((1024 - 1) * u64::from(SS), AVDP_SIZE)
            .expect("read");
        let outcome = verify_descriptor(&last, udfck_types::TAG_IDENT_AVDP, Lsn(1023));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);
        let copied = Avdp::parse(&last).expect("parse");
        assert_eq!(copied.main_vds_ext, avdp.main_vds_ext);
        assert_eq!(copied.reserve_vds_ext, avdp.reserve_vds_ext);
        assert_eq!(copied.tag.location, 1023);
    }

    #[test]
    fn fix_avdp_adopts_larger_extent_length() {
        let mut image = vec![0_u8; SS as usize * 1024];
        let avdp = Avdp {
            tag: Tag {
                ident: udfck_types::TAG_IDENT_AVDP,
                version: 2,
                serial: 1,
                location: 256,
                ..Tag::default()
            },
            main_vds_ext: ExtentAd {
                length: 4 * SS, // below the 16-sector minimum
                location: 32,
            },
            reserve_vds_ext: ExtentAd {
                length: 20 * SS,
                location: 48,
            },
        };
        let off = 256 * SS as usize;
        let bytes = avdp.serialize();
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = writable_medium(&image);

        let mut policy = RepairPolicy::autofix();
        let mut log = RepairLog::default();
        fix_avdp(&medium, sector_size(), AvdpSlot::First, &mut policy, &mut log).expect("fix");

        let fixed = Avdp::parse(&medium.read_at(off as u64, AVDP_SIZE).expect("read"))
            .expect("parse");
        assert_eq!(fixed.main_vds_ext.length, 20 * SS);
        assert_eq!(fixed.reserve_vds_ext.length, 20 * SS);
        assert!(log.any_applied());

        // Second run is a no-op.
        let mut log2 = RepairLog::default();
        fix_avdp(&medium, sector_size(), AvdpSlot::First, &mut policy, &mut log2)
            .expect("fix again");
        assert!(!log2.any_applied());
        assert_eq!(log2.records[0].outcome, FixOutcome::Clean);
    }

    #[test]
    fn check_only_policy_never_writes() {
        let mut image = vec![0_u8; SS as usize * 1024];
        let avdp = Avdp {
            tag: Tag {
                ident: udfck_types::TAG_IDENT_AVDP,
                version: 2,
                serial: 1,
                location: 256,
                ..Tag::default()
            },
            main_vds_ext: ExtentAd {
                length: SS,
                location: 32,
            },
            reserve_vds_ext: ExtentAd {
                length: 16 * SS,
                location: 48,
            },
        };
        let off = 256 * SS as usize;
        let bytes = avdp.serialize();
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = writable_medium(&image);

        let mut policy = RepairPolicy::check_only();
        let mut log = RepairLog::default();
        fix_avdp(&medium, sector_size(), AvdpSlot::First, &mut policy, &mut log).expect("fix");

        assert!(!log.any_applied());
        assert!(log.any_unfixed());
        let unchanged = medium.read_at(off as u64, AVDP_SIZE).expect("read");
        assert_eq!(unchanged, bytes);
    }

    #[test]
    fn fix_pd_refuses_invalid_sbd_tag() {
        let image = vec![0_u8; SS as usize * 600];
        let (_f, medium) = writable_medium(&image);

        let header = udfck_ondisk::PartitionHeaderDesc {
            unalloc_space_bitmap: udfck_ondisk::ShortAd {
                ext_length: SS,
                ext_position: 4,
            },
            ..Default::default()
        };
        let mut policy = RepairPolicy::autofix();
        let mut log = RepairLog::default();
        let bitmap = vec![0xFF_u8; 64];
        fix_pd(
            &medium,
            sector_size(),
            &header,
            Lsn(257),
            &bitmap,
            512,
            &mut policy,
            &mut log,
        )
        .expect("fix_pd");
        assert!(log
            .records
            .iter()
            .any(|r| r.site == "SBD" && r.outcome == FixOutcome::Uncorrectable));
    }

    #[test]
    fn fix_pd_rewrites_bitmap() {
        let mut image = vec![0_u8; SS as usize * 600];
        // Valid SBD with a stale bitmap at partition LBN 4 (LSN 261).
        let stale = SpaceBitmapDesc {
            tag: Tag {
                ident: TAG_IDENT_SBD,
                version: 2,
                serial: 1,
                location: 261,
                ..Tag::default()
            },
            num_bits: 512,
            num_bytes: 64,
            bitmap: vec![0xFF; 64],
        };
        let off = 261 * SS as usize;
        let bytes = stale.serialize();
        image[off..off + bytes.len()].copy_from_slice(&bytes);
        let (_f, medium) = writable_medium(&image);

        let header = udfck_ondisk::PartitionHeaderDesc {
            unalloc_space_bitmap: udfck_ondisk::ShortAd {
                ext_length: SS,
                ext_position: 4,
            },
            ..Default::default()
        };
        let mut derived = vec![0xFF_u8; 64];
        derived[0] = 0xF0; // first four blocks used
        let mut policy = RepairPolicy::autofix();
        let mut log = RepairLog::default();
        fix_pd(
            &medium,
            sector_size(),
            &header,
            Lsn(257),
            &derived,
            512,
            &mut policy,
            &mut log,
        )
        .expect("fix_pd");
        assert!(log.any_applied());

        let rewritten =
            SpaceBitmapDesc::parse(&medium.read_at(off as u64, 24 + 64).expect("read"))
                .expect("parse");
        assert_eq!(rewritten.bitmap, derived);
        assert_eq!(rewritten.num_bits, 512);
        let outcome = verify_descriptor(
            &medium.read_at(off as u64, 24 + 64).expect("read"),
            TAG_IDENT_SBD,
            Lsn(261),
        );
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);
    }

    #[test]
    fn fix_lvid_rebuilds_from_found_counters() {
        let image = vec![0_u8; SS as usize * 128];
        let (_f, medium) = writable_medium(&image);

        let info = LvidInfo {
            lvid: None,
            mask: ErrorMask::CHECKSUM | ErrorMask::CRC,
            location: Lsn(64),
            extent_length: SS,
        };
        let found = FoundCounters {
            num_files: 4,
            num_dirs: 2,
            max_unique_id: 39,
            ..FoundCounters::default()
        };
        let mut policy = RepairPolicy::autofix();
        let mut log = RepairLog::default();
        fix_lvid(
            &medium,
            sector_size(),
            &info,
            &found,
            480,
            512,
            7,
            0x0201,
            &mut policy,
            &mut log,
        )
        .expect("fix_lvid");
        assert!(log.any_applied());

        let bytes = medium
            .read_at(64 * u64::from(SS), SS as usize)
            .expect("read");
        let outcome = verify_descriptor(&bytes, TAG_IDENT_LVID, Lsn(64));
        assert!(outcome.mask.is_empty(), "mask: {}", outcome.mask);
        let lvid = Lvid::parse(&bytes).expect("parse");
        assert_eq!(lvid.integrity_type, LVID_INTEGRITY_CLOSE);
        assert_eq!(lvid.imp_use.num_files, 4);
        assert_eq!(lvid.imp_use.num_dirs, 2);
        assert_eq!(lvid.next_unique_id, 40);
        assert_eq!(lvid.free_space_table[0], 480);
        assert_eq!(lvid.size_table[0], 512);
        assert_eq!(lvid.tag.serial, 7);
        assert_eq!(lvid.tag.version, 3, "min read revision 0x0201 takes version 3");
        assert!(lvid.recording_time.year >= 2024);
    }
}
