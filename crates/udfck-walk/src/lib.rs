#![forbid(unsafe_code)]
//! File-tree walker.
//!
//! Recursive traversal over File Entries, File Identifier Descriptors and
//! Allocation Extent Descriptors. The walk accounts every occupied block in
//! the partition bitmap, aggregates the found-side counters, and stages the
//! in-place FID/FE fixes (tag serial reconciliation, unique-ID repair,
//! dead-entry deletion) behind the repair gate.
//!
//! Unique-ID assignment is two-pass: the walk only records the maximum
//! observed ID, and `apply_unique_id_fixes` hands out fresh IDs from that
//! maximum afterwards, so a damaged LVID `nextUniqueID` is never trusted.

mod extents;
mod listing;

pub use extents::{collect_extents, DirBuffer, Extent};
pub use listing::{format_entry, tree_prefix, ListingEntry, MAX_DEPTH};

use tracing::{debug, error, info, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{
    crc16, decode_file_identifier, verify_descriptor, Fid, FileEntry, FileEntryKind, LongAd, Tag,
    Timestamp,
};
use udfck_repair::{FixDecision, FixOutcome, RepairLog, RepairPolicy};
use udfck_space::{FoundCounters, PartitionBitmap};
use udfck_types::{
    ErrorMask, ExtentType, Lbn, Lsn, SectorSize, FID_CHAR_DELETED, ICB_FILE_TYPE_DIRECTORY,
    ICB_FILE_TYPE_REGULAR, ICB_FILE_TYPE_STREAMDIR, ICB_FLAG_AD_EXTENDED, ICB_FLAG_AD_IN_ICB,
    ICB_FLAG_AD_LONG, ICB_FLAG_AD_SHORT, TAG_IDENT_EFE, TAG_IDENT_FE, TAG_IDENT_FID, TAG_IDENT_TE,
    TAG_SIZE,
};

/// Geometry the walk resolves addresses through.
#[derive(Debug, Clone, Copy)]
pub struct WalkGeometry {
    pub sector_size: SectorSize,
    pub partition_start: Lsn,
    pub partition_length: u32,
    pub root_lbn: Lbn,
}

impl WalkGeometry {
    fn lbn_to_offset(&self, lbn: Lbn) -> Result<u64> {
        let lsn = lbn
            .to_lsn(self.partition_start)
            .ok_or(UdfckError::OutOfBounds {
                offset: u64::MAX,
                length: 0,
                medium_len: 0,
            })?;
        lsn.to_byte_offset(self.sector_size)
            .ok_or(UdfckError::OutOfBounds {
                offset: u64::MAX,
                length: 0,
                medium_len: 0,
            })
    }
}

/// What became of one inspected ICB target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeStatus {
    /// Entry validated and was accounted.
    Ok,
    /// Entry is unusable; the referencing FID should be deleted.
    Broken,
    /// Not a file entry (terminal entry or foreign descriptor); ignored.
    Skipped,
}

/// Where a FID that needs a unique-ID fix physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FidSite {
    /// Inside a directory data extent, at an absolute medium offset.
    Extent { offset: u64, padded_len: usize },
    /// Embedded in the alloc-descs area of an in-ICB directory FE.
    InIcb { fe_lbn: Lbn, fid_offset: usize },
}

#[derive(Debug, Clone, Copy)]
struct PendingUniqueIdFix {
    site: FidSite,
    target_fe_lbn: Lbn,
}

/// The walker: one instance per run, shared by the stream-directory and
/// root-directory traversals.
pub struct Walker<'a> {
    medium: &'a Medium,
    geometry: WalkGeometry,
    expected_serial: Option<u16>,
    lvid_recording_time: Option<Timestamp>,
    policy: &'a mut RepairPolicy,
    log: &'a mut RepairLog,
    pub bitmap: PartitionBitmap,
    pub found: FoundCounters,
    /// Findings against the LVID discovered during the walk (timestamps).
    pub lvid_findings: ErrorMask,
    /// Findings against files that could not be fixed in this pass.
    pub file_findings: ErrorMask,
    pub listing: Vec<String>,
    pending_unique_id_fixes: Vec<PendingUniqueIdFix>,
}

impl<'a> Walker<'a> {
    pub fn new(
        medium: &'a Medium,
        geometry: WalkGeometry,
        expected_serial: Option<u16>,
        lvid_recording_time: Option<Timestamp>,
        min_udf_read_rev: u16,
        policy: &'a mut RepairPolicy,
        log: &'a mut RepairLog,
    ) -> Self {
        let bitmap = PartitionBitmap::new_all_free(geometry.partition_length);
        Self {
            medium,
            geometry,
            expected_serial,
            lvid_recording_time,
            policy,
            log,
            bitmap,
            found: FoundCounters {
                min_udf_read_rev,
                min_udf_write_rev: min_udf_read_rev,
                max_udf_write_rev: 0x0201,
                ..FoundCounters::default()
            },
            lvid_findings: ErrorMask::empty(),
            file_findings: ErrorMask::empty(),
            listing: Vec::new(),
            pending_unique_id_fixes: Vec::new(),
        }
    }

    /// Walk one tree from its ICB. Used for both the stream directory and
    /// the root directory.
    pub fn walk_tree(&mut self, icb: LongAd) -> Result<FeStatus> {
        self.account_icb(&icb);
        self.inspect_file_entry(icb.ext_location.lbn(), 0)
    }

    // ── Accounting ──────────────────────────────────────────────────────

    fn account_icb(&mut self, icb: &LongAd) {
        let blocks = self.geometry.sector_size.blocks_for(u64::from(icb.length_bytes())) as u32;
        if blocks > 0 {
            self.bitmap.mark_used(icb.ext_location.lbn(), blocks);
        }
    }

    fn account_extent(&mut self, extent: &Extent) {
        let blocks = self
            .geometry
            .sector_size
            .blocks_for(u64::from(extent.length)) as u32;
        if blocks == 0 {
            return;
        }
        match extent.kind {
            ExtentType::Recorded => self.bitmap.mark_used(extent.lbn, blocks),
            ExtentType::AllocatedUnrecorded => {
                // Accounted as used, tracked separately: this mirrors the
                // historical behavior and may under-count free space.
                self.bitmap.mark_used(extent.lbn, blocks);
                self.found.type1_blocks += u64::from(blocks);
            }
            ExtentType::Unallocated | ExtentType::NextExtent => {}
        }
    }

    fn note_unique_id(&mut self, id: u64) {
        if id > self.found.max_unique_id {
            self.found.max_unique_id = id;
        }
    }

    // ── File entries ────────────────────────────────────────────────────

    /// Inspect the FE/EFE at a partition block.
    fn inspect_file_entry(&mut self, lbn: Lbn, depth: usize) -> Result<FeStatus> {
        if depth >= MAX_DEPTH {
            warn!(lbn = lbn.0, "directory nesting exceeds the depth bound, not descending");
            return Ok(FeStatus::Skipped);
        }

        let offset = self.geometry.lbn_to_offset(lbn)?;
        let sector = self
            .medium
            .read_at(offset, self.geometry.sector_size.as_usize())?;
        let tag = Tag::parse(&sector).map_err(UdfckError::Parse)?;

        if !Tag::checksum_ok(&sector) {
            error!(lbn = lbn.0, "file entry tag checksum failed");
            self.file_findings.insert(ErrorMask::CHECKSUM);
            return Ok(FeStatus::Broken);
        }

        match tag.ident {
            TAG_IDENT_FE | TAG_IDENT_EFE => {}
            TAG_IDENT_TE => {
                debug!(lbn = lbn.0, "terminal entry");
                return Ok(FeStatus::Skipped);
            }
            TAG_IDENT_FID => {
                error!(lbn = lbn.0, "FID where a file entry was expected");
                return Err(UdfckError::Corruption {
                    what: "FE",
                    lsn: Lsn(tag.location),
                    detail: "file identifier descriptor in ICB position".into(),
                });
            }
            other => {
                warn!(lbn = lbn.0, ident = other, "unexpected descriptor in ICB, skipping");
                return Ok(FeStatus::Skipped);
            }
        }

        // The declared lengths size the full descriptor; re-read when the
        // tail runs past the first block.
        let fe_bytes = self.read_file_entry_bytes(&sector, offset, tag.ident)?;
        let lsn = lbn
            .to_lsn(self.geometry.partition_start)
            .ok_or(UdfckError::Corruption {
                what: "FE",
                lsn: Lsn(0),
                detail: "block number overflow".into(),
            })?;
        let outcome = verify_descriptor(&fe_bytes, tag.ident, lsn);
        if outcome.mask.is_structurally_broken() {
            error!(lbn = lbn.0, findings = %outcome.mask, "file entry failed validation");
            self.file_findings.insert(ErrorMask::CRC);
            return Ok(FeStatus::Broken);
        }

        let fe = FileEntry::parse(&fe_bytes).map_err(UdfckError::Parse)?;

        if fe.kind == FileEntryKind::Efe && self.found.min_udf_read_rev < 0x0200 {
            debug!("extended file entry raises minimum UDF read revision to 2.00");
            self.found.min_udf_read_rev = 0x0200;
        }

        self.reconcile_fe_serial(&fe, offset)?;
        self.note_unique_id(fe.unique_id);

        if let Some(recorded) = self.lvid_recording_time {
            if fe.modification_time.is_later_than(&recorded) {
                warn!(lbn = lbn.0, "file modified after the LVID recording time");
                self.lvid_findings.insert(ErrorMask::TIMESTAMP);
            }
        }

        match fe.icb_tag.file_type {
            ICB_FILE_TYPE_DIRECTORY | ICB_FILE_TYPE_STREAMDIR => {
                self.found.num_dirs += 1;
                self.descend_directory(&fe, lbn, depth)?;
            }
            ICB_FILE_TYPE_REGULAR => {
                self.found.num_files += 1;
                self.account_file_contents(&fe, lbn)?;
            }
            other => {
                debug!(lbn = lbn.0, file_type = other, "special file");
                self.found.num_files += 1;
                self.account_file_contents(&fe, lbn)?;
            }
        }

        Ok(FeStatus::Ok)
    }

    fn read_file_entry_bytes(
        &self,
        sector: &[u8],
        offset: u64,
        ident: u16,
    ) -> Result<Vec<u8>> {
        let (lea_off, lad_off, fixed) = if ident == TAG_IDENT_EFE {
            (208, 212, udfck_ondisk::EFE_FIXED_SIZE)
        } else {
            (168, 172, udfck_ondisk::FE_FIXED_SIZE)
        };
        let lea = udfck_types::read_le_u32(sector, lea_off).unwrap_or(0) as usize;
        let lad = udfck_types::read_le_u32(sector, lad_off).unwrap_or(0) as usize;
        let total = fixed + lea + lad;
        if total <= sector.len() {
            return Ok(sector[..total.max(fixed)].to_vec());
        }
        let cap = self.geometry.sector_size.as_usize() * 16;
        self.medium.read_at(offset, total.min(cap))
    }

    fn account_file_contents(&mut self, fe: &FileEntry, lbn: Lbn) -> Result<()> {
        match fe.ad_kind() {
            ICB_FLAG_AD_IN_ICB => {
                // Contents are embedded in the entry itself.
                Ok(())
            }
            ICB_FLAG_AD_SHORT | ICB_FLAG_AD_LONG => {
                let extents = collect_extents(self.medium, &self.geometry, fe, &mut self.bitmap)?;
                for extent in &extents {
                    self.account_extent(extent);
                }
                Ok(())
            }
            ICB_FLAG_AD_EXTENDED => {
                warn!(lbn = lbn.0, "extended allocation descriptors on a file are unsupported");
                self.file_findings.insert(ErrorMask::WRONG_DESC);
                self.log.push(
                    format!("extended allocation descriptors at LBN {}", lbn.0),
                    FixOutcome::Uncorrectable,
                );
                Ok(())
            }
            other => {
                warn!(lbn = lbn.0, ad_kind = other, "unknown allocation descriptor kind");
                Ok(())
            }
        }
    }

    // ── Directories ─────────────────────────────────────────────────────

    fn descend_directory(&mut self, fe: &FileEntry, dir_lbn: Lbn, depth: usize) -> Result<()> {
        match fe.ad_kind() {
            ICB_FLAG_AD_IN_ICB => {
                let buffer = fe.alloc_descs.clone();
                self.scan_fids(&buffer, None, Some((dir_lbn, fe)), dir_lbn, depth)
            }
            ICB_FLAG_AD_SHORT | ICB_FLAG_AD_LONG | ICB_FLAG_AD_EXTENDED => {
                let extents = collect_extents(self.medium, &self.geometry, fe, &mut self.bitmap)?;
                for extent in &extents {
                    self.account_extent(extent);
                }
                let dir = DirBuffer::read(self.medium, &self.geometry, &extents)?;
                let bytes = dir.bytes.clone();
                self.scan_fids(&bytes, Some(&dir), None, dir_lbn, depth)
            }
            other => {
                warn!(dir = dir_lbn.0, ad_kind = other, "directory with unknown AD kind");
                Ok(())
            }
        }
    }

    /// Parse FIDs back-to-back out of a directory byte buffer.
    ///
    /// `dir` maps buffer offsets to medium offsets for extent-backed
    /// directories; `in_icb` names the owning FE for embedded ones.
    fn scan_fids(
        &mut self,
        buffer: &[u8],
        dir: Option<&DirBuffer>,
        in_icb: Option<(Lbn, &FileEntry)>,
        dir_lbn: Lbn,
        depth: usize,
    ) -> Result<()> {
        let mut pos = 0_usize;
        while pos + udfck_ondisk::FID_FIXED_SIZE <= buffer.len() {
            let slice = &buffer[pos..];
            if slice.iter().take(TAG_SIZE).all(|b| *b == 0) {
                break;
            }
            if !Tag::checksum_ok(slice) {
                error!(dir = dir_lbn.0, pos, "FID tag checksum failed, stopping directory");
                self.file_findings.insert(ErrorMask::CHECKSUM);
                break;
            }
            let tag = Tag::parse(slice).map_err(UdfckError::Parse)?;
            if tag.ident != TAG_IDENT_FID {
                warn!(dir = dir_lbn.0, pos, ident = tag.ident, "not a FID, stopping directory");
                break;
            }

            let fid = match Fid::parse(slice) {
                Ok(fid) => fid,
                Err(err) => {
                    error!(dir = dir_lbn.0, pos, %err, "FID does not parse, stopping directory");
                    self.file_findings.insert(ErrorMask::CRC);
                    break;
                }
            };
            let padded = fid.padded_len();
            if pos + padded > buffer.len() {
                error!(dir = dir_lbn.0, pos, "FID runs past the directory, stopping");
                self.file_findings.insert(ErrorMask::CRC);
                break;
            }

            // CRC covers the record and its padding, tag excluded.
            if crc16(&slice[TAG_SIZE..padded]) != tag.crc {
                error!(dir = dir_lbn.0, pos, "FID CRC failed, stopping directory");
                self.file_findings.insert(ErrorMask::CRC);
                break;
            }

            let site = match (dir, in_icb) {
                (Some(dir), _) => dir.abs_offset(pos, padded).map(|offset| FidSite::Extent {
                    offset,
                    padded_len: padded,
                }),
                (None, Some((fe_lbn, _))) => Some(FidSite::InIcb {
                    fe_lbn,
                    fid_offset: pos,
                }),
                (None, None) => None,
            };

            self.inspect_fid(&fid, site, in_icb.map(|(lbn, _)| lbn), dir_lbn, pos, depth)?;
            pos += padded;
        }
        Ok(())
    }

    fn inspect_fid(
        &mut self,
        fid: &Fid,
        site: Option<FidSite>,
        in_icb_fe: Option<Lbn>,
        dir_lbn: Lbn,
        pos: usize,
        depth: usize,
    ) -> Result<()> {
        if fid.is_deleted() {
            // Only the identifier is worth validating on a dead entry.
            if !fid.file_ident.is_empty()
                && !validate_dstring_loose(&fid.file_ident)
            {
                warn!(dir = dir_lbn.0, pos, "deleted FID carries a malformed identifier");
                self.file_findings.insert(ErrorMask::DSTRING);
            }
            return Ok(());
        }

        let target_lbn = fid.icb.ext_location.lbn();
        let name = decode_file_identifier(&fid.file_ident);

        // Parent links, self links and links back to the root are recorded
        // but never descended.
        let is_parent = fid.is_parent() || pos == 0;
        let is_self = target_lbn == dir_lbn;
        let is_root = target_lbn == self.geometry.root_lbn;

        self.reconcile_fid_serial(fid, site, in_icb_fe)?;

        let uuid = fid.icb.udf_unique_id();
        self.note_unique_id(u64::from(uuid));
        if uuid == 0 && !is_parent && self.found.min_udf_read_rev > 0x0200 {
            warn!(dir = dir_lbn.0, name = %name, "FID unique ID is zero");
            self.file_findings.insert(ErrorMask::UUID);
            if let (Some(site), true) = (site, self.policy.may_write()) {
                self.pending_unique_id_fixes.push(PendingUniqueIdFix {
                    site,
                    target_fe_lbn: target_lbn,
                });
            }
        }

        if is_parent || is_self || is_root {
            debug!(dir = dir_lbn.0, pos, "not descending (parent/self/root link)");
            return Ok(());
        }

        self.listing_push(fid, &name, depth);
        self.reconcile_fid_unique_id(fid, site, uuid, &name)?;
        self.account_icb(&fid.icb);

        let status = self.inspect_file_entry(target_lbn, depth + 1)?;
        if status == FeStatus::Broken {
            self.delete_dead_fid(fid, site, in_icb_fe, &name)?;
        }
        Ok(())
    }

    /// The FID's unique ID must agree with the target FE's. The FE is
    /// authoritative; a divergent FID is rewritten to match.
    fn reconcile_fid_unique_id(
        &mut self,
        fid: &Fid,
        site: Option<FidSite>,
        uuid: u32,
        name: &str,
    ) -> Result<()> {
        let Some(fe) = self.read_target_fe(fid) else {
            return Ok(());
        };
        let fe_uuid = fe.unique_id as u32;
        if uuid == fe_uuid {
            return Ok(());
        }
        warn!(
            name = %name,
            fid_uuid = uuid,
            fe_unique_id = fe.unique_id,
            "FID and FE unique IDs disagree"
        );
        self.file_findings.insert(ErrorMask::UUID);
        let site_name = format!("unique ID of \"{name}\"");
        if self.policy.decide(&site_name) != FixDecision::Apply {
            self.log.push(site_name, FixOutcome::Declined);
            return Ok(());
        }
        match site {
            Some(FidSite::Extent { offset, padded_len }) => {
                let bytes = self.medium.read_at(offset, padded_len)?;
                let mut patched = Fid::parse(&bytes).map_err(UdfckError::Parse)?;
                patched.icb.set_udf_unique_id(fe_uuid);
                let out = patched.serialize();
                self.medium.write_at(offset, &out)?;
                self.medium.sync_range(offset, out.len())?;
                self.log.push(site_name, FixOutcome::Applied);
            }
            Some(FidSite::InIcb { fe_lbn, fid_offset }) => {
                self.patch_in_icb_fid(fe_lbn, fid_offset, |fid| {
                    fid.icb.set_udf_unique_id(fe_uuid);
                })?;
                self.log.push(site_name, FixOutcome::Applied);
            }
            None => {
                self.log.push(site_name, FixOutcome::Uncorrectable);
            }
        }
        Ok(())
    }

    fn listing_push(&mut self, fid: &Fid, name: &str, depth: usize) {
        // The line needs the target FE's metadata; fetch lazily and fall
        // back to the FID alone when the target is unreadable.
        let entry = self
            .read_target_fe(fid)
            .map(|fe| ListingEntry::from_parts(fid, Some(&fe), name, depth))
            .unwrap_or_else(|| ListingEntry::from_parts(fid, None, name, depth));
        self.listing.push(format_entry(&entry));
    }

    fn read_target_fe(&self, fid: &Fid) -> Option<FileEntry> {
        let offset = self.geometry.lbn_to_offset(fid.icb.ext_location.lbn()).ok()?;
        let sector = self
            .medium
            .read_at(offset, self.geometry.sector_size.as_usize())
            .ok()?;
        FileEntry::parse(&sector).ok()
    }

    // ── In-place fixes ──────────────────────────────────────────────────

    fn reconcile_fe_serial(&mut self, fe: &FileEntry, fe_offset: u64) -> Result<()> {
        let Some(expected) = self.expected_serial else {
            return Ok(());
        };
        if fe.tag.serial == expected {
            return Ok(());
        }
        warn!(
            lsn = fe.tag.location,
            found = fe.tag.serial,
            expected,
            "FE tag serial diverges from the anchor"
        );
        let site = format!("FE tag serial at LSN {}", fe.tag.location);
        if self.policy.decide(&site) != FixDecision::Apply {
            self.log.push(site, FixOutcome::Declined);
            return Ok(());
        }
        rewrite_tag_serial(self.medium, fe_offset, expected)?;
        self.log.push(site, FixOutcome::Applied);
        Ok(())
    }

    fn reconcile_fid_serial(
        &mut self,
        fid: &Fid,
        site: Option<FidSite>,
        in_icb_fe: Option<Lbn>,
    ) -> Result<()> {
        let Some(expected) = self.expected_serial else {
            return Ok(());
        };
        if fid.tag.serial == expected {
            return Ok(());
        }
        warn!(found = fid.tag.serial, expected, "FID tag serial diverges from the anchor");
        let site_name = "FID tag serial";
        if self.policy.decide(site_name) != FixDecision::Apply {
            self.log.push(site_name, FixOutcome::Declined);
            return Ok(());
        }
        match site {
            Some(FidSite::Extent { offset, .. }) => {
                rewrite_tag_serial(self.medium, offset, expected)?;
                self.log.push(site_name, FixOutcome::Applied);
            }
            Some(FidSite::InIcb { fe_lbn, fid_offset }) => {
                let _ = in_icb_fe;
                self.patch_in_icb_fid(fe_lbn, fid_offset, |fid| {
                    fid.tag.serial = expected;
                })?;
                self.log.push(site_name, FixOutcome::Applied);
            }
            None => {
                self.log.push(site_name, FixOutcome::Uncorrectable);
            }
        }
        Ok(())
    }

    /// Mark a FID whose target is unrecoverable as deleted: set the deleted
    /// characteristic, clear the ICB, recompute CRC and checksum.
    fn delete_dead_fid(
        &mut self,
        fid: &Fid,
        site: Option<FidSite>,
        in_icb_fe: Option<Lbn>,
        name: &str,
    ) -> Result<()> {
        let _ = in_icb_fe;
        self.file_findings.insert(ErrorMask::WRONG_DESC);
        let site_name = format!("dead entry \"{name}\"");
        if self.policy.decide(&site_name) != FixDecision::Apply {
            self.log.push(site_name, FixOutcome::Declined);
            return Ok(());
        }
        // The entry's ICB blocks return to free space with it.
        let blocks = self
            .geometry
            .sector_size
            .blocks_for(u64::from(fid.icb.length_bytes())) as u32;
        if blocks > 0 {
            self.bitmap.mark_free(fid.icb.ext_location.lbn(), blocks);
        }
        match site {
            Some(FidSite::Extent { offset, padded_len }) => {
                let bytes = self.medium.read_at(offset, padded_len)?;
                let mut dead = Fid::parse(&bytes).map_err(UdfckError::Parse)?;
                dead.file_characteristics |= FID_CHAR_DELETED;
                dead.icb = LongAd::default();
                let out = dead.serialize();
                self.medium.write_at(offset, &out)?;
                self.medium.sync_range(offset, out.len())?;
                info!(name = %name, "dead directory entry marked deleted");
                self.log.push(site_name, FixOutcome::Applied);
            }
            Some(FidSite::InIcb { fe_lbn, fid_offset }) => {
                self.patch_in_icb_fid(fe_lbn, fid_offset, |fid| {
                    fid.file_characteristics |= FID_CHAR_DELETED;
                    fid.icb = LongAd::default();
                })?;
                info!(name = %name, "dead embedded entry marked deleted");
                self.log.push(site_name, FixOutcome::Applied);
            }
            None => {
                self.log.push(site_name, FixOutcome::Uncorrectable);
            }
        }
        Ok(())
    }

    /// Rewrite one FID inside an in-ICB directory. The FID bytes sit under
    /// the owning FE's CRC, so the whole entry is re-finalized and written.
    fn patch_in_icb_fid(
        &mut self,
        fe_lbn: Lbn,
        fid_offset: usize,
        mutate: impl FnOnce(&mut Fid),
    ) -> Result<()> {
        let offset = self.geometry.lbn_to_offset(fe_lbn)?;
        let sector = self
            .medium
            .read_at(offset, self.geometry.sector_size.as_usize())?;
        let tag = Tag::parse(&sector).map_err(UdfckError::Parse)?;
        let bytes = self.read_file_entry_bytes(&sector, offset, tag.ident)?;
        let mut fe = FileEntry::parse(&bytes).map_err(UdfckError::Parse)?;

        let mut fid = Fid::parse(&fe.alloc_descs[fid_offset..]).map_err(UdfckError::Parse)?;
        mutate(&mut fid);
        let patched = fid.serialize();
        fe.alloc_descs[fid_offset..fid_offset + patched.len()].copy_from_slice(&patched);

        let out = fe.serialize();
        self.medium.write_at(offset, &out)?;
        self.medium.sync_range(offset, out.len())?;
        Ok(())
    }

    /// Second pass of the unique-ID repair: assign fresh IDs starting past
    /// the maximum the walk observed, updating FID and target FE alike.
    pub fn apply_unique_id_fixes(&mut self) -> Result<u32> {
        if self.pending_unique_id_fixes.is_empty() {
            return Ok(0);
        }
        let mut next = self.found.next_unique_id().max(16);
        let mut applied = 0_u32;
        let fixes = std::mem::take(&mut self.pending_unique_id_fixes);

        for fix in fixes {
            let uuid = next as u32;
            match fix.site {
                FidSite::Extent { offset, padded_len } => {
                    let bytes = self.medium.read_at(offset, padded_len)?;
                    let mut fid = Fid::parse(&bytes).map_err(UdfckError::Parse)?;
                    fid.icb.set_udf_unique_id(uuid);
                    let out = fid.serialize();
                    self.medium.write_at(offset, &out)?;
                    self.medium.sync_range(offset, out.len())?;
                }
                FidSite::InIcb { fe_lbn, fid_offset } => {
                    self.patch_in_icb_fid(fe_lbn, fid_offset, |fid| {
                        fid.icb.set_udf_unique_id(uuid);
                    })?;
                }
            }
            self.rewrite_fe_unique_id(fix.target_fe_lbn, u64::from(uuid))?;
            info!(uuid, "unique ID assigned");
            self.log.push("FID unique ID", FixOutcome::Applied);
            self.note_unique_id(u64::from(uuid));
            next += 1;
            applied += 1;
        }
        Ok(applied)
    }

    fn rewrite_fe_unique_id(&mut self, fe_lbn: Lbn, unique_id: u64) -> Result<()> {
        let offset = self.geometry.lbn_to_offset(fe_lbn)?;
        let sector = self
            .medium
            .read_at(offset, self.geometry.sector_size.as_usize())?;
        let tag = Tag::parse(&sector).map_err(UdfckError::Parse)?;
        if tag.ident != TAG_IDENT_FE && tag.ident != TAG_IDENT_EFE {
            return Ok(());
        }
        let bytes = self.read_file_entry_bytes(&sector, offset, tag.ident)?;
        let mut fe = FileEntry::parse(&bytes).map_err(UdfckError::Parse)?;
        fe.unique_id = unique_id;
        let out = fe.serialize();
        self.medium.write_at(offset, &out)?;
        self.medium.sync_range(offset, out.len())?;
        Ok(())
    }
}

/// Light identifier validation for deleted entries: the compression ID must
/// still be a known one.
fn validate_dstring_loose(ident: &[u8]) -> bool {
    ident.is_empty() || matches!(ident.first(), Some(8 | 16 | 254 | 255))
}

/// Patch the serial number inside a descriptor tag and refresh the tag
/// checksum. The descriptor CRC excludes the tag, so it stays valid.
fn rewrite_tag_serial(medium: &Medium, offset: u64, serial: u16) -> Result<()> {
    let mut tag_bytes = medium.read_at(offset, TAG_SIZE)?;
    tag_bytes[6..8].copy_from_slice(&serial.to_le_bytes());
    tag_bytes[4] = Tag::compute_checksum(&tag_bytes);
    medium.write_at(offset, &tag_bytes)?;
    medium.sync_range(offset, TAG_SIZE)?;
    Ok(())
}
