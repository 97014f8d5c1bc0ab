#![forbid(unsafe_code)]
//! Check-run orchestration.
//!
//! One `run_check` drives the whole pipeline in its fixed order: open the
//! medium, recognize the volume, find the anchors and sector size, load and
//! verify both VDS copies, load LVID and FSD, walk the stream and root
//! trees into the space accounting, reconcile, then hand every divergence
//! to the repair driver. The outcome is a serializable `CheckReport` whose
//! exit status folds every finding into the fsck-style bits.

use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};
use udfck_error::{ExitStatus, Result, UdfckError};
use udfck_media::{AccessMode, Medium};
use udfck_ondisk::SpaceBitmapDesc;
use udfck_repair::{
    fix_avdp, fix_lvid, fix_pd, fix_vds, Prompter, RepairLog, RepairMode, RepairPolicy,
};
use udfck_space::{reconcile, FoundCounters, LvidCounters, Reconciliation};
use udfck_types::{descriptor_name, ErrorMask, Lbn, Lsn, SectorSize, TAG_IDENT_SBD};
use udfck_volume::{
    detect_sector_size, load_fsd, load_lvid, load_vds, locate_avdps, probe_vrs, verify_vds,
    AnchorSet, AvdpSlot, Vds, VDS_KINDS,
};
use udfck_walk::{WalkGeometry, Walker};

// ── Options ─────────────────────────────────────────────────────────────────

/// Immutable configuration for one run, threaded through every phase.
#[derive(Debug)]
pub struct CheckOptions {
    pub mode: RepairMode,
    /// Forced sector size (`-b`); detection runs when absent.
    pub force_sector_size: Option<u32>,
    /// Emit the per-entry tree listing.
    pub listing: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            mode: RepairMode::CheckOnly,
            force_sector_size: None,
            listing: true,
        }
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

/// Findings for one VDS slot, for the report.
#[derive(Debug, Clone, Serialize)]
pub struct VdsFinding {
    pub copy: &'static str,
    pub descriptor: &'static str,
    pub findings: ErrorMask,
}

/// Everything a run learned and did.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub sector_size: u32,
    pub min_udf_revision: u16,
    pub partition_blocks: u32,
    pub found: FoundCounters,
    pub found_free_blocks: u32,
    pub recorded_lvid: Option<LvidCounters>,
    pub lvid_findings: ErrorMask,
    pub file_findings: ErrorMask,
    pub vds_findings: Vec<VdsFinding>,
    pub reconciliation: Option<Reconciliation>,
    pub fixes: RepairLog,
    pub listing: Vec<String>,
    pub exit_code: i32,
}

impl CheckReport {
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus(self.exit_code as u8)
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

fn build_policy(mode: RepairMode, prompter: Option<Box<dyn Prompter>>) -> RepairPolicy {
    match (mode, prompter) {
        (RepairMode::Interactive, Some(prompter)) => RepairPolicy::interactive(prompter),
        (RepairMode::Interactive, None) => {
            warn!("interactive mode without a prompter, treating as check-only");
            RepairPolicy::check_only()
        }
        (RepairMode::AutoFix, _) => RepairPolicy::autofix(),
        (RepairMode::CheckOnly, _) => RepairPolicy::check_only(),
    }
}

fn resolve_anchors(
    medium: &Medium,
    options: &CheckOptions,
) -> Result<AnchorSet> {
    match options.force_sector_size {
        Some(forced) => {
            let sector_size = SectorSize::new(forced)
                .map_err(|_| UdfckError::Usage(format!("invalid sector size {forced}")))?;
            locate_avdps(medium, sector_size).map_err(|_| {
                UdfckError::Usage(format!("no anchor at forced sector size {forced}"))
            })
        }
        None => detect_sector_size(medium),
    }
}

/// Read the recorded Space Bitmap Descriptor named by the partition header.
fn read_recorded_sbd(
    medium: &Medium,
    sector_size: SectorSize,
    header: &udfck_ondisk::PartitionHeaderDesc,
    partition_start: Lsn,
) -> Option<SpaceBitmapDesc> {
    let ad = header.unalloc_space_bitmap;
    if ad.length_bytes() == 0 {
        return None;
    }
    let lsn = Lbn(ad.ext_position).to_lsn(partition_start)?;
    let offset = lsn.to_byte_offset(sector_size)?;
    let bytes = medium.read_at(offset, ad.length_bytes() as usize).ok()?;
    let outcome = udfck_ondisk::verify_descriptor(&bytes, TAG_IDENT_SBD, lsn);
    if outcome.mask.is_structurally_broken() {
        warn!(lsn = lsn.0, findings = %outcome.mask, "recorded space bitmap is broken");
        return None;
    }
    SpaceBitmapDesc::parse(&bytes).ok()
}

fn collect_vds_findings(vds: &Vds) -> Vec<VdsFinding> {
    let mut findings = Vec::new();
    for (copy, descs) in [("main", &vds.main), ("reserve", &vds.reserve)] {
        for ident in VDS_KINDS {
            let mask = descs.mask_for(ident);
            if !mask.is_empty() {
                findings.push(VdsFinding {
                    copy,
                    descriptor: descriptor_name(ident),
                    findings: mask,
                });
            }
        }
    }
    findings
}

/// Run a full consistency check against the medium at `path`.
pub fn run_check(
    path: &Path,
    options: &CheckOptions,
    prompter: Option<Box<dyn Prompter>>,
) -> Result<CheckReport> {
    let mut policy = build_policy(options.mode, prompter);
    let mut log = RepairLog::default();
    let mut exit = ExitStatus::OK;

    let access = if policy.may_write() {
        AccessMode::ReadWrite
    } else {
        AccessMode::ReadOnly
    };
    let medium = Medium::open(path, access)?;

    // Phase 1: recognition and anchors.
    let vrs = probe_vrs(&medium)?;
    let mut min_udf_revision = vrs.min_udf_revision;
    let anchors = resolve_anchors(&medium, options)?;
    let sector_size = anchors.sector_size;
    let (_, avdp) = anchors
        .preferred()
        .ok_or(UdfckError::NotUdf("every anchor is broken".into()))?;
    let avdp = avdp.clone();

    // Phase 2: volume descriptor sequences.
    let mut vds = load_vds(&medium, &avdp, sector_size)?;
    verify_vds(&mut vds);
    let vds_findings = collect_vds_findings(&vds);

    // Phases 3..5 need a trustworthy LVD and PD; when neither copy offers
    // one the walk is impossible and the run degrades to VDS repair alone.
    let resolved = match (vds.lvd(), vds.pd()) {
        (Ok(lvd), Ok(pd)) => Some((lvd.clone(), pd.clone())),
        (lvd, pd) => {
            if let Err(err) = lvd {
                warn!(%err, "no usable LVD");
            }
            if let Err(err) = pd {
                warn!(%err, "no usable PD");
            }
            None
        }
    };

    let mut found = FoundCounters::default();
    let mut found_free_blocks = 0;
    let mut recorded_lvid = None;
    let mut lvid_findings = ErrorMask::empty();
    let mut file_findings = ErrorMask::empty();
    let mut volume_open = false;
    let mut reconciliation = None;
    let mut listing = Vec::new();
    let mut partition_blocks = 0;

    if let Some((lvd, pd)) = resolved {
        if lvd.logical_block_size != sector_size.get() {
            warn!(
                logical_block_size = lvd.logical_block_size,
                sector_size = sector_size.get(),
                "logical block size differs from the medium sector size"
            );
            exit.merge(ExitStatus::UNCORRECTED);
        }

        // Phase 3: integrity and file set.
        let lvid_info = load_lvid(&medium, &lvd, sector_size)?;
        lvid_findings.insert(lvid_info.mask);
        volume_open = lvid_info.lvid.is_some() && !lvid_info.is_closed();
        if volume_open {
            warn!("logical volume was not closed cleanly");
        }
        recorded_lvid = lvid_info.lvid.as_ref().map(LvidCounters::from_lvid);

        let fileset = load_fsd(&medium, &lvd, &pd, sector_size)?;
        partition_blocks = pd.partition_length;

        // Phase 4: the walk, stream directory first.
        let geometry = WalkGeometry {
            sector_size,
            partition_start: fileset.partition_start,
            partition_length: pd.partition_length,
            root_lbn: fileset.root_icb().ext_location.lbn(),
        };
        let lvid_time = lvid_info.lvid.as_ref().map(|l| l.recording_time);
        // The recorded minimum read revision participates in the walk's
        // unique-ID policy; the walk may raise it further (EFE presence).
        let seed_revision = min_udf_revision
            .max(recorded_lvid.map_or(0, |l| l.min_udf_read_rev));
        let mut walker = Walker::new(
            &medium,
            geometry,
            anchors.expected_serial,
            lvid_time,
            seed_revision,
            &mut policy,
            &mut log,
        );

        // Partition metadata outside the tree: the FSD extent and the
        // recorded space bitmap occupy partition blocks too.
        let fsd_ad = lvd.fsd_location().map_err(UdfckError::Parse)?;
        walker.bitmap.mark_used(
            fsd_ad.ext_location.lbn(),
            sector_size.blocks_for(u64::from(fsd_ad.length_bytes())) as u32,
        );
        let header = pd.partition_header().map_err(UdfckError::Parse)?;
        if header.unalloc_space_bitmap.length_bytes() > 0 {
            walker.bitmap.mark_used(
                Lbn(header.unalloc_space_bitmap.ext_position),
                sector_size.blocks_for(u64::from(header.unalloc_space_bitmap.length_bytes()))
                    as u32,
            );
        }

        if let Some(stream_icb) = fileset.stream_icb() {
            info!("walking stream directory tree");
            walker.walk_tree(stream_icb)?;
        }
        info!("walking root directory tree");
        walker.walk_tree(fileset.root_icb())?;
        walker.apply_unique_id_fixes()?;

        found = walker.found;
        found_free_blocks = walker.bitmap.count_free();
        lvid_findings.insert(walker.lvid_findings);
        file_findings = walker.file_findings;
        if options.listing {
            listing = std::mem::take(&mut walker.listing);
        }
        min_udf_revision = min_udf_revision.max(walker.found.min_udf_read_rev);
        let bitmap = walker.bitmap;

        // Phase 5: reconciliation.
        let recorded_sbd = read_recorded_sbd(&medium, sector_size, &header, fileset.partition_start);
        let recon = reconcile(&bitmap, &found, recorded_lvid.as_ref(), recorded_sbd.as_ref());

        // Phase 6: repairs, in the order the medium depends on them.
        fix_vds(&medium, sector_size, &vds, &mut policy, &mut log)?;
        for slot in AvdpSlot::ALL {
            if anchors.avdps[slot.index()].is_some() {
                fix_avdp(&medium, sector_size, slot, &mut policy, &mut log)?;
            }
        }

        let lvid_needs_fix = !lvid_findings.is_empty() || recon.needs_lvid_update || volume_open;
        if lvid_needs_fix {
            fix_lvid(
                &medium,
                sector_size,
                &lvid_info,
                &found,
                recon.free_blocks_found,
                pd.partition_length,
                anchors.expected_serial.unwrap_or(0),
                min_udf_revision,
                &mut policy,
                &mut log,
            )?;
        }

        if recon.needs_sbd_update {
            if recon.sbd_geometry_mismatch {
                lvid_findings.insert(ErrorMask::FREE_SPACE);
            }
            fix_pd(
                &medium,
                sector_size,
                &header,
                fileset.partition_start,
                bitmap.as_bytes(),
                pd.partition_length,
                &mut policy,
                &mut log,
            )?;
        }

        reconciliation = Some(recon);
    } else {
        // Still try to restore the broken sequence from its twin.
        fix_vds(&medium, sector_size, &vds, &mut policy, &mut log)?;
        exit.merge(ExitStatus::UNCORRECTED);
    }

    if policy.may_write() {
        medium.sync_all()?;
    }

    // Fold findings into the exit bits. In write-enabled modes the repair
    // log already says what was applied, declined or beyond help; in
    // check-only mode every finding is by definition unfixed.
    if log.any_applied() {
        exit.merge(ExitStatus::CORRECTED);
    }
    if log.any_unfixed() {
        exit.merge(ExitStatus::UNCORRECTED);
    }
    let findings_present = !vds_findings.is_empty()
        || !lvid_findings.is_empty()
        || !file_findings.is_empty()
        || volume_open
        || reconciliation
            .as_ref()
            .is_some_and(|r| r.needs_lvid_update || r.needs_sbd_update);
    if findings_present && !policy.may_write() {
        exit.merge(ExitStatus::UNCORRECTED);
    }

    let report = CheckReport {
        sector_size: sector_size.get(),
        min_udf_revision,
        partition_blocks,
        found,
        found_free_blocks,
        recorded_lvid,
        lvid_findings,
        file_findings,
        vds_findings,
        reconciliation,
        fixes: log,
        listing,
        exit_code: exit.code(),
    };
    info!(exit = %exit, files = found.num_files, dirs = found.num_dirs, "check finished");
    Ok(report)
}

/// Map a pipeline error to the exit status the process should carry.
#[must_use]
pub fn error_exit_status(err: &UdfckError) -> ExitStatus {
    err.exit_class()
}
