//! Volume Descriptor Sequence loading, validation and main/reserve selection.

use tracing::{debug, error, info, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{
    validate_dstring, verify_descriptor, Avdp, Iuvd, Lvd, Pd, Pvd, Tag, Td, Usd, LVD_FIXED_SIZE,
    USD_FIXED_SIZE,
};
use udfck_types::{
    descriptor_name, ErrorMask, Lsn, SectorSize, TAG_IDENT_IUVD, TAG_IDENT_LVD, TAG_IDENT_PD,
    TAG_IDENT_PVD, TAG_IDENT_TD, TAG_IDENT_USD, TAG_SIZE,
};

/// A VDS is read sequentially for at most this many descriptors.
pub const VDS_MAX_DESCRIPTORS: u32 = 256;

/// The descriptor kinds a complete VDS carries, in reporting order.
pub const VDS_KINDS: [u16; 6] = [
    TAG_IDENT_PVD,
    TAG_IDENT_LVD,
    TAG_IDENT_PD,
    TAG_IDENT_USD,
    TAG_IDENT_IUVD,
    TAG_IDENT_TD,
];

/// Which copy of the sequence a descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VdsCopy {
    Main,
    Reserve,
}

impl VdsCopy {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Reserve => "reserve",
        }
    }
}

/// One loaded descriptor: its kind, where it was read, the raw bytes, and
/// the findings accumulated against it.
#[derive(Debug, Clone)]
pub struct VdsSlot {
    pub ident: u16,
    pub location: Lsn,
    pub raw: Vec<u8>,
    pub mask: ErrorMask,
}

/// Parsed descriptors of one VDS copy.
#[derive(Debug, Clone, Default)]
pub struct VdsDescriptors {
    pub pvd: Option<Pvd>,
    pub lvd: Option<Lvd>,
    pub pd: Option<Pd>,
    pub usd: Option<Usd>,
    pub iuvd: Option<Iuvd>,
    pub td: Option<Td>,
    pub slots: Vec<VdsSlot>,
}

impl VdsDescriptors {
    #[must_use]
    pub fn slot(&self, ident: u16) -> Option<&VdsSlot> {
        self.slots.iter().find(|s| s.ident == ident)
    }

    fn slot_mut(&mut self, ident: u16) -> Option<&mut VdsSlot> {
        self.slots.iter_mut().find(|s| s.ident == ident)
    }

    /// Findings for a descriptor kind; a kind that never loaded reports
    /// `WRONG_DESC`.
    #[must_use]
    pub fn mask_for(&self, ident: u16) -> ErrorMask {
        self.slot(ident)
            .map_or(ErrorMask::WRONG_DESC, |slot| slot.mask)
    }

    fn is_kind_set(&self, ident: u16) -> bool {
        match ident {
            TAG_IDENT_PVD => self.pvd.is_some(),
            TAG_IDENT_LVD => self.lvd.is_some(),
            TAG_IDENT_PD => self.pd.is_some(),
            TAG_IDENT_USD => self.usd.is_some(),
            TAG_IDENT_IUVD => self.iuvd.is_some(),
            TAG_IDENT_TD => self.td.is_some(),
            _ => false,
        }
    }
}

/// Both copies of the sequence.
#[derive(Debug, Clone, Default)]
pub struct Vds {
    pub main: VdsDescriptors,
    pub reserve: VdsDescriptors,
}

impl Vds {
    #[must_use]
    pub fn copy(&self, which: VdsCopy) -> &VdsDescriptors {
        match which {
            VdsCopy::Main => &self.main,
            VdsCopy::Reserve => &self.reserve,
        }
    }

    /// Select the copy to trust for one descriptor kind: main unless its
    /// checksum, CRC or identity is broken, else reserve on the same test.
    pub fn choose(&self, ident: u16) -> Result<VdsCopy> {
        if !self.main.mask_for(ident).is_structurally_broken() && self.main.is_kind_set(ident) {
            return Ok(VdsCopy::Main);
        }
        if !self.reserve.mask_for(ident).is_structurally_broken()
            && self.reserve.is_kind_set(ident)
        {
            return Ok(VdsCopy::Reserve);
        }
        Err(UdfckError::Corruption {
            what: descriptor_name(ident),
            lsn: self
                .main
                .slot(ident)
                .map_or(Lsn(0), |s| s.location),
            detail: "both VDS copies are unusable".into(),
        })
    }

    /// The trusted LVD.
    pub fn lvd(&self) -> Result<&Lvd> {
        let which = self.choose(TAG_IDENT_LVD)?;
        self.copy(which)
            .lvd
            .as_ref()
            .ok_or(UdfckError::DuplicateDescriptor("LVD missing"))
    }

    /// The trusted PD.
    pub fn pd(&self) -> Result<&Pd> {
        let which = self.choose(TAG_IDENT_PD)?;
        self.copy(which)
            .pd
            .as_ref()
            .ok_or(UdfckError::DuplicateDescriptor("PD missing"))
    }

    /// The trusted PVD.
    pub fn pvd(&self) -> Result<&Pvd> {
        let which = self.choose(TAG_IDENT_PVD)?;
        self.copy(which)
            .pvd
            .as_ref()
            .ok_or(UdfckError::DuplicateDescriptor("PVD missing"))
    }
}

// ── Loading ─────────────────────────────────────────────────────────────────

fn duplicate(name: &'static str) -> UdfckError {
    error!(descriptor = name, "descriptor appears twice in one VDS copy");
    UdfckError::DuplicateDescriptor(name)
}

/// Read the raw bytes of one descriptor, extending past the first sector for
/// the variable-length tails (LVD map table, USD allocation descriptors) and
/// honouring a declared CRC length that runs past the fixed size.
fn read_descriptor_bytes(
    medium: &Medium,
    lsn: Lsn,
    sector_size: SectorSize,
    tag: &Tag,
    fixed_total: usize,
) -> Result<Vec<u8>> {
    let declared = TAG_SIZE + usize::from(tag.crc_length);
    let wanted = fixed_total.max(declared);
    // A corrupt length field must not trigger an unbounded read.
    let cap = sector_size.as_usize() * 16;
    let length = wanted.min(cap);
    let offset = lsn
        .to_byte_offset(sector_size)
        .ok_or(UdfckError::OutOfBounds {
            offset: u64::MAX,
            length,
            medium_len: medium.len_bytes(),
        })?;
    medium.read_at(offset, length)
}

fn load_one_copy(
    medium: &Medium,
    start: Lsn,
    sector_size: SectorSize,
    which: VdsCopy,
) -> Result<VdsDescriptors> {
    let mut out = VdsDescriptors::default();

    for index in 0..VDS_MAX_DESCRIPTORS {
        let lsn = start
            .checked_add(index)
            .ok_or(UdfckError::NotUdf("VDS extent overflows the medium".into()))?;
        let sector = medium.read_sector(lsn, sector_size)?;
        let tag = Tag::parse(&sector).map_err(UdfckError::Parse)?;

        if tag.ident == 0 {
            debug!(copy = which.name(), lsn = lsn.0, "zero tag terminates VDS");
            break;
        }

        let raw;
        match tag.ident {
            TAG_IDENT_PVD => {
                if out.pvd.is_some() {
                    return Err(duplicate("PVD"));
                }
                raw = read_descriptor_bytes(medium, lsn, sector_size, &tag, 512)?;
                out.pvd = Pvd::parse(&raw).ok();
            }
            TAG_IDENT_LVD => {
                if out.lvd.is_some() {
                    return Err(duplicate("LVD"));
                }
                let map_len = udfck_types::read_le_u32(&sector, 264).unwrap_or(0) as usize;
                raw = read_descriptor_bytes(
                    medium,
                    lsn,
                    sector_size,
                    &tag,
                    LVD_FIXED_SIZE + map_len,
                )?;
                out.lvd = Lvd::parse(&raw).ok();
            }
            TAG_IDENT_PD => {
                if out.pd.is_some() {
                    return Err(duplicate("PD"));
                }
                raw = read_descriptor_bytes(medium, lsn, sector_size, &tag, 512)?;
                out.pd = Pd::parse(&raw).ok();
            }
            TAG_IDENT_USD => {
                if out.usd.is_some() {
                    return Err(duplicate("USD"));
                }
                let num = udfck_types::read_le_u32(&sector, 20).unwrap_or(0) as usize;
                raw = read_descriptor_bytes(
                    medium,
                    lsn,
                    sector_size,
                    &tag,
                    USD_FIXED_SIZE + num * 8,
                )?;
                out.usd = Usd::parse(&raw).ok();
            }
            TAG_IDENT_IUVD => {
                if out.iuvd.is_some() {
                    return Err(duplicate("IUVD"));
                }
                raw = read_descriptor_bytes(medium, lsn, sector_size, &tag, 512)?;
                out.iuvd = Iuvd::parse(&raw).ok();
            }
            TAG_IDENT_TD => {
                if out.td.is_some() {
                    return Err(duplicate("TD"));
                }
                raw = read_descriptor_bytes(medium, lsn, sector_size, &tag, 512)?;
                out.td = Td::parse(&raw).ok();
                out.slots.push(VdsSlot {
                    ident: tag.ident,
                    location: lsn,
                    raw,
                    mask: ErrorMask::empty(),
                });
                debug!(copy = which.name(), lsn = lsn.0, "TD terminates VDS");
                break;
            }
            other => {
                error!(copy = which.name(), lsn = lsn.0, ident = other, "unknown tag in VDS");
                return Err(UdfckError::UnknownDescriptor { ident: other, lsn });
            }
        }

        debug!(
            copy = which.name(),
            lsn = lsn.0,
            ident = descriptor_name(tag.ident),
            "descriptor loaded"
        );
        out.slots.push(VdsSlot {
            ident: tag.ident,
            location: lsn,
            raw,
            mask: ErrorMask::empty(),
        });
    }

    Ok(out)
}

/// Load both VDS copies addressed by an anchor.
pub fn load_vds(medium: &Medium, avdp: &Avdp, sector_size: SectorSize) -> Result<Vds> {
    let main_start = Lsn(avdp.main_vds_ext.location);
    let reserve_start = Lsn(avdp.reserve_vds_ext.location);
    info!(
        main = main_start.0,
        reserve = reserve_start.0,
        "loading volume descriptor sequences"
    );
    Ok(Vds {
        main: load_one_copy(medium, main_start, sector_size, VdsCopy::Main)?,
        reserve: load_one_copy(medium, reserve_start, sector_size, VdsCopy::Reserve)?,
    })
}

// ── Validation ──────────────────────────────────────────────────────────────

fn dstring_mask_for_slot(descs: &VdsDescriptors, ident: u16) -> bool {
    match ident {
        TAG_IDENT_PVD => descs.pvd.as_ref().is_some_and(|pvd| {
            !validate_dstring(&pvd.vol_ident).is_empty()
                || !validate_dstring(&pvd.vol_set_ident).is_empty()
        }),
        TAG_IDENT_LVD => descs
            .lvd
            .as_ref()
            .is_some_and(|lvd| !validate_dstring(&lvd.logical_vol_ident).is_empty()),
        _ => false,
    }
}

fn verify_one_copy(descs: &mut VdsDescriptors, which: VdsCopy) {
    for ident in VDS_KINDS {
        let Some(slot) = descs.slot(ident) else {
            warn!(copy = which.name(), descriptor = descriptor_name(ident), "kind missing from VDS");
            continue;
        };
        let outcome = verify_descriptor(&slot.raw, ident, slot.location);
        let mut mask = outcome.mask;
        if outcome.short_crc {
            warn!(
                copy = which.name(),
                descriptor = descriptor_name(ident),
                "short CRC length accepted"
            );
        }

        // Identifier fields are only meaningful once the structure validates.
        if !mask.is_structurally_broken() && dstring_mask_for_slot(descs, ident) {
            mask.insert(ErrorMask::DSTRING);
        }

        if !mask.is_empty() {
            warn!(
                copy = which.name(),
                descriptor = descriptor_name(ident),
                lsn = slot.location.0,
                findings = %mask,
                "descriptor validation failed"
            );
        }
        if let Some(slot) = descs.slot_mut(ident) {
            slot.mask = mask;
        }
    }
}

/// Validate every descriptor of both copies, populating the slot masks.
pub fn verify_vds(vds: &mut Vds) {
    verify_one_copy(&mut vds.main, VdsCopy::Main);
    verify_one_copy(&mut vds.reserve, VdsCopy::Reserve);
}
