//! Volume recognition and anchor discovery.
//!
//! The VRS scan establishes that the medium is UDF at all and pins the
//! minimum UDF revision from the NSR descriptor generation. Sector-size
//! detection then trials each candidate size until an AVDP validates at one
//! of its well-known positions.

use tracing::{debug, info, warn};
use udfck_error::{Result, UdfckError};
use udfck_media::Medium;
use udfck_ondisk::{verify_descriptor, Avdp, VolStructDesc, AVDP_SIZE, VSD_SIZE, VSD_START_OFFSET};
use udfck_types::{ErrorMask, Lsn, SectorSize, TAG_IDENT_AVDP};

/// Upper bound on recognition sectors scanned before giving up.
const VRS_MAX_DESCRIPTORS: u64 = 64;

/// Result of the Volume Recognition Sequence scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VrsInfo {
    /// 2 for NSR02, 3 for NSR03.
    pub nsr_generation: u8,
    /// 0x0100 for NSR02 media, 0x0200 for NSR03.
    pub min_udf_revision: u16,
}

/// Scan the Volume Recognition Sequence starting at byte 32768.
pub fn probe_vrs(medium: &Medium) -> Result<VrsInfo> {
    let mut in_extended_area = false;
    let mut nsr: Option<u8> = None;

    for index in 0..VRS_MAX_DESCRIPTORS {
        let offset = VSD_START_OFFSET + index * VSD_SIZE as u64;
        if offset + VSD_SIZE as u64 > medium.len_bytes() {
            break;
        }
        let bytes = medium.read_raw(offset, VSD_SIZE)?;
        let vsd = VolStructDesc::parse(&bytes)?;

        match &vsd.std_ident {
            ident if ident == VolStructDesc::BEA01 => {
                debug!(offset, "BEA01: extended area begins");
                in_extended_area = true;
            }
            ident if ident == VolStructDesc::TEA01 => {
                debug!(offset, "TEA01: extended area ends");
                in_extended_area = false;
                break;
            }
            ident if ident == VolStructDesc::NSR02 => {
                debug!(offset, "NSR02 found");
                nsr = Some(2);
            }
            ident if ident == VolStructDesc::NSR03 => {
                debug!(offset, "NSR03 found");
                nsr = Some(3);
            }
            ident if ident == VolStructDesc::BOOT2 => {
                if !in_extended_area {
                    return Err(UdfckError::NotUdf(
                        "BOOT2 descriptor outside the extended area".into(),
                    ));
                }
                debug!(offset, "BOOT2 inside extended area, skipping");
            }
            ident if ident == VolStructDesc::CDW02 => {
                return Err(UdfckError::NotUdf("CDW02 media are not supported".into()));
            }
            ident if ident == VolStructDesc::CD001 => {
                // ISO 9660 bridge sectors may precede the extended area.
                debug!(offset, "CD001 bridge descriptor, skipping");
            }
            _ => {
                // Unrecognized or empty sector ends the scan.
                break;
            }
        }
    }

    match nsr {
        Some(generation) => {
            let min_udf_revision = if generation == 3 { 0x0200 } else { 0x0100 };
            info!(generation, min_udf_revision, "volume recognition sequence accepted");
            Ok(VrsInfo {
                nsr_generation: generation,
                min_udf_revision,
            })
        }
        None => Err(UdfckError::NotUdf(
            "no NSR02/NSR03 descriptor in the recognition sequence".into(),
        )),
    }
}

// ── AVDP discovery ──────────────────────────────────────────────────────────

/// The three well-known anchor slots. The unclosed-disc position at sector
/// 512 is probed too but stored into the `First` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvdpSlot {
    First,
    Second,
    Third,
}

impl AvdpSlot {
    pub const ALL: [Self; 3] = [Self::First, Self::Second, Self::Third];

    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
            Self::Third => 2,
        }
    }
}

/// Byte offset of an anchor slot for a given geometry. `None` when the
/// medium is too small to carry the slot at all.
#[must_use]
pub fn avdp_byte_offset(slot: AvdpSlot, sector_size: SectorSize, medium_len: u64) -> Option<u64> {
    let ss = u64::from(sector_size.get());
    match slot {
        AvdpSlot::First => Some(256 * ss),
        AvdpSlot::Second => medium_len.checked_sub(ss),
        AvdpSlot::Third => medium_len.checked_sub(257 * ss),
    }
}

/// Byte offset of the unclosed-disc anchor position.
#[must_use]
pub fn avdp_unclosed_offset(sector_size: SectorSize) -> u64 {
    512 * u64::from(sector_size.get())
}

/// Anchors found on the medium, with per-slot findings.
#[derive(Debug, Clone)]
pub struct AnchorSet {
    pub sector_size: SectorSize,
    pub avdps: [Option<Avdp>; 3],
    pub masks: [ErrorMask; 3],
    /// Tag serial number shared by every located anchor; `None` once two
    /// anchors disagree, which disables serial-number repair downstream.
    pub expected_serial: Option<u16>,
}

impl AnchorSet {
    /// The first intact anchor, by slot order.
    #[must_use]
    pub fn preferred(&self) -> Option<(AvdpSlot, &Avdp)> {
        AvdpSlot::ALL.iter().find_map(|slot| {
            let i = slot.index();
            match (&self.avdps[i], self.masks[i].is_structurally_broken()) {
                (Some(avdp), false) => Some((*slot, avdp)),
                _ => None,
            }
        })
    }
}

fn probe_avdp_at(
    medium: &Medium,
    offset: u64,
    sector_size: SectorSize,
) -> Option<(Avdp, ErrorMask, bool)> {
    if offset % u64::from(sector_size.get()) != 0
        || offset + AVDP_SIZE as u64 > medium.len_bytes()
    {
        return None;
    }
    let bytes = medium.read_raw(offset, AVDP_SIZE).ok()?;
    let position = Lsn((offset / u64::from(sector_size.get())) as u32);
    let outcome = verify_descriptor(&bytes, TAG_IDENT_AVDP, position);
    // Checksum, identifier and CRC must hold for the bytes to count as an
    // anchor at all; a position mismatch alone is recorded and repairable.
    if outcome.mask.is_structurally_broken() {
        return None;
    }
    let avdp = Avdp::parse(&bytes).ok()?;
    Some((avdp, outcome.mask, outcome.short_crc))
}

/// Probe all four anchor positions at a known sector size.
pub fn locate_avdps(medium: &Medium, sector_size: SectorSize) -> Result<AnchorSet> {
    let mut set = AnchorSet {
        sector_size,
        avdps: [None, None, None],
        masks: [ErrorMask::empty(); 3],
        expected_serial: None,
    };
    let mut serials: Vec<u16> = Vec::new();

    for slot in AvdpSlot::ALL {
        let Some(offset) = avdp_byte_offset(slot, sector_size, medium.len_bytes()) else {
            continue;
        };
        if let Some((avdp, mask, short_crc)) = probe_avdp_at(medium, offset, sector_size) {
            if short_crc {
                warn!(slot = slot.index(), "AVDP declares a short CRC length, accepted");
            }
            debug!(slot = slot.index(), lsn = avdp.tag.location, mask = %mask, "AVDP located");
            serials.push(avdp.tag.serial);
            set.masks[slot.index()] = mask;
            set.avdps[slot.index()] = Some(avdp);
        }
    }

    // Unclosed media record their anchor at sector 512; adopt it into the
    // first slot when nothing else claimed it.
    if set.avdps[AvdpSlot::First.index()].is_none() {
        let offset = avdp_unclosed_offset(sector_size);
        if let Some((avdp, mask, _)) = probe_avdp_at(medium, offset, sector_size) {
            warn!("AVDP found at the unclosed-disc position, treating as first anchor");
            serials.push(avdp.tag.serial);
            set.masks[AvdpSlot::First.index()] = mask;
            set.avdps[AvdpSlot::First.index()] = Some(avdp);
        }
    }

    if set.avdps.iter().all(Option::is_none) {
        return Err(UdfckError::NotUdf(format!(
            "no anchor volume descriptor pointer at sector size {sector_size}"
        )));
    }

    if serials.windows(2).all(|w| w[0] == w[1]) {
        set.expected_serial = serials.first().copied();
    } else {
        warn!(?serials, "AVDP tag serial numbers diverge, serial repair disabled");
    }

    Ok(set)
}

/// Trial each candidate sector size until an anchor validates.
pub fn detect_sector_size(medium: &Medium) -> Result<AnchorSet> {
    for candidate in SectorSize::PROBE_ORDER {
        let sector_size = SectorSize::new(candidate).map_err(UdfckError::Parse)?;
        match locate_avdps(medium, sector_size) {
            // Detection demands one anchor whose recorded position also
            // matches, so a mis-sized trial cannot alias into acceptance.
            Ok(set)
                if set
                    .avdps
                    .iter()
                    .zip(set.masks.iter())
                    .any(|(avdp, mask)| avdp.is_some() && mask.is_empty()) =>
            {
                info!(%sector_size, "sector size detected");
                return Ok(set);
            }
            Ok(_) | Err(_) => {
                debug!(%sector_size, "no clean anchor at this sector size");
            }
        }
    }
    Err(UdfckError::NotUdf(
        "no anchor found at any candidate sector size".into(),
    ))
}
