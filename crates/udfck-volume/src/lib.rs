#![forbid(unsafe_code)]
//! Volume descriptor engine.
//!
//! Locates and validates the fixed set of UDF volume-level structures: the
//! Volume Recognition Sequence, the Anchor Volume Descriptor Pointers, both
//! copies of the Volume Descriptor Sequence, the Logical Volume Integrity
//! Descriptor and the File Set Descriptor. Validation findings accumulate
//! into per-slot error masks; loading keeps going wherever the redundancy
//! model allows a later repair.

pub mod fileset;
pub mod integrity;
pub mod probe;
pub mod vds;

pub use fileset::{load_fsd, FilesetInfo};
pub use integrity::{load_lvid, LvidInfo};
pub use probe::{
    avdp_byte_offset, detect_sector_size, locate_avdps, probe_vrs, AnchorSet, AvdpSlot, VrsInfo,
};
pub use vds::{load_vds, verify_vds, Vds, VdsCopy, VdsDescriptors, VdsSlot, VDS_KINDS};
