#![forbid(unsafe_code)]
//! On-disk format parsing and serialization for ECMA-167 / OSTA UDF.
//!
//! Pure byte-slice crate, no I/O. Every descriptor is a value type with
//! `parse` over a byte range and, where the checker rewrites it, `serialize`
//! back into bytes. Validation (tag checksum, descriptor CRC, recorded
//! position) operates on the raw bytes before deserialization, so corrupt
//! input never has to parse.

pub mod ad;
pub mod file;
pub mod tag;
pub mod volume;

pub use ad::{ExtAd, ExtentAd, LbAddr, LongAd, ShortAd, EXT_AD_SIZE, LONG_AD_SIZE, SHORT_AD_SIZE};
pub use file::{
    Aed, Fid, FileEntry, FileEntryKind, FileSetDesc, IcbTag, SpaceBitmapDesc, AED_HEADER_SIZE,
    EFE_FIXED_SIZE, FE_FIXED_SIZE, FID_FIXED_SIZE, FSD_SIZE, SBD_HEADER_SIZE,
};
pub use tag::{
    crc16, decode_dstring, decode_file_identifier, encode_dstring, finalize_descriptor,
    retag_in_place, validate_dstring, verify_descriptor, RegId, Tag, Timestamp, VerifyOutcome,
};
pub use udfck_types::TAG_SIZE;
pub use volume::{
    Avdp, Iuvd, Lvd, Lvid, LvidImpUse, PartitionHeaderDesc, Pd, Pvd, Td, Usd, VolStructDesc,
    AVDP_SIZE, LVD_FIXED_SIZE, LVID_FIXED_SIZE, LVID_IMP_USE_FIXED_SIZE, PD_SIZE, PVD_SIZE,
    TD_SIZE, USD_FIXED_SIZE, VSD_SIZE, VSD_START_OFFSET,
};
