#![forbid(unsafe_code)]
//! Partition space accounting.
//!
//! A derived per-block bitmap is built from the file-tree walk and compared
//! against the two recorded views: the Space Bitmap Descriptor and the LVID
//! counter tables. The bitmap uses SBD polarity (bit set = free) so the final
//! comparison is byte-for-byte.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use udfck_ondisk::{Lvid, SpaceBitmapDesc};
use udfck_types::Lbn;

// ── Derived partition bitmap ────────────────────────────────────────────────

/// Heap-allocated mirror of the SBD bitmap, initialized all-free.
#[derive(Debug, Clone)]
pub struct PartitionBitmap {
    bytes: Vec<u8>,
    num_bits: u32,
    double_marks: u64,
    double_unmarks: u64,
    first_double_mark: Option<Lbn>,
    out_of_range: u64,
}

impl PartitionBitmap {
    /// All bits free, sized for a partition of `partition_length` blocks.
    #[must_use]
    pub fn new_all_free(partition_length: u32) -> Self {
        let num_bytes = (partition_length as usize).div_ceil(8);
        let mut bytes = vec![0xFF_u8; num_bytes];
        // Trailing bits past the partition length stay clear so the byte
        // image matches an SBD of the same geometry.
        let tail = partition_length % 8;
        if tail != 0 {
            if let Some(last) = bytes.last_mut() {
                *last = (1_u8 << tail) - 1;
            }
        }
        Self {
            bytes,
            num_bits: partition_length,
            double_marks: 0,
            double_unmarks: 0,
            first_double_mark: None,
            out_of_range: 0,
        }
    }

    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn is_free(&self, lbn: Lbn) -> bool {
        if lbn.0 >= self.num_bits {
            return false;
        }
        let byte = (lbn.0 / 8) as usize;
        let bit = lbn.0 % 8;
        self.bytes[byte] >> bit & 1 == 1
    }

    /// Clear `count` consecutive free bits starting at `lbn` (mark used).
    /// Marking an already-used block is counted, not fatal.
    pub fn mark_used(&mut self, lbn: Lbn, count: u32) {
        for i in 0..count {
            let Some(block) = lbn.checked_add(i) else {
                self.out_of_range += 1;
                continue;
            };
            if block.0 >= self.num_bits {
                self.out_of_range += 1;
                continue;
            }
            let byte = (block.0 / 8) as usize;
            let bit = block.0 % 8;
            if self.bytes[byte] >> bit & 1 == 0 {
                self.double_marks += 1;
                if self.first_double_mark.is_none() {
                    warn!(lbn = block.0, "block marked used twice");
                    self.first_double_mark = Some(block);
                }
            }
            self.bytes[byte] &= !(1 << bit);
        }
    }

    /// Set `count` consecutive bits starting at `lbn` (mark free again).
    pub fn mark_free(&mut self, lbn: Lbn, count: u32) {
        for i in 0..count {
            let Some(block) = lbn.checked_add(i) else {
                self.out_of_range += 1;
                continue;
            };
            if block.0 >= self.num_bits {
                self.out_of_range += 1;
                continue;
            }
            let byte = (block.0 / 8) as usize;
            let bit = block.0 % 8;
            if self.bytes[byte] >> bit & 1 == 1 {
                self.double_unmarks += 1;
                warn!(lbn = block.0, "block marked free twice");
            }
            self.bytes[byte] |= 1 << bit;
        }
    }

    /// Free (set) bits within the partition length.
    #[must_use]
    pub fn count_free(&self) -> u32 {
        let full_bytes = (self.num_bits / 8) as usize;
        let mut free: u32 = self
            .bytes
            .iter()
            .take(full_bytes)
            .map(|b| b.count_ones())
            .sum();
        let tail = self.num_bits % 8;
        if tail != 0 {
            let byte = self.bytes[full_bytes];
            for bit in 0..tail {
                free += u32::from(byte >> bit & 1);
            }
        }
        free
    }

    #[must_use]
    pub fn double_marks(&self) -> u64 {
        self.double_marks
    }

    #[must_use]
    pub fn double_unmarks(&self) -> u64 {
        self.double_unmarks
    }

    #[must_use]
    pub fn first_double_mark(&self) -> Option<Lbn> {
        self.first_double_mark
    }

    #[must_use]
    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }
}

// ── Counter triples ─────────────────────────────────────────────────────────

/// Recorded side from the LVID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LvidCounters {
    pub free_space_blocks: u32,
    pub size_blocks: u32,
    pub num_files: u32,
    pub num_dirs: u32,
    pub next_unique_id: u64,
    pub min_udf_read_rev: u16,
    pub min_udf_write_rev: u16,
    pub max_udf_write_rev: u16,
}

impl LvidCounters {
    /// Extract the partition-0 view of a parsed LVID.
    #[must_use]
    pub fn from_lvid(lvid: &Lvid) -> Self {
        Self {
            free_space_blocks: lvid.free_space_table.first().copied().unwrap_or(0),
            size_blocks: lvid.size_table.first().copied().unwrap_or(0),
            num_files: lvid.imp_use.num_files,
            num_dirs: lvid.imp_use.num_dirs,
            next_unique_id: lvid.next_unique_id,
            min_udf_read_rev: lvid.imp_use.min_udf_read_rev,
            min_udf_write_rev: lvid.imp_use.min_udf_write_rev,
            max_udf_write_rev: lvid.imp_use.max_udf_write_rev,
        }
    }
}

/// Recorded side from the Space Bitmap Descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SbdCounters {
    pub num_bits: u32,
    pub num_bytes: u32,
    pub free_bits: u32,
}

impl SbdCounters {
    #[must_use]
    pub fn from_sbd(sbd: &SpaceBitmapDesc) -> Self {
        let mut probe = PartitionBitmap::new_all_free(sbd.num_bits);
        let n = probe.bytes.len().min(sbd.bitmap.len());
        probe.bytes[..n].copy_from_slice(&sbd.bitmap[..n]);
        Self {
            num_bits: sbd.num_bits,
            num_bytes: sbd.num_bytes,
            free_bits: probe.count_free(),
        }
    }
}

/// Derived side, accumulated by the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FoundCounters {
    pub num_files: u32,
    pub num_dirs: u32,
    /// Maximum unique ID observed across FIDs and FEs.
    pub max_unique_id: u64,
    /// Blocks accounted from allocated-but-unrecorded extents. Counted as
    /// used, reported separately because that choice under-counts free space.
    pub type1_blocks: u64,
    pub min_udf_read_rev: u16,
    pub min_udf_write_rev: u16,
    pub max_udf_write_rev: u16,
}

impl FoundCounters {
    /// The next unique ID a rebuild should hand out.
    #[must_use]
    pub fn next_unique_id(&self) -> u64 {
        self.max_unique_id + 1
    }
}

// ── Reconciliation ──────────────────────────────────────────────────────────

/// Outcome of comparing the derived bitmap and counts against both recorded
/// views. Drives the LVID and SBD repairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub free_blocks_found: u32,
    pub free_blocks_lvid: Option<u32>,
    pub free_blocks_sbd: Option<u32>,
    pub files_found: u32,
    pub dirs_found: u32,
    /// SBD bit count differs from the partition length.
    pub sbd_geometry_mismatch: bool,
    /// Byte-for-byte result against the recorded SBD bitmap.
    pub bitmap_matches: Option<bool>,
    pub needs_lvid_update: bool,
    pub needs_sbd_update: bool,
}

/// Compare the walk results against the recorded LVID and SBD.
#[must_use]
pub fn reconcile(
    bitmap: &PartitionBitmap,
    found: &FoundCounters,
    lvid: Option<&LvidCounters>,
    sbd: Option<&SpaceBitmapDesc>,
) -> Reconciliation {
    let free_found = bitmap.count_free();

    let sbd_geometry_mismatch = sbd.is_some_and(|s| {
        s.num_bits != bitmap.num_bits() || s.num_bytes as usize != s.bitmap.len()
    });
    let bitmap_matches = sbd.map(|s| s.bitmap == bitmap.as_bytes());
    let free_blocks_sbd = sbd.map(|s| SbdCounters::from_sbd(s).free_bits);

    let lvid_matches = lvid.is_some_and(|l| {
        l.free_space_blocks == free_found
            && l.num_files == found.num_files
            && l.num_dirs == found.num_dirs
            && l.next_unique_id > found.max_unique_id
    });

    let needs_sbd_update = sbd_geometry_mismatch || bitmap_matches == Some(false);
    let needs_lvid_update = lvid.is_none() || !lvid_matches;

    let report = Reconciliation {
        free_blocks_found: free_found,
        free_blocks_lvid: lvid.map(|l| l.free_space_blocks),
        free_blocks_sbd,
        files_found: found.num_files,
        dirs_found: found.num_dirs,
        sbd_geometry_mismatch,
        bitmap_matches,
        needs_lvid_update,
        needs_sbd_update,
    };
    debug!(?report, "space reconciliation");
    report
}
