//! File-tree listing in the fixed output shape:
//! `<prefix><char-flags>:<perm-bits> <type> <timestamp> <size> "<name>"`.

use udfck_ondisk::{Fid, FileEntry, Timestamp};
use udfck_types::{
    FID_CHAR_DELETED, FID_CHAR_DIRECTORY, FID_CHAR_HIDDEN, FID_CHAR_METADATA, FID_CHAR_PARENT,
    ICB_FILE_TYPE_BLOCK, ICB_FILE_TYPE_CHAR, ICB_FILE_TYPE_DIRECTORY, ICB_FILE_TYPE_FIFO,
    ICB_FILE_TYPE_REGULAR, ICB_FILE_TYPE_SOCKET, ICB_FILE_TYPE_STREAMDIR, ICB_FILE_TYPE_SYMLINK,
};

/// Depth bound for the renderer; deeper chains are not descended.
pub const MAX_DEPTH: usize = 100;

/// One row of the tree listing.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub depth: usize,
    pub characteristics: u8,
    pub permissions: u32,
    pub file_type: Option<u8>,
    pub modification_time: Option<Timestamp>,
    pub size: Option<u64>,
    pub name: String,
}

impl ListingEntry {
    /// Build a row from a FID and, when readable, its target FE.
    #[must_use]
    pub fn from_parts(fid: &Fid, fe: Option<&FileEntry>, name: &str, depth: usize) -> Self {
        Self {
            depth,
            characteristics: fid.file_characteristics,
            permissions: fe.map_or(0, |fe| fe.permissions),
            file_type: fe.map(|fe| fe.icb_tag.file_type),
            modification_time: fe.map(|fe| fe.modification_time),
            size: fe.map(|fe| fe.information_length),
            name: name.to_owned(),
        }
    }
}

/// Box-drawing prefix keeping parent chains visually aligned.
#[must_use]
pub fn tree_prefix(depth: usize) -> String {
    let depth = depth.min(MAX_DEPTH);
    let mut prefix = String::new();
    for _ in 1..depth {
        prefix.push_str("│ ");
    }
    prefix.push_str("├─");
    prefix
}

fn char_flags(characteristics: u8) -> String {
    let flags = [
        (FID_CHAR_HIDDEN, 'h'),
        (FID_CHAR_DIRECTORY, 'd'),
        (FID_CHAR_DELETED, 'x'),
        (FID_CHAR_PARENT, 'p'),
        (FID_CHAR_METADATA, 'm'),
    ];
    flags
        .iter()
        .map(|(bit, c)| if characteristics & bit != 0 { *c } else { '-' })
        .collect()
}

fn type_name(file_type: Option<u8>) -> &'static str {
    match file_type {
        Some(ICB_FILE_TYPE_DIRECTORY) => "DIR",
        Some(ICB_FILE_TYPE_REGULAR) => "FILE",
        Some(ICB_FILE_TYPE_SYMLINK) => "LINK",
        Some(ICB_FILE_TYPE_FIFO) => "FIFO",
        Some(ICB_FILE_TYPE_SOCKET) => "SOCK",
        Some(ICB_FILE_TYPE_BLOCK) => "BLK",
        Some(ICB_FILE_TYPE_CHAR) => "CHR",
        Some(ICB_FILE_TYPE_STREAMDIR) => "SDIR",
        Some(_) => "OTH",
        None => "????",
    }
}

fn format_time(ts: Option<&Timestamp>) -> String {
    match ts {
        Some(ts) => format!(
            "{:04}-{:02}-{:02} {:02}:{:02}",
            ts.year, ts.month, ts.day, ts.hour, ts.minute
        ),
        None => "????-??-?? ??:??".to_owned(),
    }
}

/// Render one listing row.
#[must_use]
pub fn format_entry(entry: &ListingEntry) -> String {
    format!(
        "{}{}:{:04o} {:<4} {} {:>8} \"{}\"",
        tree_prefix(entry.depth),
        char_flags(entry.characteristics),
        entry.permissions & 0o7777,
        type_name(entry.file_type),
        format_time(entry.modification_time.as_ref()),
        entry.size.unwrap_or(0),
        entry.name
    )
}
