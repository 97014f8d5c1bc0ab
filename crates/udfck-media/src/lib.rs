#![forbid(unsafe_code)]
//! Windowed medium access.
//!
//! The medium is divided into fixed-size chunks; a bounded set of chunks is
//! resident at a time. Reads and writes are byte-addressed and may span chunk
//! seams. Writes dirty the covering chunks and become durable on `sync`.
//! A medium opened read-only cannot be written through any path.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::{debug, error, trace, warn};
use udfck_error::{Result, UdfckError};
use udfck_types::{Lsn, SectorSize};

/// Default chunk size. Power of two within the sanctioned 64 KiB..16 MiB band.
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;

/// Resident-chunk cap before eviction kicks in.
const MAX_RESIDENT_CHUNKS: usize = 16;

/// How the medium was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug)]
struct Chunk {
    data: Vec<u8>,
    dirty: bool,
    /// Monotonic touch counter for LRU eviction.
    touched: u64,
}

#[derive(Debug, Default)]
struct ChunkCache {
    chunks: HashMap<u64, Chunk>,
    clock: u64,
}

/// A block device or image file, accessed through cached chunks.
#[derive(Debug)]
pub struct Medium {
    file: File,
    len: u64,
    mode: AccessMode,
    chunk_size: u64,
    cache: Mutex<ChunkCache>,
}

impl Medium {
    /// Open a device or image file.
    pub fn open(path: &Path, mode: AccessMode) -> Result<Self> {
        Self::open_with_chunk_size(path, mode, DEFAULT_CHUNK_SIZE)
    }

    /// Open with an explicit chunk size (power of two). Exposed so tests can
    /// exercise chunk seams with small media.
    pub fn open_with_chunk_size(path: &Path, mode: AccessMode, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 || !chunk_size.is_power_of_two() {
            return Err(UdfckError::Usage(format!(
                "chunk size {chunk_size} is not a power of two"
            )));
        }
        let file = match mode {
            AccessMode::ReadOnly => OpenOptions::new().read(true).open(path)?,
            AccessMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
        };
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, ?mode, "medium opened");
        Ok(Self {
            file,
            len,
            mode,
            chunk_size,
            cache: Mutex::new(ChunkCache::default()),
        })
    }

    #[must_use]
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.mode == AccessMode::ReadWrite
    }

    fn check_bounds(&self, offset: u64, length: usize) -> Result<()> {
        let end = offset.checked_add(length as u64);
        match end {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(UdfckError::OutOfBounds {
                offset,
                length,
                medium_len: self.len,
            }),
        }
    }

    fn chunk_len(&self, index: u64) -> usize {
        let start = index * self.chunk_size;
        let remaining = self.len.saturating_sub(start);
        remaining.min(self.chunk_size) as usize
    }

    /// Load a chunk into the cache if absent. Idempotent.
    fn with_chunk<R>(&self, index: u64, f: impl FnOnce(&mut Chunk) -> R) -> Result<R> {
        let mut cache = self.cache.lock();
        cache.clock += 1;
        let clock = cache.clock;

        if !cache.chunks.contains_key(&index) {
            if cache.chunks.len() >= MAX_RESIDENT_CHUNKS {
                self.evict_one(&mut cache)?;
            }
            let len = self.chunk_len(index);
            let mut data = vec![0_u8; len];
            self.file.read_exact_at(&mut data, index * self.chunk_size)?;
            trace!(chunk = index, len, "chunk mapped");
            cache.chunks.insert(
                index,
                Chunk {
                    data,
                    dirty: false,
                    touched: clock,
                },
            );
        }

        let chunk = cache
            .chunks
            .get_mut(&index)
            .ok_or_else(|| UdfckError::Corruption {
                what: "chunk cache",
                lsn: Lsn(0),
                detail: format!("chunk {index} vanished"),
            })?;
        chunk.touched = clock;
        Ok(f(chunk))
    }

    /// Flush and release the least-recently-touched chunk.
    fn evict_one(&self, cache: &mut ChunkCache) -> Result<()> {
        let Some((&victim, _)) = cache.chunks.iter().min_by_key(|(_, c)| c.touched) else {
            return Ok(());
        };
        if let Some(chunk) = cache.chunks.remove(&victim) {
            if chunk.dirty {
                self.file
                    .write_all_at(&chunk.data, victim * self.chunk_size)?;
                trace!(chunk = victim, "dirty chunk flushed on eviction");
            }
            trace!(chunk = victim, "chunk unmapped");
        }
        Ok(())
    }

    /// Read `length` bytes at `offset` through the chunk cache. Ranges that
    /// span chunk seams are assembled transparently.
    pub fn read_at(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, length)?;
        let mut out = vec![0_u8; length];
        let mut filled = 0_usize;

        while filled < length {
            let pos = offset + filled as u64;
            let index = pos / self.chunk_size;
            let within = (pos % self.chunk_size) as usize;
            let take = (length - filled).min(self.chunk_size as usize - within);
            self.with_chunk(index, |chunk| {
                out[filled..filled + take].copy_from_slice(&chunk.data[within..within + take]);
            })?;
            filled += take;
        }

        Ok(out)
    }

    /// One-off uncached read, bypassing the chunk cache. Used for probes that
    /// should not disturb residency.
    pub fn read_raw(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check_bounds(offset, length)?;
        let mut out = vec![0_u8; length];
        self.file.read_exact_at(&mut out, offset)?;
        Ok(out)
    }

    /// Read one sector.
    pub fn read_sector(&self, lsn: Lsn, sector_size: SectorSize) -> Result<Vec<u8>> {
        let offset = lsn
            .to_byte_offset(sector_size)
            .ok_or(UdfckError::OutOfBounds {
                offset: u64::MAX,
                length: sector_size.as_usize(),
                medium_len: self.len,
            })?;
        self.read_at(offset, sector_size.as_usize())
    }

    /// Write `bytes` at `offset` through the chunk cache, dirtying the
    /// covering chunks. Refused on a read-only medium.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if !self.is_writable() {
            return Err(UdfckError::ReadOnly(offset));
        }
        self.check_bounds(offset, bytes.len())?;
        let mut written = 0_usize;

        while written < bytes.len() {
            let pos = offset + written as u64;
            let index = pos / self.chunk_size;
            let within = (pos % self.chunk_size) as usize;
            let take = (bytes.len() - written).min(self.chunk_size as usize - within);
            self.with_chunk(index, |chunk| {
                chunk.data[within..within + take].copy_from_slice(&bytes[written..written + take]);
                chunk.dirty = true;
            })?;
            written += take;
        }

        trace!(offset, len = bytes.len(), "medium write staged");
        Ok(())
    }

    /// Flush dirty chunks overlapping `[offset, offset + length)`.
    pub fn sync_range(&self, offset: u64, length: usize) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        let first = offset / self.chunk_size;
        let last = (offset + length as u64 - 1) / self.chunk_size;
        let mut cache = self.cache.lock();
        for index in first..=last {
            if let Some(chunk) = cache.chunks.get_mut(&index) {
                if chunk.dirty {
                    self.file
                        .write_all_at(&chunk.data, index * self.chunk_size)?;
                    chunk.dirty = false;
                    trace!(chunk = index, "chunk synced");
                }
            }
        }
        Ok(())
    }

    /// Flush every dirty chunk.
    pub fn sync_all(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        let mut flushed = 0_u32;
        for (&index, chunk) in &mut cache.chunks {
            if chunk.dirty {
                self.file
                    .write_all_at(&chunk.data, index * self.chunk_size)?;
                chunk.dirty = false;
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!(chunks = flushed, "medium synced");
        }
        Ok(())
    }

    /// Number of resident chunks, for diagnostics.
    #[must_use]
    pub fn resident_chunks(&self) -> usize {
        self.cache.lock().chunks.len()
    }
}

impl Drop for Medium {
    fn drop(&mut self) {
        if self.mode == AccessMode::ReadWrite {
            if let Err(err) = self.sync_all() {
                error!(%err, "failed to sync medium on drop");
            }
        } else {
            let dirty = self.cache.lock().chunks.values().any(|c| c.dirty);
            if dirty {
                warn!("read-only medium had dirty chunks on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn scratch_medium(len: usize, mode: AccessMode, chunk_size: u64) -> (NamedTempFile, Medium) {
        let mut file = NamedTempFile::new().expect("tempfile");
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&bytes).expect("fill");
        file.flush().expect("flush");
        let medium =
            Medium::open_with_chunk_size(file.path(), mode, chunk_size).expect("open medium");
        (file, medium)
    }

    #[test]
    fn read_within_one_chunk() {
        let (_file, medium) = scratch_medium(4096, AccessMode::ReadOnly, 1024);
        let bytes = medium.read_at(10, 16).expect("read");
        let expected: Vec<u8> = (10..26).map(|i| (i % 251) as u8).collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn read_across_chunk_seam() {
        let (_file, medium) = scratch_medium(4096, AccessMode::ReadOnly, 1024);
        let bytes = medium.read_at(1000, 100).expect("read");
        let expected: Vec<u8> = (1000..1100).map(|i| (i % 251) as u8).collect();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn read_out_of_bounds() {
        let (_file, medium) = scratch_medium(4096, AccessMode::ReadOnly, 1024);
        assert!(matches!(
            medium.read_at(4090, 10),
            Err(UdfckError::OutOfBounds { .. })
        ));
        assert!(medium.read_at(4086, 10).is_ok());
    }

    #[test]
    fn write_requires_writable_mode() {
        let (_file, medium) = scratch_medium(4096, AccessMode::ReadOnly, 1024);
        assert!(matches!(
            medium.write_at(0, &[1, 2, 3]),
            Err(UdfckError::ReadOnly(0))
        ));
    }

    #[test]
    fn write_then_read_back_through_cache() {
        let (_file, medium) = scratch_medium(4096, AccessMode::ReadWrite, 1024);
        medium.write_at(1020, &[0xAA; 16]).expect("write over seam");
        let bytes = medium.read_at(1020, 16).expect("read back");
        assert_eq!(bytes, vec![0xAA; 16]);
    }

    #[test]
    fn sync_persists_to_file() {
        let (file, medium) = scratch_medium(4096, AccessMode::ReadWrite, 1024);
        medium.write_at(2000, &[0x55; 64]).expect("write");
        medium.sync_range(2000, 64).expect("sync");
        drop(medium);

        let reopened =
            Medium::open_with_chunk_size(file.path(), AccessMode::ReadOnly, 1024).expect("reopen");
        assert_eq!(reopened.read_at(2000, 64).expect("read"), vec![0x55; 64]);
    }

    #[test]
    fn eviction_flushes_dirty_chunks() {
        // 64-chunk medium with a 16-chunk residency cap: sequential writes
        // force evictions, and everything must still land on disk.
        let (file, medium) = scratch_medium(64 * 256, AccessMode::ReadWrite, 256);
        for i in 0..64_u64 {
            medium.write_at(i * 256, &[i as u8; 8]).expect("write");
        }
        assert!(medium.resident_chunks() <= MAX_RESIDENT_CHUNKS);
        medium.sync_all().expect("sync");
        drop(medium);

        let reopened =
            Medium::open_with_chunk_size(file.path(), AccessMode::ReadOnly, 256).expect("reopen");
        for i in 0..64_u64 {
            assert_eq!(
                reopened.read_at(i * 256, 8).expect("read"),
                vec![i as u8; 8],
                "chunk {i}"
            );
        }
    }

    #[test]
    fn read_sector_addresses_by_lsn() {
        let (_file, medium) = scratch_medium(8192, AccessMode::ReadOnly, 1024);
        let ss = SectorSize::new(2048).unwrap();
        let sector = medium.read_sector(Lsn(1), ss).expect("sector 1");
        assert_eq!(sector.len(), 2048);
        assert_eq!(sector[0], (2048 % 251) as u8);
    }
}
