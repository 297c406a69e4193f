//! Frame Buffer Mapper: memory-maps a hardware-reported physical capture
//! buffer into the session's address space for read access (§4.8).
//!
//! Grounded on the same `vm_memory`/`MmapRegion` idiom used by
//! `hal::registers::RegisterBlock`, and on `io::shm_mapper`'s
//! map-by-physical-range / unmap-by-recorded-size shape. Physical
//! addresses handed to `map` are assumed already translated by
//! [`crate::hal::PHYS_ADDR_OFFSET`] (the HAL applies that, not this type).

use crate::system::{self, FileDesc};
use std::io;
use vm_memory::mmap::{MmapRegion, MmapRegionBuilder};
use vm_memory::{Bytes, FileOffset};

pub type Result<T> = std::result::Result<T, system::Error>;

/// One read-only mapping of a dump region ring buffer.
pub struct MappedRegion {
    region: MmapRegion,
    size: usize,
}

impl MappedRegion {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Copies `dst.len()` bytes out of the mapping starting at byte
    /// `offset`. `offset + dst.len()` must lie within the mapping; this
    /// is a caller invariant enforced by construction at the call sites
    /// in `session` (ring-slot offsets are always
    /// `unit_aligned_size * (count mod dump_limit)`, which stays inside
    /// `size` by the dump-memory-is-big-enough precondition of §4.3/§4.4).
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> system::Result<()> {
        if offset.checked_add(dst.len()).map_or(true, |end| end > self.size) {
            return Err(system::Error::InvalidOffset);
        }
        self.region
            .read_slice(dst, offset)
            .map_err(|_| system::Error::InvalidOffset)
    }
}

/// Per-session helper: maps and unmaps dump buffers as captures start and
/// stop. Unlike `hal::RegisterBlock` (fixed-size register windows known at
/// compile time), sizes here come from hardware-reported `dump_limit` and
/// are only known once a capture is configured.
pub struct FrameBufferMapper<'a> {
    device: &'a FileDesc,
}

impl<'a> FrameBufferMapper<'a> {
    pub fn new(device: &'a FileDesc) -> Self {
        FrameBufferMapper { device }
    }

    /// Maps `size` bytes of physical memory at `phys_addr`, read-only.
    /// Fails with `InvalidAddress`/`MapFailed` on any mmap error — callers
    /// translate that into the wire-level "Memory map fail" response.
    pub fn map(&self, phys_addr: u64, size: usize) -> system::Result<MappedRegion> {
        let file = self.device.try_clone().map_err(system::Error::MapFailed)?;
        let file_offset = FileOffset::new(file, phys_addr);
        let region = MmapRegionBuilder::new(size)
            .with_file_offset(file_offset)
            .with_mmap_prot(libc::PROT_READ)
            .with_mmap_flags(libc::MAP_SHARED)
            .build()
            .map_err(|_| system::Error::MapFailed(io::Error::last_os_error()))?;
        Ok(MappedRegion { region, size })
    }

    /// Unmapping is `MappedRegion`'s own `Drop` (via `MmapRegion`'s
    /// `Drop`), which always unmaps with the exact size it was mapped
    /// with — the corresponding Open Question in the source (unmapping
    /// the audio region with the video region's size) does not reproduce
    /// here by construction.
    pub fn unmap(&self, _region: MappedRegion) {}
}
