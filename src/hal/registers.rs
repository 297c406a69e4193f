//! A read-only, bounds-checked, volatile view over one mapped register
//! window.
//!
//! Grounded on the teacher's `disk::memory::MemoryOverlay` use of
//! `vm_memory::VolatileSlice` for bounds-checked volatile access, and on
//! `io::bus::BusDevice` for the "typed register word" shape. Deliberately
//! exposes no `store`/write path: this server never writes a board
//! register, so the type that wraps them forbids it rather than trusting
//! callers not to.

use crate::system::{self, FileDesc};
use std::io;
use vm_memory::mmap::{MmapRegion, MmapRegionBuilder};
use vm_memory::{FileOffset, VolatileMemory};

pub struct RegisterBlock {
    region: MmapRegion,
}

impl RegisterBlock {
    /// Maps `size` bytes of the kernel memory device at `phys_addr`,
    /// read-write (the device itself is opened read-write/synchronous per
    /// §4.9), even though every accessor built on top only ever reads.
    pub fn map(fd: &FileDesc, phys_addr: u64, size: usize) -> system::Result<RegisterBlock> {
        let file = fd.try_clone().map_err(system::Error::MapFailed)?;
        let file_offset = FileOffset::new(file, phys_addr);
        let region = MmapRegionBuilder::new(size)
            .with_file_offset(file_offset)
            .with_mmap_prot(libc::PROT_READ | libc::PROT_WRITE)
            .with_mmap_flags(libc::MAP_SHARED)
            .build()
            .map_err(|_| system::Error::MapFailed(io::Error::last_os_error()))?;
        Ok(RegisterBlock { region })
    }

    /// Reads the 32-bit word at `word_index`, applying a compiler fence
    /// so the hardware-driven value is observed fresh on every call.
    pub fn read32(&self, word_index: usize) -> system::Result<u32> {
        let offset = word_index * 4;
        let r = self
            .region
            .get_ref::<u32>(offset)
            .map_err(|_| system::Error::InvalidOffset)?;
        Ok(r.load())
    }
}
