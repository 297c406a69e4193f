//! Hardware Access Layer.
//!
//! An explicitly constructed value (never a lazily-initialized global, per
//! the Design Notes): the accept front end builds one [`Hal`] at startup
//! and hands an `Arc<Hal>` to every session thread. Init opens the kernel
//! memory device and maps the three register windows; teardown is the
//! `Hal`'s own `Drop` (unmapping falls out of `MmapRegion`'s `Drop`, and
//! the device file descriptor's out of `FileDesc`'s).

mod registers;

pub use registers::RegisterBlock;

use crate::system::{self, FileDesc};
use crate::util::info;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::result;
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    System(#[from] system::Error),
}

/// Physical base addresses and window sizes of the three register blocks
/// (§4.9). Parameterized so tests can point a `Hal` at a scratch file
/// standing in for `/dev/mem`.
#[derive(Copy, Clone, Debug)]
pub struct RegisterMap {
    pub video_a_base: u64,
    pub video_b_base: u64,
    pub audio_base: u64,
}

impl Default for RegisterMap {
    fn default() -> Self {
        RegisterMap {
            video_a_base: 0xFF21_0000,
            video_b_base: 0xFF21_1000,
            audio_base: 0xFF21_2000,
        }
    }
}

const VIDEO_REGION_SIZE: usize = 1024;
const AUDIO_REGION_SIZE: usize = 24;

/// Translation the board applies between a register's raw value and an
/// address usable by [`crate::mapper::FrameBufferMapper`] (§4.8/§4.9).
pub const PHYS_ADDR_OFFSET: u64 = 0xC000_0000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Channel {
    A = 0,
    B = 1,
}

impl Channel {
    pub fn other(self) -> Channel {
        match self {
            Channel::A => Channel::B,
            Channel::B => Channel::A,
        }
    }
}

mod word {
    pub const CONTROL: usize = 0;
    pub const OVERFLOW: usize = 1;
    pub const START_ADDR: usize = 2;
    pub const END_ADDR: usize = 3;
    pub const DUMP_LOOP: usize = 4;
    pub const DUMP_LIMIT: usize = 5;
    pub const FRAME_WIDTH: usize = 6;
    pub const FRAME_HEIGHT: usize = 7;
    pub const FRAME_COUNT: usize = 8;
    pub const CROP_LR: usize = 9;
    pub const CROP_TB: usize = 10;

    // Audio register block only.
    pub const AUDIO_PAGE_COUNT: usize = 5;
}

/// `(left, right, top, bottom)`.
pub type CropWindow = (u16, u16, u16, u16);

pub struct Hal {
    video_a: RegisterBlock,
    video_b: RegisterBlock,
    audio: RegisterBlock,
    // Shared with `session::Session` so the frame buffer mapper can map
    // dump regions out of the same open device, rather than reopening it
    // per session.
    device: std::sync::Arc<FileDesc>,
}

impl Hal {
    /// Opens `mem_device_path` read-write/synchronous and maps the three
    /// register windows described by `map`.
    pub fn init(mem_device_path: &Path, map: RegisterMap) -> Result<Hal> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(mem_device_path)
            .map_err(|source| {
                system::Error::OpenFailed {
                    path: mem_device_path.display().to_string(),
                    source,
                }
            })?;
        let device = std::sync::Arc::new(FileDesc::new(file));

        let video_a = RegisterBlock::map(&device, map.video_a_base, VIDEO_REGION_SIZE)?;
        let video_b = RegisterBlock::map(&device, map.video_b_base, VIDEO_REGION_SIZE)?;
        let audio = RegisterBlock::map(&device, map.audio_base, AUDIO_REGION_SIZE)?;

        info!("hal: mapped video-a @ {:#x}, video-b @ {:#x}, audio @ {:#x}",
            map.video_a_base, map.video_b_base, map.audio_base);

        Ok(Hal {
            video_a,
            video_b,
            audio,
            device,
        })
    }

    fn video_block(&self, channel: Channel) -> &RegisterBlock {
        match channel {
            Channel::A => &self.video_a,
            Channel::B => &self.video_b,
        }
    }

    /// Run bit: bits 3:2 of `control[0]`.
    pub fn video_run(&self, channel: Channel) -> Result<bool> {
        let control = self.video_block(channel).read32(word::CONTROL)?;
        Ok((control >> 2) & 0b11 != 0)
    }

    /// Crop-enable: bit 5 of `control[0]`.
    pub fn video_crop_enabled(&self, channel: Channel) -> Result<bool> {
        let control = self.video_block(channel).read32(word::CONTROL)?;
        Ok((control >> 5) & 1 != 0)
    }

    pub fn video_dump_start_address(&self, channel: Channel) -> Result<u64> {
        let raw = self.video_block(channel).read32(word::START_ADDR)?;
        Ok(raw as u64 + PHYS_ADDR_OFFSET)
    }

    pub fn video_dump_end_address(&self, channel: Channel) -> Result<u64> {
        let raw = self.video_block(channel).read32(word::END_ADDR)?;
        Ok(raw as u64 + PHYS_ADDR_OFFSET)
    }

    pub fn video_dump_limit(&self, channel: Channel) -> Result<u32> {
        self.video_block(channel).read32(word::DUMP_LIMIT)
    }

    /// Hardware frame counter (the producer's monotonic 16-bit-wrapping
    /// count, though the register itself is 32 bits wide; the wrap is
    /// applied where the counter is consumed, not here).
    pub fn video_frame_count(&self, channel: Channel) -> Result<u32> {
        self.video_block(channel).read32(word::FRAME_COUNT)
    }

    pub fn video_frame_width(&self, channel: Channel) -> Result<u16> {
        Ok(self.video_block(channel).read32(word::FRAME_WIDTH)? as u16)
    }

    pub fn video_frame_height(&self, channel: Channel) -> Result<u16> {
        Ok(self.video_block(channel).read32(word::FRAME_HEIGHT)? as u16)
    }

    /// `(left, right)` packed low/high halves of word 9, `(top, bottom)`
    /// likewise of word 10.
    pub fn video_crop_window(&self, channel: Channel) -> Result<CropWindow> {
        let block = self.video_block(channel);
        let lr = block.read32(word::CROP_LR)?;
        let tb = block.read32(word::CROP_TB)?;
        let left = (lr & 0xffff) as u16;
        let right = (lr >> 16) as u16;
        let top = (tb & 0xffff) as u16;
        let bottom = (tb >> 16) as u16;
        Ok((left, right, top, bottom))
    }

    /// Resolved `(width, height)` honoring crop-enable, per §4.4.
    pub fn video_dimensions(&self, channel: Channel) -> Result<(u16, u16)> {
        if self.video_crop_enabled(channel)? {
            let (left, right, top, bottom) = self.video_crop_window(channel)?;
            Ok((right.wrapping_sub(left), bottom.wrapping_sub(top)))
        } else {
            Ok((
                self.video_frame_width(channel)?,
                self.video_frame_height(channel)?,
            ))
        }
    }

    /// Audio run bit: bit 1 of `control[0]`.
    pub fn audio_run(&self) -> Result<bool> {
        let control = self.audio.read32(word::CONTROL)?;
        Ok((control >> 1) & 1 != 0)
    }

    pub fn audio_dump_start_address(&self) -> Result<u64> {
        let raw = self.audio.read32(word::START_ADDR)?;
        Ok(raw as u64 + PHYS_ADDR_OFFSET)
    }

    pub fn audio_dump_end_address(&self) -> Result<u64> {
        let raw = self.audio.read32(word::END_ADDR)?;
        Ok(raw as u64 + PHYS_ADDR_OFFSET)
    }

    /// Hardware page counter.
    pub fn audio_page_count(&self) -> Result<u32> {
        self.audio.read32(word::AUDIO_PAGE_COUNT)
    }

    /// A clone of the shared handle to the mapped memory device, for
    /// [`crate::mapper::FrameBufferMapper`].
    pub fn device(&self) -> std::sync::Arc<FileDesc> {
        std::sync::Arc::clone(&self.device)
    }
}
