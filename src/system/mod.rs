//! Low-level OS primitives: raw file descriptors and the errors that can
//! come back from `open`/`mmap`-adjacent syscalls.
//!
//! Kept separate from [`crate::hal`] and [`crate::mapper`] so that both can
//! share one error vocabulary without depending on each other.

mod filedesc;

pub use filedesc::FileDesc;

use std::{io, result};
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open {path}: {source}")]
    OpenFailed { path: String, source: io::Error },
    #[error("failed to map memory: {0}")]
    MapFailed(io::Error),
    #[error("attempt to access invalid offset into mapping")]
    InvalidOffset,
    #[error("attempt to access invalid physical address: {0:#x}")]
    InvalidAddress(u64),
}

impl Error {
    pub fn last_os_error() -> Error {
        Error::MapFailed(io::Error::last_os_error())
    }
}
