use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};

/// A raw file descriptor that owns its lifetime.
///
/// Thin wrapper so `hal`/`mapper` can hand `RawFd`s to `vm_memory`'s
/// `FileOffset` without juggling `File` borrows themselves.
pub struct FileDesc {
    file: File,
}

impl FileDesc {
    pub fn new(file: File) -> Self {
        FileDesc { file }
    }

    pub fn try_clone(&self) -> std::io::Result<File> {
        self.file.try_clone()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
