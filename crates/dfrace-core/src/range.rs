//! # Range request target
//!
//! A range-copy request shaped like the kernel's `file_dedupe_range`:
//!
//! ```text
//! header (24 bytes)                     entry (32 bytes, × dest_count)
//! 0  u64 src_offset                     0  i64 dest_fd
//! 8  u64 src_length                     8  u64 dest_offset
//! 16 u16 dest_count   <- raced          16 u64 bytes_done (out)
//! 18 u16 reserved                       24 i32 status     (out)
//! 20 u32 reserved                       28 u32 reserved
//! ```
//!
//! [`FileRangeCopy`] services such a request entirely in user space with
//! positional I/O. It clamps the count it reads to the allocated tail, so a
//! raced count can never push it out of bounds, and fails any entry whose
//! `dest_fd` is not its own destination file with `-EBADF`.

use std::collections::TryReserveError;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};
use crate::payload::{PayloadLayout, SharedPayload};
use crate::target::{TargetOperation, TargetStatus};

use dfrace_config::log_target_trace;

pub const SRC_OFFSET: usize = 0;
pub const SRC_LENGTH: usize = 8;
pub const DEST_COUNT: usize = 16;

pub const ENTRY_DEST_FD: usize = 0;
pub const ENTRY_DEST_OFFSET: usize = 8;
pub const ENTRY_BYTES_DONE: usize = 16;
pub const ENTRY_STATUS: usize = 24;

/// Default source length: 64 KiB - 1 plus two pages.
pub const DEFAULT_SRC_LENGTH: u64 = 65535 + 4096 + 4096;

pub struct RangeRequest;

impl PayloadLayout for RangeRequest {
    type Word = u16;
    const HEADER_SIZE: usize = 24;
    const ELEMENT_SIZE: usize = 32;
    const ALIGN: usize = 8;
    const RACE_OFFSET: usize = DEST_COUNT;
}

impl RangeRequest {
    /// Allocate a request with `elements` entries, all pointing at `dest_fd`.
    pub fn build(
        elements: usize,
        src_offset: u64,
        src_length: u64,
        dest_fd: i64,
    ) -> Result<SharedPayload<RangeRequest>> {
        let payload = SharedPayload::<RangeRequest>::new(elements)?;
        payload.write(SRC_OFFSET, src_offset);
        payload.write(SRC_LENGTH, src_length);
        for i in 0..elements {
            payload.write(payload.element_offset(i) + ENTRY_DEST_FD, dest_fd);
        }
        Ok(payload)
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| HarnessError::Setup {
            path: path.to_path_buf(),
            source,
        })
}

fn neg_errno(e: &std::io::Error) -> TargetStatus {
    -(e.raw_os_error().unwrap_or(libc::EIO) as TargetStatus)
}

/// Copies `src_length` bytes from the source file into the destination file
/// once per request entry.
pub struct FileRangeCopy {
    source: File,
    dest: File,
    source_path: PathBuf,
    dest_path: PathBuf,
    buf: Vec<u8>,
}

impl FileRangeCopy {
    /// Open (creating if needed) both backing files read/write.
    pub fn open(source: &Path, dest: &Path) -> Result<Self> {
        Ok(Self {
            source: open_rw(source)?,
            dest: open_rw(dest)?,
            source_path: source.to_path_buf(),
            dest_path: dest.to_path_buf(),
            buf: Vec::new(),
        })
    }

    /// Size the copy buffer for `src_length` bytes before the race starts.
    pub fn reserve(&mut self, src_length: u64) -> Result<()> {
        let size = usize::try_from(src_length)
            .map_err(|_| HarnessError::Alloc { size: usize::MAX })?;
        self.grow(size).map_err(|_| HarnessError::Alloc { size })
    }

    fn grow(&mut self, size: usize) -> std::result::Result<(), TryReserveError> {
        if size > self.buf.len() {
            self.buf.try_reserve_exact(size - self.buf.len())?;
            self.buf.resize(size, 0);
        }
        Ok(())
    }

    pub fn dest_fd(&self) -> i64 {
        i64::from(self.dest.as_raw_fd())
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }
}

impl TargetOperation<RangeRequest> for FileRangeCopy {
    fn fire(&mut self, payload: &SharedPayload<RangeRequest>) -> TargetStatus {
        let requested = usize::from(payload.race_value());
        let count = requested.min(payload.elements());
        let src_offset = payload.read::<u64>(SRC_OFFSET).unwrap_or(0);
        let src_length = payload.read::<u64>(SRC_LENGTH).unwrap_or(0);

        // Unreserved lengths are grown here; failure fails the call, not the run.
        let len = match usize::try_from(src_length) {
            Ok(len) if self.grow(len).is_ok() => len,
            _ => return -(libc::ENOMEM as TargetStatus),
        };
        let n = match self.source.read_at(&mut self.buf[..len], src_offset) {
            Ok(n) => n,
            Err(e) => return neg_errno(&e),
        };

        let dest_fd = self.dest_fd();
        let mut status: TargetStatus = 0;
        for i in 0..count {
            let entry = payload.element_offset(i);
            if payload.read::<i64>(entry + ENTRY_DEST_FD) != Some(dest_fd) {
                status = -(libc::EBADF as TargetStatus);
                payload.write(entry + ENTRY_BYTES_DONE, 0u64);
                payload.write(entry + ENTRY_STATUS, status as i32);
                continue;
            }
            let dest_offset = payload.read::<u64>(entry + ENTRY_DEST_OFFSET).unwrap_or(0);
            let (done, entry_status) = match self.dest.write_all_at(&self.buf[..n], dest_offset) {
                Ok(()) => (n as u64, 0i32),
                Err(e) => {
                    status = neg_errno(&e);
                    (0, status as i32)
                }
            };
            payload.write(entry + ENTRY_BYTES_DONE, done);
            payload.write(entry + ENTRY_STATUS, entry_status);
        }

        log_target_trace!(
            "Range copy",
            requested = requested,
            serviced = count,
            bytes = n as u64,
            status = status
        );
        status
    }
}
