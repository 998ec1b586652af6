//! In-memory mirror of the state file.
//!
//! The whole file is read into one append-only byte buffer on open and
//! written back in a single pass on flush. Workloads append a handful of
//! small records per discovered node, so a full mirror keeps every record
//! addressable by plain byte offset and makes the close-time snapshot one
//! write call. There is no free store; the only way to give bytes back is
//! to shrink from the end, and the file is truncated to match on flush.
//!
//! `BinaryImage` itself is single-threaded (`&mut self`); the owner
//! serializes access, which for the crawler is the [`crate::state`] lock.

use crate::error::{AirwalkError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// Byte-buffer mirror of a disk file with an append-only allocator.
#[derive(Debug)]
pub struct BinaryImage {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
    size_on_disk: u64,
}

impl BinaryImage {
    /// Open `path` read+write, creating it if absent, and mirror its full
    /// contents into memory. `reserve` bytes of growth capacity are
    /// pre-allocated so early appends do not reallocate.
    pub fn open<P: AsRef<Path>>(path: P, reserve: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let disk_len = file.metadata()?.len();
        let mut buf = Vec::with_capacity(disk_len as usize + reserve);
        file.read_to_end(&mut buf)
            .map_err(|e| AirwalkError::corrupt(format!("short read loading image: {e}")))?;
        if buf.len() as u64 != disk_len {
            return Err(AirwalkError::corrupt(format!(
                "file length changed during load: expected {disk_len}, read {}",
                buf.len()
            )));
        }

        Ok(BinaryImage {
            file,
            path: path.as_ref().to_path_buf(),
            buf,
            size_on_disk: disk_len,
        })
    }

    /// Current logical length of the image.
    pub fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Length last observed on disk.
    pub fn size_on_disk(&self) -> u64 {
        self.size_on_disk
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `n_bytes` zeroed bytes, padded so the returned offset is a
    /// multiple of `align`. `align` must be a power of two. Appending
    /// never fails; the buffer grows as needed.
    pub fn allocate(&mut self, n_bytes: u64, align: u64) -> u64 {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        let start = (self.size() + align - 1) & !(align - 1);
        self.buf.resize((start + n_bytes) as usize, 0);
        start
    }

    /// Shrink (or grow, zero-filled) the image to `n` bytes.
    pub fn resize(&mut self, n: u64) {
        self.buf.resize(n as usize, 0);
    }

    /// Shrink the image by `n` bytes. The closest thing to freeing.
    pub fn pop_back(&mut self, n: u64) {
        let len = self.size().saturating_sub(n);
        self.buf.truncate(len as usize);
    }

    fn check(&self, at: u64, len: u64) -> Result<usize> {
        if at.checked_add(len).map_or(true, |end| end > self.size()) {
            return Err(AirwalkError::corrupt(format!(
                "offset {at}+{len} outside image of {} bytes",
                self.size()
            )));
        }
        Ok(at as usize)
    }

    pub fn bytes(&self, at: u64, len: u64) -> Result<&[u8]> {
        let at = self.check(at, len)?;
        Ok(&self.buf[at..at + len as usize])
    }

    pub fn bytes_mut(&mut self, at: u64, len: u64) -> Result<&mut [u8]> {
        let at = self.check(at, len)?;
        Ok(&mut self.buf[at..at + len as usize])
    }

    pub fn write_bytes(&mut self, at: u64, data: &[u8]) -> Result<()> {
        self.bytes_mut(at, data.len() as u64)?.copy_from_slice(data);
        Ok(())
    }

    pub fn read_u8(&self, at: u64) -> Result<u8> {
        Ok(self.bytes(at, 1)?[0])
    }

    pub fn write_u8(&mut self, at: u64, v: u8) -> Result<()> {
        self.bytes_mut(at, 1)?[0] = v;
        Ok(())
    }

    pub fn read_u32(&self, at: u64) -> Result<u32> {
        let b = self.bytes(at, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_u32(&mut self, at: u64, v: u32) -> Result<()> {
        self.write_bytes(at, &v.to_le_bytes())
    }

    pub fn read_i64(&self, at: u64) -> Result<i64> {
        let b = self.bytes(at, 8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn write_i64(&mut self, at: u64, v: i64) -> Result<()> {
        self.write_bytes(at, &v.to_le_bytes())
    }

    /// Write the whole image back to disk, truncate the file if the image
    /// shrank, and sync.
    pub fn flush(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.buf)?;
        if self.size() < self.size_on_disk {
            self.file.set_len(self.size())?;
        }
        self.file.sync_all()?;
        self.size_on_disk = self.size();
        Ok(())
    }

    /// Begin a compound append. Allocations made through the guard are
    /// rolled back unless `commit` is called before the guard drops.
    pub fn append_guard(&mut self) -> AppendGuard<'_> {
        let mark = self.size();
        AppendGuard {
            image: self,
            mark,
            committed: false,
        }
    }
}

/// Rollback token for multi-step appends.
///
/// Records the image length at construction; dropping the guard without
/// `commit` truncates the image back to that mark, undoing every
/// allocation made while it was alive.
pub struct AppendGuard<'a> {
    image: &'a mut BinaryImage,
    mark: u64,
    committed: bool,
}

impl AppendGuard<'_> {
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for AppendGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.image.resize(self.mark);
        }
    }
}

impl Deref for AppendGuard<'_> {
    type Target = BinaryImage;

    fn deref(&self) -> &BinaryImage {
        self.image
    }
}

impl DerefMut for AppendGuard<'_> {
    fn deref_mut(&mut self) -> &mut BinaryImage {
        self.image
    }
}
