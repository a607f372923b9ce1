//! Append-only block store backing [`super::memory::MemoryCache`] evictions.
//!
//! `(offset, size)` addressing; blocks are rounded up to a multiple of
//! [`FileStore::DEFAULT_BLOCK_SIZE`]. Each block is prefixed with an 8-byte
//! header (payload length, CRC32 of the payload) so a read can detect
//! truncated or corrupted blocks; there's no crash-consistent recovery
//! beyond that, since this crate doesn't promise any.

use crate::error::{CacheError, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

const HEADER_SIZE: usize = 8;

pub struct FileStore {
    file: File,
    mmap: Option<MmapMut>,
    len: u64,
    block_size: u64,
}

impl FileStore {
    pub const DEFAULT_BLOCK_SIZE: u64 = 4096;

    pub fn open<P: AsRef<Path>>(path: P, block_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(FileStore {
            file,
            mmap: None,
            len,
            block_size,
        })
    }

    pub(crate) fn rounded_size(&self, size: u32) -> u32 {
        let bs = self.block_size as u32;
        ((size + bs - 1) / bs) * bs
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Appends `bytes` behind a length+checksum header, padding to a block
    /// boundary, and returns `(offset, rounded_size)`.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(u64, u32)> {
        let rounded = self.rounded_size((HEADER_SIZE + bytes.len()) as u32);
        let mut block = vec![0u8; rounded as usize];
        LittleEndian::write_u32(&mut block[0..4], bytes.len() as u32);
        LittleEndian::write_u32(&mut block[4..8], crc32fast::hash(bytes));
        block[HEADER_SIZE..HEADER_SIZE + bytes.len()].copy_from_slice(bytes);

        let offset = self.len;
        self.file.set_len(offset + rounded as u64)?;
        self.file.write_all_at_offset(offset, &block)?;
        self.len += rounded as u64;
        self.mmap = None;
        Ok((offset, rounded))
    }

    /// Reads back a block written by [`Self::append`], verifying its
    /// checksum. `size` is the rounded size returned by `append`.
    pub fn read(&mut self, offset: u64, size: u32) -> Result<Vec<u8>> {
        if self.mmap.is_none() {
            self.mmap = Some(unsafe { MmapOptions::new().map_mut(&self.file)? });
        }
        let mmap = self.mmap.as_ref().unwrap();
        let end = offset as usize + size as usize;
        if end > mmap.len() || (size as usize) < HEADER_SIZE {
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of backing file",
            ))
            .into());
        }
        let block = &mmap[offset as usize..end];
        let payload_len = LittleEndian::read_u32(&block[0..4]) as usize;
        let stored_crc = LittleEndian::read_u32(&block[4..8]);
        let payload = &block[HEADER_SIZE..HEADER_SIZE + payload_len];
        if crc32fast::hash(payload) != stored_crc {
            return Err(CacheError::ChecksumMismatch(offset).into());
        }
        Ok(payload.to_vec())
    }
}

trait WriteAtOffset {
    fn write_all_at_offset(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()>;
}

impl WriteAtOffset for File {
    #[cfg(unix)]
    fn write_all_at_offset(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.write_all_at(bytes, offset)
    }

    #[cfg(not(unix))]
    fn write_all_at_offset(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        use std::io::{Seek, SeekFrom};
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn append_then_read_roundtrips() {
        let tmp = NamedTempFile::new().unwrap();
        let mut store = FileStore::open(tmp.path(), 64).unwrap();
        let (off, size) = store.append(b"hello world").unwrap();
        assert_eq!(size as u64 % 64, 0);
        let back = store.read(off, size).unwrap();
        assert_eq!(&back, b"hello world");
    }

    #[test]
    fn corrupted_block_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut store = FileStore::open(tmp.path(), 64).unwrap();
        let (off, size) = store.append(b"hello world").unwrap();
        drop(store);

        let file = OpenOptions::new().write(true).open(tmp.path()).unwrap();
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file).unwrap() };
        mmap[HEADER_SIZE] ^= 0xff;
        mmap.flush().unwrap();

        let mut store = FileStore::open(tmp.path(), 64).unwrap();
        let err = store.read(off, size).unwrap_err();
        assert!(matches!(err, crate::error::Error::Cache(CacheError::ChecksumMismatch(o)) if o == off));
    }
}
