//! Cluster-chain-backed files.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use chrono::Local;

use crate::dir::{DirEntry, FatDirectory};
use crate::fs::FsInner;
use crate::structures::fat::{ClusterRegion, FatTable};
use crate::{FatError, Result};

/// Ties an open file back to its directory entry so size, timestamps,
/// and the first cluster can be written back on flush.
pub(crate) struct EntryBinding {
    pub(crate) dir: FatDirectory,
    pub(crate) name: String,
}

/// An open file on a [`crate::FatFileSystem`]: the cluster chain as a
/// random-access byte stream.
///
/// Implements [`Read`], [`Write`], and [`Seek`]. Files opened through
/// the path facade with a writable mode are bound to their directory
/// entry; closing (or flushing) such a file writes the size, the
/// modification time, and the first cluster back to the entry.
///
/// A `FatFile` keeps its file system alive; the size reported for
/// directory streams (opened with no size) is the chain length times the
/// cluster size.
pub struct FatFile {
    fs: Arc<FsInner>,
    chain: Vec<u32>,
    size: Option<u64>,
    pos: u64,
    writable: bool,
    append: bool,
    binding: Option<EntryBinding>,
    dirty: bool,
}

impl std::fmt::Debug for FatFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatFile")
            .field("start", &self.chain.first().copied().unwrap_or(0))
            .field("size", &self.size)
            .field("pos", &self.pos)
            .finish()
    }
}

impl FatFile {
    /// Opens the chain at *start* read-only. A *size* of `None` marks a
    /// directory stream filling all its clusters.
    pub(crate) fn new(fs: Arc<FsInner>, start: u32, size: Option<u64>) -> Self {
        let chain = FatTable::new(&fs).chain(start).collect();
        Self {
            fs,
            chain,
            size,
            pos: 0,
            writable: false,
            append: false,
            binding: None,
            dirty: false,
        }
    }

    pub(crate) fn with_binding(
        fs: Arc<FsInner>,
        start: u32,
        size: u64,
        writable: bool,
        append: bool,
        binding: EntryBinding,
    ) -> Self {
        let mut file = Self::new(fs, start, Some(size));
        file.writable = writable;
        file.append = append;
        file.binding = Some(binding);
        file
    }

    /// The file's size in bytes.
    pub fn size(&self) -> u64 {
        self.size
            .unwrap_or(self.chain.len() as u64 * self.fs.cluster_size as u64)
    }

    /// Truncates to zero bytes, freeing every cluster beyond the first.
    pub(crate) fn truncate(&mut self) -> Result<()> {
        let _guard = self.fs.lock.write();
        let table = FatTable::new(&self.fs);
        for &cluster in self.chain.iter().skip(1) {
            table.mark_free(cluster)?;
        }
        if let Some(&first) = self.chain.first() {
            table.mark_end(first)?;
            self.chain.truncate(1);
        }
        self.size = Some(0);
        self.dirty = true;
        Ok(())
    }

    /// Appends one free cluster to the chain: allocate, mark it
    /// end-of-chain, zero it, and link it from its predecessor.
    fn grow(&mut self) -> Result<()> {
        let table = FatTable::new(&self.fs);
        let new = table.alloc()?;
        table.mark_end(new)?;
        ClusterRegion::new(&self.fs).zero(new)?;
        if let Some(&last) = self.chain.last() {
            table.set(last, new)?;
        }
        self.chain.push(new);
        Ok(())
    }

    /// Writes *data* at byte position *pos*, allocating clusters one at
    /// a time as the write advances past the allocated extent. Returns
    /// bytes written (bounded by the containing cluster).
    fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<usize> {
        let cs = self.fs.cluster_size as u64;
        let index = (pos / cs) as usize;
        let left = (pos % cs) as usize;
        while self.chain.len() <= index {
            self.grow()?;
        }
        let n = data.len().min(cs as usize - left);
        ClusterRegion::new(&self.fs).write(self.chain[index], left, &data[..n])?;
        Ok(n)
    }

    /// Zero-fills the byte range `[from, to)`, allocating as needed.
    /// Used when a write lands past the current end of the file.
    fn zero_range(&mut self, mut from: u64, to: u64) -> Result<()> {
        let zeros = vec![0u8; self.fs.cluster_size];
        while from < to {
            let n = self
                .write_at(from, &zeros[..((to - from) as usize).min(zeros.len())])?;
            from += n as u64;
        }
        Ok(())
    }

    /// Writes size, modification time, and first cluster back to the
    /// owning directory entry.
    fn flush_entry(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(binding) = &self.binding else {
            self.dirty = false;
            return Ok(());
        };
        let _guard = self.fs.lock.write();
        let group = binding
            .dir
            .find(&binding.name)
            .ok_or_else(|| FatError::NotFound(binding.name.clone()))?;
        let mut entry: DirEntry = group.entry;
        entry.set_size(self.size() as u32);
        let now = Local::now().naive_local();
        entry.set_modified(now)?;
        if self.fs.atime {
            entry.set_accessed(now)?;
        }
        entry.set_first_cluster(self.chain.first().copied().unwrap_or(0), self.fs.fat_type);
        binding.dir.update(&binding.name, &entry)?;
        self.dirty = false;
        Ok(())
    }
}

impl Read for FatFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _guard = self.fs.lock.read();
        let size = self.size();
        if buf.is_empty() || self.pos >= size {
            return Ok(0);
        }
        let cs = self.fs.cluster_size as u64;
        // index is which cluster of the file to read; left and right are
        // the byte window within it
        let index = (self.pos / cs) as usize;
        let left = (self.pos - index as u64 * cs) as usize;
        let right = (cs as usize)
            .min(left + buf.len())
            .min((size - index as u64 * cs) as usize);
        if right <= left {
            return Ok(0);
        }
        let cluster = *self.chain.get(index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "cluster chain shorter than file size",
            )
        })?;
        let data = ClusterRegion::new(&self.fs)
            .get(cluster)
            .map_err(io::Error::from)?;
        let n = right - left;
        buf[..n].copy_from_slice(&data[left..right]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for FatFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is not open for writing",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let fs = Arc::clone(&self.fs);
        let _guard = fs.lock.write();
        let size = self.size();
        if self.append {
            self.pos = size;
        }
        if self.pos > size {
            self.zero_range(size, self.pos).map_err(io::Error::from)?;
        }
        let n = self.write_at(self.pos, buf).map_err(io::Error::from)?;
        self.pos += n as u64;
        self.size = Some(self.size().max(self.pos));
        self.dirty = true;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_entry().map_err(io::Error::from)
    }
}

impl Seek for FatFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(d) => self.pos as i64 + d,
            SeekFrom::End(d) => self.size() as i64 + d,
        };
        if new < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        }
        self.pos = new as u64;
        Ok(self.pos)
    }
}

impl Drop for FatFile {
    fn drop(&mut self) {
        if self.dirty {
            let _ = self.flush_entry();
        }
    }
}
