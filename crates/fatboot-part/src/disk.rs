//! Disk images and their partitions.

use std::fs::{File, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fatboot_common::types::Endian;
use memmap2::{Mmap, MmapMut, MmapOptions};
use tracing::debug;

use crate::gpt::{self, Guid, RawGptHeader};
use crate::mbr::{self, RawMbr};
use crate::{PartError, Result};

/// How an image is mapped into the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A shared read-only mapping; every mutating operation fails.
    Read,
    /// A private copy-on-write mapping; writes land in memory and are
    /// never carried back to the image file.
    Cow,
    /// A shared writable mapping; writes go to the image file.
    ReadWrite,
}

enum MapKind {
    Read(Mmap),
    Write(MmapMut),
}

/// The process-wide mapping of one disk image.
///
/// The mapping is the arena every other view works from: partitions, FAT
/// file systems, files, and directories all address it by offset. It is
/// torn down when the last `Arc` referencing it drops.
///
/// Writes go through [`write_at`](Self::write_at), which takes `&self`:
/// callers (the FAT layer) serialize every mutation behind a write lock,
/// and the byte ranges handed out by [`bytes`](Self::bytes) are never read
/// concurrently with a write to the same range.
pub struct Mapping {
    ptr: *mut u8,
    len: usize,
    writable: bool,
    _map: MapKind,
    _file: File,
}

unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}

impl Mapping {
    fn new(file: File, access: Access) -> Result<Self> {
        let (map, writable) = match access {
            Access::Read => (MapKind::Read(unsafe { Mmap::map(&file)? }), false),
            Access::Cow => (
                MapKind::Write(unsafe { MmapOptions::new().map_copy(&file)? }),
                true,
            ),
            Access::ReadWrite => (MapKind::Write(unsafe { MmapMut::map_mut(&file)? }), true),
        };
        let (ptr, len) = match &map {
            MapKind::Read(m) => (m.as_ptr() as *mut u8, m.len()),
            MapKind::Write(m) => (m.as_ptr() as *mut u8, m.len()),
        };
        Ok(Self {
            ptr,
            len,
            writable,
            _map: map,
            _file: file,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// The full mapped byte range.
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// A sub-range of the mapping; `None` when out of bounds.
    pub fn slice(&self, range: Range<usize>) -> Option<&[u8]> {
        self.bytes().get(range)
    }

    /// Stores *data* at *offset*. Fails on a read-only mapping or an
    /// out-of-bounds range.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> std::io::Result<()> {
        if !self.writable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "mapping is read-only",
            ));
        }
        if offset.checked_add(data.len()).is_none_or(|end| end > self.len) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "write beyond end of mapping",
            ));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
        Ok(())
    }
}

/// A disk image mapped into memory.
///
/// Construction maps the whole image; [`partitions`](Self::partitions)
/// probes the partitioning scheme. The default sector size is 512 bytes;
/// [`open_with_sector_size`](Self::open_with_sector_size) overrides it for
/// 4Kn images.
pub struct DiskImage {
    mapping: Arc<Mapping>,
    sector_size: usize,
    path: PathBuf,
}

impl std::fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImage")
            .field("path", &self.path)
            .field("len", &self.mapping.len())
            .finish()
    }
}

impl DiskImage {
    pub fn open(path: impl AsRef<Path>, access: Access) -> Result<Self> {
        Self::open_with_sector_size(path, access, 512)
    }

    pub fn open_with_sector_size(
        path: impl AsRef<Path>,
        access: Access,
        sector_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(access == Access::ReadWrite)
            .open(&path)?;
        let mapping = Arc::new(Mapping::new(file, access)?);
        debug!(path = %path.display(), len = mapping.len(), "mapped disk image");
        Ok(Self {
            mapping,
            sector_size,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// The shared mapping arena backing this image.
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// Probes the image for a partitioning scheme and walks its tables.
    ///
    /// The probe order is GPT at LBA 1, GPT at LBA 0 (where a 4Kn-style
    /// header may land), then the MBR boot signature at offset 510.
    pub fn partitions(&self) -> Result<PartitionTable> {
        let ss = self.sector_size;
        let mem = self.mapping.bytes();
        for lba in [1, 0] {
            if let Some(raw) = mem.get(lba * ss..lba * ss + RawGptHeader::SIZE) {
                let header: RawGptHeader = bytemuck::pod_read_unaligned(raw);
                if header.signature == *gpt::GPT_SIGNATURE {
                    let entries = gpt::read_partitions(mem, &header, ss)?;
                    return Ok(self.build_table(Scheme::Gpt, entries));
                }
            }
        }
        if let Some(raw) = mem.get(..RawMbr::SIZE) {
            let header: RawMbr = bytemuck::pod_read_unaligned(raw);
            if header.boot_sig.get() == mbr::MBR_BOOT_SIG {
                let entries = mbr::read_partitions(mem, &header, ss)?;
                return Ok(self.build_table(Scheme::Mbr, entries));
            }
        }
        Err(PartError::InvalidFormat(format!(
            "unable to determine partitioning scheme in use by {}",
            self.path.display()
        )))
    }

    fn build_table(&self, scheme: Scheme, entries: Vec<RawPartition>) -> PartitionTable {
        let parts = entries
            .into_iter()
            .filter_map(|entry| {
                let start = entry.first_lba as usize * self.sector_size;
                let end = (entry.last_lba as usize + 1) * self.sector_size;
                if end > self.mapping.len() || start >= end {
                    debug!(
                        num = entry.num,
                        start, end, "skipping partition outside the image"
                    );
                    return None;
                }
                Some(Partition {
                    mapping: Arc::clone(&self.mapping),
                    range: start..end,
                    num: entry.num,
                    kind: entry.kind,
                    label: entry.label,
                })
            })
            .collect();
        PartitionTable { scheme, parts }
    }
}

/// The partitioning scheme found on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Mbr,
    Gpt,
}

/// The partition type: an MBR type byte or a GPT type GUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    Mbr(u8),
    Gpt(Guid),
}

/// One discovered partition, before the byte-range view is built.
pub(crate) struct RawPartition {
    pub num: u32,
    pub kind: PartitionKind,
    pub label: String,
    pub first_lba: u64,
    pub last_lba: u64,
}

/// The partitions discovered on a [`DiskImage`].
///
/// Primary MBR partitions are numbered 1..=4 and logical partitions from
/// 5 in chain order; GPT partitions are numbered by their slot in the
/// entry array, starting at 1.
pub struct PartitionTable {
    scheme: Scheme,
    parts: Vec<Partition>,
}

impl PartitionTable {
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Looks up a partition by number.
    pub fn get(&self, num: u32) -> Result<&Partition> {
        self.parts
            .iter()
            .find(|p| p.num == num)
            .ok_or(PartError::UnknownPartition(num))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.parts.iter()
    }
}

/// A view of one partition: a byte range of the image mapping plus the
/// partition's number, type, and label.
#[derive(Clone)]
pub struct Partition {
    mapping: Arc<Mapping>,
    range: Range<usize>,
    num: u32,
    kind: PartitionKind,
    label: String,
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("num", &self.num)
            .field("len", &self.range.len())
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish()
    }
}

impl Partition {
    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn kind(&self) -> PartitionKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// The partition's byte range within the image mapping.
    pub fn byte_range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// The shared mapping this partition is a view of.
    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    /// The partition's bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.mapping.bytes()[self.range.clone()]
    }
}
