//! The FAT file system proper: layout offsets, validation, and the
//! accessors everything else hangs off.

use std::ops::Range;
use std::sync::Arc;

use fatboot_common::sync::RwLock;
use fatboot_common::types::Endian;
use fatboot_part::{Mapping, Partition};
use tracing::warn;

use crate::dir::FatDirectory;
use crate::file::FatFile;
use crate::path::FatPath;
use crate::structures::boot_sector::{self, BootParams};
use crate::structures::fat::{ClusterRegion, FatTable};
use crate::structures::raw::directory::RawDirEntry;
use crate::structures::raw::fs_info::{
    FSINFO_FREE_OFFSET, FSINFO_LAST_ALLOC_OFFSET, RawFsInfo,
};
use crate::{FatError, FatType, Result};

/// Options for opening a [`FatFileSystem`].
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// The sector size the caller expects; a mismatch with the BPB is
    /// logged but not fatal.
    pub sector_size: usize,
    /// Whether access dates are written back on reads and file closes.
    /// Off by default: every access-date store is a write to the image,
    /// which is pointless amplification for a boot server.
    pub atime: bool,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            sector_size: 512,
            atime: false,
        }
    }
}

/// Shared state of an open file system. Everything that can outlive the
/// public handle (paths, files, directory views) holds this through an
/// `Arc` (or a `Weak`, for paths).
pub(crate) struct FsInner {
    pub(crate) mem: Arc<Mapping>,
    pub(crate) fat_type: FatType,
    pub(crate) bytes_per_sector: usize,
    pub(crate) cluster_size: usize,
    pub(crate) fat_count: usize,
    pub(crate) fat_offset: usize,
    pub(crate) fat_size: usize,
    pub(crate) root_offset: usize,
    pub(crate) root_size: usize,
    pub(crate) data_offset: usize,
    pub(crate) data_len: usize,
    pub(crate) root_cluster: u32,
    pub(crate) fsinfo_offset: Option<usize>,
    pub(crate) label: String,
    pub(crate) read_only: bool,
    pub(crate) atime: bool,
    pub(crate) lock: RwLock,
}

impl FsInner {
    /// The advisory FSInfo counters, when the sector validates.
    pub(crate) fn fsinfo(&self) -> Option<(u32, u32)> {
        let offset = self.fsinfo_offset?;
        let raw: RawFsInfo =
            bytemuck::pod_read_unaligned(self.mem.slice(offset..offset + RawFsInfo::SIZE)?);
        Some((raw.free_clusters.get(), raw.last_alloc.get()))
    }

    pub(crate) fn set_fsinfo(&self, free_clusters: u32, last_alloc: u32) -> Result<()> {
        let Some(offset) = self.fsinfo_offset else {
            return Ok(());
        };
        self.mem
            .write_at(offset + FSINFO_FREE_OFFSET, &free_clusters.to_le_bytes())?;
        self.mem
            .write_at(offset + FSINFO_LAST_ALLOC_OFFSET, &last_alloc.to_le_bytes())?;
        Ok(())
    }
}

/// An open FAT file system over a byte range of a disk-image mapping.
///
/// Cheap to clone (the handle is an `Arc`). Dropping the last handle
/// releases the range; paths keep only a weak reference and fail with
/// [`FatError::Closed`] afterwards, while open [`FatFile`]s keep the
/// file system alive.
#[derive(Clone)]
pub struct FatFileSystem {
    pub(crate) inner: Arc<FsInner>,
}

impl std::fmt::Debug for FatFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatFileSystem")
            .field("label", &self.inner.label)
            .field("fat_type", &self.inner.fat_type)
            .finish()
    }
}

impl FatFileSystem {
    /// Opens the file system contained in *partition* with default
    /// options.
    pub fn new(partition: &Partition) -> Result<Self> {
        Self::with_options(partition, FsOptions::default())
    }

    pub fn with_options(partition: &Partition, options: FsOptions) -> Result<Self> {
        Self::from_mapping(Arc::clone(partition.mapping()), partition.byte_range(), options)
    }

    /// Opens the file system in the byte *range* of *mem*.
    pub fn from_mapping(
        mem: Arc<Mapping>,
        range: Range<usize>,
        options: FsOptions,
    ) -> Result<Self> {
        let base = range.start;
        let len = range.len();
        let part = mem
            .slice(range)
            .ok_or_else(|| FatError::InvalidFormat("partition range beyond mapping".into()))?;
        let params = boot_sector::detect(part)?;
        let inner = Self::layout(&params, mem, base, len, &options)?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    fn layout(
        params: &BootParams,
        mem: Arc<Mapping>,
        base: usize,
        len: usize,
        options: &FsOptions,
    ) -> Result<FsInner> {
        let bps = params.bytes_per_sector;
        if bps == 0 || params.sectors_per_cluster == 0 {
            return Err(FatError::InvalidFormat("zero sector or cluster size".into()));
        }
        if bps != options.sector_size {
            warn!(
                "unexpected sector-size in FAT, {bps}, differs from {}",
                options.sector_size
            );
        }
        match params.fat_type {
            FatType::Fat32 => {
                if params.max_root_entries != 0 {
                    return Err(FatError::InvalidFormat(
                        "max. root entries must be 0 for FAT32".into(),
                    ));
                }
                if params.root_dir_cluster == 0 {
                    return Err(FatError::InvalidFormat(
                        "file-system claims to be FAT32 but has no FAT32 EBPB".into(),
                    ));
                }
            }
            FatType::Fat12 | FatType::Fat16 => {
                if params.max_root_entries == 0 {
                    return Err(FatError::InvalidFormat(format!(
                        "max. root entries must be non-zero for {}",
                        params.fat_type
                    )));
                }
            }
        }
        if params.sectors_per_fat == 0 {
            return Err(FatError::InvalidFormat(format!(
                "{} sectors per FAT is 0",
                params.fat_type
            )));
        }
        let root_bytes = params.max_root_entries * RawDirEntry::SIZE;
        if root_bytes % bps != 0 {
            return Err(FatError::InvalidFormat(format!(
                "max. root entries, {}, creates a root directory region that \
                 is not a multiple of sector size, {bps}",
                params.max_root_entries
            )));
        }

        let fat_size = params.sectors_per_fat as usize * bps;
        let fat_offset = base + params.reserved_sectors * bps;
        let root_offset = fat_offset + fat_size * params.fat_count;
        let data_offset = root_offset + root_bytes;
        let end = base + len;
        if data_offset > end {
            return Err(FatError::InvalidFormat(
                "FAT layout extends beyond the partition".into(),
            ));
        }

        let fsinfo_offset = params.info_sector.and_then(|sector| {
            let offset = base + sector as usize * bps;
            let raw: RawFsInfo =
                bytemuck::pod_read_unaligned(mem.slice(offset..offset + RawFsInfo::SIZE)?);
            if raw.is_valid() {
                Some(offset)
            } else {
                warn!("FSInfo sector {sector} has bad signatures; ignoring it");
                None
            }
        });

        let read_only = !mem.writable();
        Ok(FsInner {
            mem,
            fat_type: params.fat_type,
            bytes_per_sector: bps,
            cluster_size: bps * params.sectors_per_cluster,
            fat_count: params.fat_count,
            fat_offset,
            fat_size,
            root_offset,
            root_size: root_bytes,
            data_offset,
            data_len: end - data_offset,
            root_cluster: params.root_dir_cluster,
            fsinfo_offset,
            label: params.label.clone(),
            read_only,
            atime: options.atime,
            lock: RwLock::new(),
        })
    }

    /// The FAT variant in use.
    pub fn fat_type(&self) -> FatType {
        self.inner.fat_type
    }

    /// The volume label from the EBPB (ASCII, trailing spaces stripped).
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Bytes per allocation unit.
    pub fn cluster_size(&self) -> usize {
        self.inner.cluster_size
    }

    /// Bytes per sector, as declared by the BPB.
    pub fn sector_size(&self) -> usize {
        self.inner.bytes_per_sector
    }

    /// Whether every mutating operation will be refused.
    pub fn read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Whether access dates are written back.
    pub fn atime(&self) -> bool {
        self.inner.atime
    }

    /// The allocation-table view.
    pub fn fat(&self) -> FatTable<'_> {
        FatTable::new(&self.inner)
    }

    /// The FAT32 FSInfo counters `(free_clusters, last_alloc)`, when the
    /// sector is present and its signatures validate.
    pub fn fs_info(&self) -> Option<(u32, u32)> {
        self.inner.fsinfo()
    }

    /// The cluster data region, indexed from cluster 2.
    pub fn clusters(&self) -> ClusterRegion<'_> {
        ClusterRegion::new(&self.inner)
    }

    /// The root directory as a path.
    pub fn root(&self) -> FatPath {
        FatPath::root(self)
    }

    /// Opens the directory starting at *cluster*. Cluster 0 names the
    /// root: the fixed region on FAT12/16, the BPB's root cluster on
    /// FAT32.
    pub fn open_dir(&self, cluster: u32) -> FatDirectory {
        FatDirectory::new(Arc::clone(&self.inner), cluster)
    }

    /// Opens the cluster chain starting at *cluster* as a read-only
    /// stream of *size* bytes (or of the whole chain when `None`).
    pub fn open_file(&self, cluster: u32, size: Option<u64>) -> FatFile {
        FatFile::new(Arc::clone(&self.inner), cluster, size)
    }
}
