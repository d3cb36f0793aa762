//! The classic generic Master Boot Record and its extended-partition
//! chain.
//!
//! Only the four primary entries and the 0xAA55 boot signature matter
//! here; the later, more complicated MBR variants add nothing we need.
//! Extended partitions (types 0x05 and 0x0F) are chains of Extended Boot
//! Records, each holding one logical partition entry (with an LBA
//! relative to the EBR itself) and a link entry pointing at the next EBR
//! (relative to the *outer* extended partition) or a zeroed terminator.

use fatboot_common::types::{Endian, LittleEndian, U16, U32};
use tracing::warn;

use crate::disk::{PartitionKind, RawPartition};
use crate::{PartError, Result};

pub const MBR_BOOT_SIG: u16 = 0xAA55;

/// MBR partition types marking an extended partition.
pub const EXTENDED_TYPES: [u8; 2] = [0x05, 0x0F];

/// A 3-byte CHS address. Retained for completeness of the record layout;
/// everything here addresses by LBA.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Chs([u8; 3]);

impl Chs {
    pub fn head(&self) -> u8 {
        self.0[0]
    }

    pub fn sector(&self) -> u8 {
        self.0[1] & 0b0011_1111
    }

    pub fn cylinder(&self) -> u16 {
        ((self.0[1] as u16 & 0b1100_0000) << 2) | (self.0[2] as u16)
    }
}

impl std::fmt::Debug for Chs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chs")
            .field("c", &self.cylinder())
            .field("h", &self.head())
            .field("s", &self.sector())
            .finish()
    }
}

/// One 16-byte MBR partition entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawMbrPartition {
    pub status: u8,
    pub first_chs: Chs,
    pub part_type: u8,
    pub last_chs: Chs,
    pub first_lba: U32<LittleEndian>,
    pub part_size: U32<LittleEndian>,
}

impl RawMbrPartition {
    pub fn is_extended(&self) -> bool {
        EXTENDED_TYPES.contains(&self.part_type)
    }
}

/// The MBR sector: bootstrap code, four primary entries, boot signature.
/// An EBR shares this shape (with only the first two entries meaningful).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawMbr {
    pub bootstrap: [u8; 446],
    pub partition_1: RawMbrPartition,
    pub partition_2: RawMbrPartition,
    pub partition_3: RawMbrPartition,
    pub partition_4: RawMbrPartition,
    pub boot_sig: U16<LittleEndian>,
}

impl RawMbr {
    pub const SIZE: usize = 512;

    /// The four primary entries in table order. Not all are guaranteed to
    /// be valid, or in order on the disk.
    pub fn partitions(&self) -> [RawMbrPartition; 4] {
        [
            self.partition_1,
            self.partition_2,
            self.partition_3,
            self.partition_4,
        ]
    }
}

impl std::fmt::Debug for RawMbr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMbr")
            .field("partitions", &self.partitions())
            .field("boot_sig", &{ self.boot_sig })
            .finish()
    }
}

/// Chain length guard; no sane image carries more logical partitions.
const MAX_LOGICAL: u32 = 128;

/// Walks the primary entries (and, for the first extended entry, the EBR
/// chain) of *header*, returning discovered partitions. Primaries are
/// numbered 1..=4, logicals from 5 in chain order.
pub(crate) fn read_partitions(
    mem: &[u8],
    header: &RawMbr,
    sector_size: usize,
) -> Result<Vec<RawPartition>> {
    if header.boot_sig.get() != MBR_BOOT_SIG {
        return Err(PartError::InvalidFormat("bad MBR signature".into()));
    }
    let mut parts = Vec::new();
    let mut extended_seen = false;
    for (num, part) in (1u32..).zip(header.partitions()) {
        if part.is_extended() {
            if extended_seen {
                warn!("multiple extended partitions found");
                continue;
            }
            extended_seen = true;
            read_logical(mem, part.first_lba.get() as u64, sector_size, &mut parts)?;
        } else if part.part_type != 0x00 {
            let first_lba = part.first_lba.get() as u64;
            parts.push(RawPartition {
                num,
                kind: PartitionKind::Mbr(part.part_type),
                label: format!("Partition {num}"),
                first_lba,
                last_lba: (first_lba + part.part_size.get() as u64).saturating_sub(1),
            });
        }
    }
    parts.sort_by_key(|p| p.num);
    Ok(parts)
}

/// Follows the EBR chain rooted at *ext_offset* (the LBA of the extended
/// partition), appending logical partitions numbered from 5.
fn read_logical(
    mem: &[u8],
    ext_offset: u64,
    sector_size: usize,
    parts: &mut Vec<RawPartition>,
) -> Result<()> {
    let mut logical_offset = ext_offset;
    for num in 5..5 + MAX_LOGICAL {
        let start = logical_offset as usize * sector_size;
        let raw = mem.get(start..start + RawMbr::SIZE).ok_or_else(|| {
            PartError::InvalidFormat(format!("EBR at LBA {logical_offset} beyond end of image"))
        })?;
        let ebr: RawMbr = bytemuck::pod_read_unaligned(raw);
        if ebr.boot_sig.get() != MBR_BOOT_SIG {
            return Err(PartError::InvalidFormat(format!(
                "bad EBR signature at LBA {logical_offset}"
            )));
        }
        // The logical partition's LBA is relative to this EBR
        let part = ebr.partition_1;
        let first_lba = part.first_lba.get() as u64 + logical_offset;
        parts.push(RawPartition {
            num,
            kind: PartitionKind::Mbr(part.part_type),
            label: format!("Partition {num}"),
            first_lba,
            last_lba: (first_lba + part.part_size.get() as u64).saturating_sub(1),
        });
        // The link entry's LBA is relative to the extended partition
        let link = ebr.partition_2;
        if link.part_type == 0x00 && link.first_lba.get() == 0 {
            return Ok(());
        }
        if !link.is_extended() {
            return Err(PartError::InvalidFormat(format!(
                "second partition in EBR at LBA {logical_offset} is not another EBR or a terminal"
            )));
        }
        logical_offset = link.first_lba.get() as u64 + ext_offset;
    }
    Err(PartError::InvalidFormat("EBR chain does not terminate".into()))
}
