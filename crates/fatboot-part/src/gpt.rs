//! The GUID Partition Table header and entry array.

use fatboot_common::hash::Crc32;
use fatboot_common::str::FixedUtf16Str;
use fatboot_common::types::{Endian, LittleEndian, U32, U64};

use crate::disk::{PartitionKind, RawPartition};
use crate::{PartError, Result};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;

/// A GUID in its on-disk (mixed endian) form.
///
/// The first three fields are little-endian on disk, the last two
/// big-endian; [`Display`](std::fmt::Display) renders the canonical
/// textual form.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const ZERO: Self = Self([0; 16]);

    /// Microsoft basic data partition.
    pub const BASIC_DATA: Self = Self([
        0xa2, 0xa0, 0xd0, 0xeb, 0xe5, 0xb9, 0x33, 0x44, 0x87, 0xc0, 0x68, 0xb6, 0xb7, 0x26, 0x99,
        0xc7,
    ]);
    /// EFI system partition.
    pub const EFI_SYSTEM: Self = Self([
        0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9,
        0x3b,
    ]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15],
        )
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({self})")
    }
}

/// The GPT header found at LBA 1 (or LBA 0 on some 4Kn layouts).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawGptHeader {
    pub signature: [u8; 8],
    pub revision: U32<LittleEndian>,
    pub header_size: U32<LittleEndian>,
    pub header_crc32: U32<LittleEndian>,
    pub reserved: U32<LittleEndian>,
    pub current_lba: U64<LittleEndian>,
    pub backup_lba: U64<LittleEndian>,
    pub first_usable_lba: U64<LittleEndian>,
    pub last_usable_lba: U64<LittleEndian>,
    pub disk_guid: Guid,
    pub part_table_lba: U64<LittleEndian>,
    pub part_table_size: U32<LittleEndian>,
    pub part_entry_size: U32<LittleEndian>,
    pub part_table_crc32: U32<LittleEndian>,
}

impl RawGptHeader {
    pub const SIZE: usize = 92;
}

/// One 128-byte GPT partition entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawGptPartition {
    pub type_guid: Guid,
    pub part_guid: Guid,
    pub first_lba: U64<LittleEndian>,
    pub last_lba: U64<LittleEndian>,
    pub flags: U64<LittleEndian>,
    pub part_label: FixedUtf16Str<36>,
}

impl RawGptPartition {
    pub const SIZE: usize = 128;
}

/// Validates *header* and walks its entry array, returning discovered
/// partitions numbered by slot (starting at 1). Entries with an all-zero
/// partition GUID are skipped.
pub(crate) fn read_partitions(
    mem: &[u8],
    header: &RawGptHeader,
    sector_size: usize,
) -> Result<Vec<RawPartition>> {
    validate_header(header)?;
    let table = table_bytes(mem, header, sector_size)?;
    let entry_size = header.part_entry_size.get() as usize;
    let mut parts = Vec::new();
    for index in 0..header.part_table_size.get() as usize {
        let entry: RawGptPartition =
            bytemuck::pod_read_unaligned(&table[index * entry_size..][..RawGptPartition::SIZE]);
        if entry.part_guid.is_zero() {
            continue;
        }
        parts.push(RawPartition {
            num: index as u32 + 1,
            kind: PartitionKind::Gpt(entry.type_guid),
            label: entry.part_label.to_string(),
            first_lba: entry.first_lba.get(),
            last_lba: entry.last_lba.get(),
        });
    }
    Ok(parts)
}

fn validate_header(header: &RawGptHeader) -> Result<()> {
    if header.signature != *GPT_SIGNATURE {
        return Err(PartError::InvalidFormat("bad GPT signature".into()));
    }
    if header.revision.get() != GPT_REVISION {
        return Err(PartError::InvalidFormat("unrecognized GPT version".into()));
    }
    if header.header_size.get() as usize != RawGptHeader::SIZE {
        return Err(PartError::InvalidFormat("bad GPT header size".into()));
    }
    // The header CRC is computed with its own field zeroed
    let mut raw = [0u8; RawGptHeader::SIZE];
    raw.copy_from_slice(bytemuck::bytes_of(header));
    raw[0x10..0x14].fill(0);
    if Crc32::checksum(&raw) != header.header_crc32.get() {
        return Err(PartError::InvalidFormat("bad GPT header CRC32".into()));
    }
    Ok(())
}

fn table_bytes<'a>(
    mem: &'a [u8],
    header: &RawGptHeader,
    sector_size: usize,
) -> Result<&'a [u8]> {
    let entry_size = header.part_entry_size.get() as usize;
    if entry_size < RawGptPartition::SIZE {
        return Err(PartError::InvalidFormat(format!(
            "GPT partition entry size {entry_size} too small"
        )));
    }
    let start = header.part_table_lba.get() as usize * sector_size;
    let len = header.part_table_size.get() as usize * entry_size;
    mem.get(start..start + len).ok_or_else(|| {
        PartError::InvalidFormat("GPT partition table beyond end of image".into())
    })
}

/// The CRC-32 of the full partition-entry array, for comparison against
/// `part_table_crc32`.
pub fn table_crc(mem: &[u8], header: &RawGptHeader, sector_size: usize) -> Result<u32> {
    Ok(Crc32::checksum(table_bytes(mem, header, sector_size)?))
}
