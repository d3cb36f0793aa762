//! BPB decoding and FAT-type determination.
//!
//! The references behind this module are the Wikipedia page on the design
//! of the FAT file system and Jonathan de Boyne Pollard's notes on the
//! determination of FAT widths.

use crate::structures::raw::boot_sector::{RawBpb, RawBpb32, RawEbpb};
use crate::structures::raw::directory::RawDirEntry;
use crate::{FatError, FatType, Result};
use fatboot_common::types::Endian;

/// Everything the file-system layer needs out of the boot sector, with
/// the FAT variant already determined.
#[derive(Debug, Clone)]
pub struct BootParams {
    pub fat_type: FatType,
    pub bytes_per_sector: usize,
    pub sectors_per_cluster: usize,
    pub reserved_sectors: usize,
    pub fat_count: usize,
    pub max_root_entries: usize,
    /// Sectors per FAT, resolved from the FAT32 BPB when present.
    pub sectors_per_fat: u32,
    pub total_sectors: u32,
    /// First cluster of the root directory (FAT32 only).
    pub root_dir_cluster: u32,
    /// FSInfo sector number (FAT32 only), when plausibly set.
    pub info_sector: Option<u16>,
    /// Volume label from the EBPB, ASCII with trailing spaces stripped.
    pub label: String,
    pub volume_id: u32,
}

fn known_fs_type(file_system: &[u8; 8]) -> Option<Option<FatType>> {
    match file_system {
        b"FAT     " => Some(None),
        b"FAT12   " => Some(Some(FatType::Fat12)),
        b"FAT16   " => Some(Some(FatType::Fat16)),
        b"FAT32   " => Some(Some(FatType::Fat32)),
        _ => None,
    }
}

/// Determines the FAT variant of the file system at the start of *mem*
/// and decodes its headers.
///
/// The EBPB `file_system` string decides when it is conclusive. Failing
/// that, an extended boot signature of 0x28 or 0x29 validates the header
/// fields enough to classify by data-cluster count (the canonical
/// Microsoft thresholds). Both steps are retried with a FAT32 BPB assumed
/// between the BPB and EBPB before giving up.
pub fn detect(mem: &[u8]) -> Result<BootParams> {
    let header = mem
        .get(..RawBpb::SIZE + RawBpb32::SIZE + RawEbpb::SIZE)
        .ok_or_else(|| FatError::InvalidFormat("partition too small for a FAT header".into()))?;
    let bpb: RawBpb = bytemuck::pod_read_unaligned(&header[..RawBpb::SIZE]);
    let ebpb: RawEbpb =
        bytemuck::pod_read_unaligned(&header[RawBpb::SIZE..][..RawEbpb::SIZE]);

    if let Some(Some(fat_type)) = known_fs_type(&ebpb.file_system) {
        return Ok(BootParams::build(fat_type, &bpb, &ebpb, None));
    }
    if matches!(ebpb.extended_boot_sig, 0x28 | 0x29) {
        let fat_type = type_from_count(&bpb, None)?;
        return Ok(BootParams::build(fat_type, &bpb, &ebpb, None));
    }

    // Retry assuming a FAT32 BPB sits between the BPB and the EBPB
    let bpb32: RawBpb32 =
        bytemuck::pod_read_unaligned(&header[RawBpb::SIZE..][..RawBpb32::SIZE]);
    let ebpb: RawEbpb = bytemuck::pod_read_unaligned(
        &header[RawBpb::SIZE + RawBpb32::SIZE..][..RawEbpb::SIZE],
    );
    if let Some(Some(fat_type)) = known_fs_type(&ebpb.file_system) {
        return Ok(BootParams::build(fat_type, &bpb, &ebpb, Some(&bpb32)));
    }
    if matches!(ebpb.extended_boot_sig, 0x28 | 0x29) {
        let fat_type = type_from_count(&bpb, Some(&bpb32))?;
        return Ok(BootParams::build(fat_type, &bpb, &ebpb, Some(&bpb32)));
    }
    Err(FatError::InvalidFormat(
        "could not find file-system type or extended boot signature".into(),
    ))
}

/// Classifies the FAT variant from the number of data clusters, per the
/// canonical limits: below 4085 clusters FAT12, below 65525 FAT16, FAT32
/// beyond.
fn type_from_count(bpb: &RawBpb, bpb32: Option<&RawBpb32>) -> Result<FatType> {
    let bytes_per_sector = bpb.bytes_per_sector.get() as u32;
    let sectors_per_cluster = bpb.sectors_per_cluster as u32;
    if bytes_per_sector == 0 || sectors_per_cluster == 0 {
        return Err(FatError::InvalidFormat("zero sector or cluster size".into()));
    }
    let total_sectors = match bpb.fat16_total_sectors.get() {
        0 => bpb.fat32_total_sectors.get(),
        n => n as u32,
    };
    let sectors_per_fat = match bpb32 {
        Some(bpb32) if bpb.sectors_per_fat.get() == 0 => bpb32.sectors_per_fat.get(),
        _ => bpb.sectors_per_fat.get() as u32,
    };
    let fat_sectors = bpb.fat_count as u32 * sectors_per_fat;
    let root_sectors = ((bpb.max_root_entries.get() as u32 * RawDirEntry::SIZE as u32)
        + bytes_per_sector
        - 1)
        / bytes_per_sector;
    let data_offset = bpb.reserved_sectors.get() as u32 + fat_sectors + root_sectors;
    let data_clusters = total_sectors.saturating_sub(data_offset) / sectors_per_cluster;
    Ok(match data_clusters {
        0..4085 => FatType::Fat12,
        4085..65525 => FatType::Fat16,
        _ => FatType::Fat32,
    })
}

impl BootParams {
    fn build(fat_type: FatType, bpb: &RawBpb, ebpb: &RawEbpb, bpb32: Option<&RawBpb32>) -> Self {
        let label = ebpb
            .volume_label
            .iter()
            .map(|&b| {
                if b.is_ascii() && !b.is_ascii_control() {
                    b as char
                } else {
                    char::REPLACEMENT_CHARACTER
                }
            })
            .collect::<String>()
            .trim_end_matches(' ')
            .to_string();
        let total_sectors = match bpb.fat16_total_sectors.get() {
            0 => bpb.fat32_total_sectors.get(),
            n => n as u32,
        };
        let info_sector = bpb32.and_then(|b| match b.info_sector.get() {
            0 | 0xFFFF => None,
            n => Some(n),
        });
        Self {
            fat_type,
            bytes_per_sector: bpb.bytes_per_sector.get() as usize,
            sectors_per_cluster: bpb.sectors_per_cluster as usize,
            reserved_sectors: bpb.reserved_sectors.get() as usize,
            fat_count: bpb.fat_count as usize,
            max_root_entries: bpb.max_root_entries.get() as usize,
            sectors_per_fat: match bpb32 {
                Some(bpb32) => bpb32.sectors_per_fat.get(),
                None => bpb.sectors_per_fat.get() as u32,
            },
            total_sectors,
            root_dir_cluster: bpb32.map(|b| b.root_dir_cluster.get()).unwrap_or(0),
            info_sector,
            label,
            volume_id: ebpb.volume_id.get(),
        }
    }
}
