//! Scratch-image builders: just enough `mkfs.fat` to exercise the
//! engine. Images are empty file systems; tests populate them through
//! the public API.

use std::io::Write;

use fatboot_common::types::{Endian, U16, U32};
use fatboot_fat::structures::raw::boot_sector::{RawBpb, RawBpb32, RawEbpb};
use fatboot_fat::structures::raw::fs_info::RawFsInfo;
use fatboot_fat::{FatFileSystem, FatType, FsOptions};
use fatboot_part::{Access, DiskImage};

pub const SS: usize = 512;

pub struct ImageSpec {
    pub fat_type: FatType,
    pub total_sectors: usize,
    pub sectors_per_cluster: usize,
    pub reserved_sectors: usize,
    pub fat_count: usize,
    pub max_root_entries: usize,
    pub sectors_per_fat: usize,
}

impl ImageSpec {
    pub fn fat12() -> Self {
        Self {
            fat_type: FatType::Fat12,
            total_sectors: 2048,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            max_root_entries: 224,
            sectors_per_fat: 6,
        }
    }

    pub fn fat16() -> Self {
        Self {
            fat_type: FatType::Fat16,
            total_sectors: 20480,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            max_root_entries: 512,
            sectors_per_fat: 80,
        }
    }

    pub fn fat32() -> Self {
        Self {
            fat_type: FatType::Fat32,
            total_sectors: 8192,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            fat_count: 2,
            max_root_entries: 0,
            sectors_per_fat: 64,
        }
    }
}

/// Formats an empty file system into a byte buffer.
pub fn mkfs(spec: &ImageSpec) -> Vec<u8> {
    let mut mem = vec![0u8; spec.total_sectors * SS];

    let mut bpb: RawBpb = bytemuck::Zeroable::zeroed();
    bpb.jump = [0xEB, 0x58, 0x90];
    bpb.oem_name = *b"fatboot ";
    bpb.bytes_per_sector = U16::new(SS as u16);
    bpb.sectors_per_cluster = spec.sectors_per_cluster as u8;
    bpb.reserved_sectors = U16::new(spec.reserved_sectors as u16);
    bpb.fat_count = spec.fat_count as u8;
    bpb.max_root_entries = U16::new(spec.max_root_entries as u16);
    if spec.total_sectors <= 0xFFFF {
        bpb.fat16_total_sectors = U16::new(spec.total_sectors as u16);
    } else {
        bpb.fat32_total_sectors = U32::new(spec.total_sectors as u32);
    }
    bpb.media_descriptor = 0xF8;
    if spec.fat_type != FatType::Fat32 {
        bpb.sectors_per_fat = U16::new(spec.sectors_per_fat as u16);
    }

    let mut ebpb: RawEbpb = bytemuck::Zeroable::zeroed();
    ebpb.drive_number = 0x80;
    ebpb.extended_boot_sig = 0x29;
    ebpb.volume_id = U32::new(0x1234_5678);
    ebpb.volume_label = *b"TEST       ";
    ebpb.file_system = match spec.fat_type {
        FatType::Fat12 => *b"FAT12   ",
        FatType::Fat16 => *b"FAT16   ",
        FatType::Fat32 => *b"FAT32   ",
    };

    mem[..RawBpb::SIZE].copy_from_slice(bytemuck::bytes_of(&bpb));
    match spec.fat_type {
        FatType::Fat32 => {
            let mut bpb32: RawBpb32 = bytemuck::Zeroable::zeroed();
            bpb32.sectors_per_fat = U32::new(spec.sectors_per_fat as u32);
            bpb32.root_dir_cluster = U32::new(2);
            bpb32.info_sector = U16::new(1);
            mem[RawBpb::SIZE..][..RawBpb32::SIZE].copy_from_slice(bytemuck::bytes_of(&bpb32));
            mem[RawBpb::SIZE + RawBpb32::SIZE..][..RawEbpb::SIZE]
                .copy_from_slice(bytemuck::bytes_of(&ebpb));
        }
        _ => {
            mem[RawBpb::SIZE..][..RawEbpb::SIZE].copy_from_slice(bytemuck::bytes_of(&ebpb));
        }
    }
    mem[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());

    // Reserve entries 0 and 1 (media descriptor and end marks); on
    // FAT32 cluster 2 holds the empty root directory
    let fat_offset = spec.reserved_sectors * SS;
    let fat_len = spec.sectors_per_fat * SS;
    for copy in 0..spec.fat_count {
        let fat = fat_offset + copy * fat_len;
        match spec.fat_type {
            FatType::Fat12 => {
                mem[fat..fat + 3].copy_from_slice(&[0xF8, 0xFF, 0xFF]);
            }
            FatType::Fat16 => {
                mem[fat..fat + 2].copy_from_slice(&0xFFF8u16.to_le_bytes());
                mem[fat + 2..fat + 4].copy_from_slice(&0xFFFFu16.to_le_bytes());
            }
            FatType::Fat32 => {
                mem[fat..fat + 4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
                mem[fat + 4..fat + 8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
                mem[fat + 8..fat + 12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
            }
        }
    }

    if spec.fat_type == FatType::Fat32 {
        // FSInfo with the free count satisfying the table invariant:
        // every entry >= 2 that is zero
        let entries = fat_len / 4;
        let free = entries as u32 - 3;
        let info = RawFsInfo::new(free, 2);
        mem[SS..SS + RawFsInfo::SIZE].copy_from_slice(bytemuck::bytes_of(&info));
    }
    mem
}

pub fn write_image(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

pub fn image(spec: &ImageSpec) -> tempfile::NamedTempFile {
    write_image(&mkfs(spec))
}

pub fn open_fs(path: &std::path::Path, access: Access) -> (DiskImage, FatFileSystem) {
    let img = DiskImage::open(path, access).unwrap();
    let len = img.mapping().len();
    let fs =
        FatFileSystem::from_mapping(img.mapping().clone(), 0..len, FsOptions::default()).unwrap();
    (img, fs)
}
