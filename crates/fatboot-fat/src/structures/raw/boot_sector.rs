use fatboot_common::types::{LittleEndian, U16, U32};

/// The BIOS Parameter Block (DOS 3.31 variant) at the very start of a FAT
/// partition. All modern FAT-12/16/32 implementations use this layout;
/// the ancient variants are not supported.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawBpb {
    /// BS_jmpBoot
    pub jump: [u8; 3],
    /// BS_OEMName
    ///
    /// The name of the program that formatted the partition
    pub oem_name: [u8; 8],
    /// BPB_BytsPerSec
    pub bytes_per_sector: U16<LittleEndian>,
    /// BPB_SecPerClus
    pub sectors_per_cluster: u8,
    /// BPB_RsvdSecCnt
    ///
    /// Number of sectors before the first FAT; must be non-zero
    pub reserved_sectors: U16<LittleEndian>,
    /// BPB_NumFATs
    ///
    /// Number of mirrored allocation tables, normally 2
    pub fat_count: u8,
    /// BPB_RootEntCnt
    ///
    /// Size of the fixed root directory in 32-byte entries; must be 0 on
    /// FAT32 and non-zero on FAT12/16
    pub max_root_entries: U16<LittleEndian>,
    /// BPB_TotSec16
    ///
    /// Total sector count; 0 when the count needs 32 bits
    pub fat16_total_sectors: U16<LittleEndian>,
    /// BPB_Media
    pub media_descriptor: u8,
    /// BPB_FATSz16
    ///
    /// Sectors per FAT; 0 on FAT32 (see `RawBpb32::sectors_per_fat`)
    pub sectors_per_fat: U16<LittleEndian>,
    /// BPB_SecPerTrk
    pub sectors_per_track: U16<LittleEndian>,
    /// BPB_NumHeads
    pub heads_per_disk: U16<LittleEndian>,
    /// BPB_HiddSec
    ///
    /// Sectors preceding this partition on the disk
    pub hidden_sectors: U32<LittleEndian>,
    /// BPB_TotSec32
    pub fat32_total_sectors: U32<LittleEndian>,
}

impl RawBpb {
    pub const SIZE: usize = 36;
}

/// The Extended BIOS Parameter Block, immediately after the BPB on
/// FAT12/16 or after the FAT32 BPB on FAT32.
///
/// Provides the `file_system` string used as the primary means of
/// distinguishing the FAT types, and the volume label.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawEbpb {
    /// BS_DrvNum
    pub drive_number: u8,
    /// BS_Reserved1
    pub reserved: u8,
    /// BS_BootSig
    ///
    /// 0x29 (or the rarer 0x28) marks the volume id/label/fs-type fields
    /// as present
    pub extended_boot_sig: u8,
    /// BS_VolID
    pub volume_id: U32<LittleEndian>,
    /// BS_VolLab
    ///
    /// ASCII, space padded; "NO NAME    " when unset
    pub volume_label: [u8; 11],
    /// BS_FilSysType
    ///
    /// One of "FAT     ", "FAT12   ", "FAT16   ", "FAT32   "; purely
    /// informational and not always trustworthy
    pub file_system: [u8; 8],
}

impl RawEbpb {
    pub const SIZE: usize = 26;
}

/// The FAT32 BIOS Parameter Block, between the BPB and the EBPB on FAT32
/// volumes only.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawBpb32 {
    /// BPB_FATSz32
    pub sectors_per_fat: U32<LittleEndian>,
    /// BPB_ExtFlags
    pub mirror_flags: U16<LittleEndian>,
    /// BPB_FSVer
    ///
    /// Must be 0
    pub version: U16<LittleEndian>,
    /// BPB_RootClus
    ///
    /// First cluster of the root directory, normally 2
    pub root_dir_cluster: U32<LittleEndian>,
    /// BPB_FSInfo
    ///
    /// Sector number of the FSInfo structure within the reserved area
    pub info_sector: U16<LittleEndian>,
    /// BPB_BkBootSec
    pub backup_sector: U16<LittleEndian>,
    /// BPB_Reserved
    pub reserved: [u8; 12],
}

impl RawBpb32 {
    pub const SIZE: usize = 28;
}
