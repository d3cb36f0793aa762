use fatboot_common::types::{LittleEndian, U16, U32};

/// A 32-byte FAT directory entry.
///
/// The 8.3 name is space padded; a first byte of 0xE5 marks a deleted
/// entry and 0x00 terminates the directory (every following slot is
/// free). An `attr` of 0x0F means the slot actually holds a
/// [`RawLfnEntry`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawDirEntry {
    /// DIR_Name (8.3 basis)
    pub filename: [u8; 8],
    /// DIR_Name extension part
    pub ext: [u8; 3],
    /// DIR_Attr
    pub attr: u8,
    /// DIR_NTRes
    pub attr2: u8,
    /// DIR_CrtTimeTenth, creation time in 10 ms units, 0..=199
    pub ctime_ms: u8,
    /// DIR_CrtTime
    pub ctime: U16<LittleEndian>,
    /// DIR_CrtDate
    pub cdate: U16<LittleEndian>,
    /// DIR_LstAccDate
    pub adate: U16<LittleEndian>,
    /// DIR_FstClusHI, always 0 on FAT12/16
    pub first_cluster_hi: U16<LittleEndian>,
    /// DIR_WrtTime
    pub mtime: U16<LittleEndian>,
    /// DIR_WrtDate
    pub mdate: U16<LittleEndian>,
    /// DIR_FstClusLO
    pub first_cluster_lo: U16<LittleEndian>,
    /// DIR_FileSize
    pub size: U32<LittleEndian>,
}

impl RawDirEntry {
    pub const SIZE: usize = 32;
}

/// A long-filename overlay on the 32-byte directory slot, marked by
/// `attr == 0x0F`.
///
/// Several of these precede their short entry in *reverse* character
/// order. The sequence byte carries the fragment index in its low 5 bits
/// with bit 6 set on the first fragment in wire order (the last in
/// character order); 13 UTF-16LE code units are split 5+6+2 across the
/// three name fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawLfnEntry {
    /// LDIR_Ord
    pub sequence: u8,
    /// LDIR_Name1, code units 0..5
    pub name_1: [u8; 10],
    /// LDIR_Attr, always 0x0F
    pub attr: u8,
    /// LDIR_Type, always 0
    pub reserved: u8,
    /// LDIR_Chksum over the 11 bytes of the following short entry's name
    pub checksum: u8,
    /// LDIR_Name2, code units 5..11
    pub name_2: [u8; 12],
    /// LDIR_FstClusLO, always 0
    pub first_cluster: U16<LittleEndian>,
    /// LDIR_Name3, code units 11..13
    pub name_3: [u8; 4],
}

impl RawLfnEntry {
    pub const SIZE: usize = 32;

    /// Bit set in `sequence` on the terminal fragment.
    pub const LAST_SEQUENCE: u8 = 0x40;

    /// Code units carried per fragment.
    pub const CHARS: usize = 13;
}
