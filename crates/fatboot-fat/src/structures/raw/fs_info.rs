use fatboot_common::types::{Endian, LittleEndian, U32};

/// The FAT32 FSInfo sector, pointed at by `RawBpb32::info_sector`.
///
/// Carries an advisory free-cluster count and a last-allocated hint; both
/// are only trustworthy when all three signatures check out.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RawFsInfo {
    /// FSI_LeadSig, "RRaA"
    pub sig1: [u8; 4],
    /// FSI_Reserved1
    pub reserved1: [u8; 480],
    /// FSI_StrucSig, "rrAa"
    pub sig2: [u8; 4],
    /// FSI_Free_Count
    ///
    /// Number of free clusters, or 0xFFFFFFFF when unknown
    pub free_clusters: U32<LittleEndian>,
    /// FSI_Nxt_Free
    ///
    /// Cluster number allocation should resume after, or 0xFFFFFFFF
    pub last_alloc: U32<LittleEndian>,
    /// FSI_Reserved2
    pub reserved2: [u8; 12],
    /// FSI_TrailSig
    pub sig3: [u8; 4],
}

pub const FSINFO_SIG1: [u8; 4] = *b"RRaA";
pub const FSINFO_SIG2: [u8; 4] = *b"rrAa";
pub const FSINFO_SIG3: [u8; 4] = [0x00, 0x00, 0x55, 0xAA];

/// Byte offset of `free_clusters` within the sector.
pub const FSINFO_FREE_OFFSET: usize = 488;
/// Byte offset of `last_alloc` within the sector.
pub const FSINFO_LAST_ALLOC_OFFSET: usize = 492;

impl RawFsInfo {
    pub const SIZE: usize = 512;

    pub fn is_valid(&self) -> bool {
        self.sig1 == FSINFO_SIG1 && self.sig2 == FSINFO_SIG2 && self.sig3 == FSINFO_SIG3
    }

    pub fn new(free_clusters: u32, last_alloc: u32) -> Self {
        let mut info: Self = bytemuck::Zeroable::zeroed();
        info.sig1 = FSINFO_SIG1;
        info.sig2 = FSINFO_SIG2;
        info.sig3 = FSINFO_SIG3;
        info.free_clusters = U32::new(free_clusters);
        info.last_alloc = U32::new(last_alloc);
        info
    }
}

impl std::fmt::Debug for RawFsInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFsInfo")
            .field("valid", &self.is_valid())
            .field("free_clusters", &{ self.free_clusters })
            .field("last_alloc", &{ self.last_alloc })
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<RawFsInfo>(), 512);
    const_assert_eq!(offset_of!(RawFsInfo, sig2), 484);
    const_assert_eq!(offset_of!(RawFsInfo, free_clusters), FSINFO_FREE_OFFSET);
    const_assert_eq!(offset_of!(RawFsInfo, last_alloc), FSINFO_LAST_ALLOC_OFFSET);
    const_assert_eq!(offset_of!(RawFsInfo, sig3), 508);

    #[test]
    fn test_new_is_valid() {
        assert!(RawFsInfo::new(100, 2).is_valid());
    }
}
