//! Endianness marker types for packed on-disk records.
//!
//! The number types [`crate::types::number::U16`],
//! [`crate::types::number::U32`], and [`crate::types::number::U64`] store
//! their value as a byte array and decode it with the endianness named at
//! the type level. Every multi-byte field of an on-disk structure in this
//! workspace is little-endian; the big-endian marker exists for wire
//! formats (TFTP carries big-endian block numbers).

/// A type-level byte order.
///
/// This trait shouldn't be implemented directly; it exists so the byte-backed
/// number types can be generic over [`LittleEndian`] and [`BigEndian`].
pub trait Endianness: Copy + Sized {
    /// Reads a `u16` from the given bytes in this endianness.
    fn get_u16(bytes: [u8; 2]) -> u16;
    /// Writes a `u16` to the given bytes in this endianness.
    fn set_u16(value: u16, bytes: &mut [u8; 2]);
    /// Reads a `u32` from the given bytes in this endianness.
    fn get_u32(bytes: [u8; 4]) -> u32;
    /// Writes a `u32` to the given bytes in this endianness.
    fn set_u32(value: u32, bytes: &mut [u8; 4]);
    /// Reads a `u64` from the given bytes in this endianness.
    fn get_u64(bytes: [u8; 8]) -> u64;
    /// Writes a `u64` to the given bytes in this endianness.
    fn set_u64(value: u64, bytes: &mut [u8; 8]);
}

/// Little endianness: the least significant byte is stored at the lowest
/// address.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, bytemuck::Zeroable, bytemuck::Pod)]
pub struct LittleEndian;

/// Big endianness: the most significant byte is stored at the lowest
/// address.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BigEndian;

impl Endianness for LittleEndian {
    #[inline]
    fn get_u16(bytes: [u8; 2]) -> u16 {
        u16::from_le_bytes(bytes)
    }

    #[inline]
    fn set_u16(value: u16, bytes: &mut [u8; 2]) {
        bytes.copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn get_u32(bytes: [u8; 4]) -> u32 {
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn set_u32(value: u32, bytes: &mut [u8; 4]) {
        bytes.copy_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn get_u64(bytes: [u8; 8]) -> u64 {
        u64::from_le_bytes(bytes)
    }

    #[inline]
    fn set_u64(value: u64, bytes: &mut [u8; 8]) {
        bytes.copy_from_slice(&value.to_le_bytes());
    }
}

impl Endianness for BigEndian {
    #[inline]
    fn get_u16(bytes: [u8; 2]) -> u16 {
        u16::from_be_bytes(bytes)
    }

    #[inline]
    fn set_u16(value: u16, bytes: &mut [u8; 2]) {
        bytes.copy_from_slice(&value.to_be_bytes());
    }

    #[inline]
    fn get_u32(bytes: [u8; 4]) -> u32 {
        u32::from_be_bytes(bytes)
    }

    #[inline]
    fn set_u32(value: u32, bytes: &mut [u8; 4]) {
        bytes.copy_from_slice(&value.to_be_bytes());
    }

    #[inline]
    fn get_u64(bytes: [u8; 8]) -> u64 {
        u64::from_be_bytes(bytes)
    }

    #[inline]
    fn set_u64(value: u64, bytes: &mut [u8; 8]) {
        bytes.copy_from_slice(&value.to_be_bytes());
    }
}

/// A value with a type-level endianness.
///
/// Implemented by the byte-backed number types. `Output` is the primitive
/// type the value decodes to.
pub trait Endian {
    /// The primitive type returned when reading the value.
    type Output;

    /// Creates a new instance holding *value*.
    fn new(value: Self::Output) -> Self;
    /// Returns the decoded value.
    fn get(&self) -> Self::Output;
    /// Replaces the stored value.
    fn set(&mut self, value: Self::Output);
}
