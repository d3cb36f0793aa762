//! Partition-table discovery over memory-mapped disk images.
//!
//! [`DiskImage`] maps an image file (or block device) into the address
//! space and probes it for a partitioning scheme: GPT at LBA 1, GPT at
//! LBA 0, then an MBR boot signature. The resulting [`PartitionTable`]
//! hands out [`Partition`] views, each of which is a byte range into the
//! shared mapping together with the partition's type and label.
//!
//! ```no_run
//! use fatboot_part::{Access, DiskImage};
//!
//! let img = DiskImage::open("test.img", Access::Read)?;
//! for part in img.partitions()?.iter() {
//!     println!("{}: {} ({})", part.num(), part.label(), part.len());
//! }
//! # Ok::<(), fatboot_part::PartError>(())
//! ```

pub mod disk;
pub mod gpt;
pub mod mbr;

pub use disk::{Access, DiskImage, Mapping, Partition, PartitionKind, PartitionTable, Scheme};
pub use gpt::Guid;

/// Errors arising from image mapping and partition-table discovery.
#[derive(Debug, thiserror::Error)]
pub enum PartError {
    /// The image carries no recognizable partitioning scheme, or the
    /// scheme it does carry is corrupt (bad signature, revision, header
    /// size, CRC, or EBR chain).
    #[error("invalid partition table: {0}")]
    InvalidFormat(String),

    /// The requested partition number does not exist.
    #[error("no partition {0} in table")]
    UnknownPartition(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PartError>;
