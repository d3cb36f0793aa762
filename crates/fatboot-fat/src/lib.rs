//! A read/write FAT12/FAT16/FAT32 engine over memory-mapped partitions.
//!
//! [`FatFileSystem`] interprets a byte range of a disk-image mapping (see
//! `fatboot-part`) as a FAT file system. The variant in use is detected
//! from the headers at the start of the range. Of primary use is
//! [`FatFileSystem::root`], which returns a [`FatPath`] representing the
//! root directory:
//!
//! ```no_run
//! use fatboot_part::{Access, DiskImage};
//! use fatboot_fat::FatFileSystem;
//!
//! let img = DiskImage::open("test.img", Access::Read)?;
//! let fs = FatFileSystem::new(img.partitions()?.get(1)?)?;
//! for p in fs.root().iterdir()? {
//!     println!("{}", p.name());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Mutation (when the image is mapped writable) is serialized behind a
//! re-entrant readers-writer lock owned by the file system; concurrent
//! readers proceed freely.

pub mod dir;
pub mod file;
pub mod fs;
pub mod path;
pub mod structures;

pub use dir::{DirEntry, DirEntryGroup, FatDirectory, FileAttributes};
pub use file::FatFile;
pub use fs::{FatFileSystem, FsOptions};
pub use path::{FatPath, FatStat, OpenOptions};

/// The FAT variant in use, named by the width of an allocation-table
/// entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl std::fmt::Display for FatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FatType::Fat12 => "fat12",
            FatType::Fat16 => "fat16",
            FatType::Fat32 => "fat32",
        })
    }
}

/// Errors arising from the FAT engine.
#[derive(Debug, thiserror::Error)]
pub enum FatError {
    /// The headers do not describe a FAT file system this implementation
    /// can drive.
    #[error("invalid file system format: {0}")]
    InvalidFormat(String),

    /// The allocation table (or a fixed root directory) is exhausted.
    #[error("no space left on device")]
    NoSpace,

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("file exists: {0}")]
    Exists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// A cluster index outside the allocation table (or the reserved
    /// entries 0 and 1 where they are not addressable).
    #[error("cluster {0} out of range")]
    IndexError(u32),

    /// A value too wide for the allocation-table entry width, or an
    /// invalid name or timestamp.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The file system backing a path has been closed.
    #[error("file system is closed")]
    Closed,

    /// Paths on different file systems cannot be compared or renamed
    /// across.
    #[error("operation spans two file systems")]
    CrossFileSystem,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<FatError> for std::io::Error {
    fn from(err: FatError) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            FatError::NotFound(_) => ErrorKind::NotFound,
            FatError::Exists(_) => ErrorKind::AlreadyExists,
            FatError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            FatError::NoSpace => ErrorKind::StorageFull,
            FatError::NotADirectory(_) => ErrorKind::NotADirectory,
            FatError::IsADirectory(_) => ErrorKind::IsADirectory,
            FatError::DirectoryNotEmpty(_) => ErrorKind::DirectoryNotEmpty,
            FatError::InvalidValue(_) | FatError::InvalidFormat(_) => ErrorKind::InvalidInput,
            FatError::Io(e) => e.kind(),
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, FatError>;
