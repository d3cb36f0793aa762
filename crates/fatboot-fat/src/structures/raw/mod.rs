//! Fixed-layout on-disk records, reinterpreted in place with `bytemuck`.
//!
//! Nothing in this module understands higher-level semantics; each record
//! is a plain little-endian byte layout with field access. Layouts are
//! pinned by `const_assert_eq!` checks in the test modules.

pub mod boot_sector;
pub mod directory;
pub mod fs_info;
