//! Shared building blocks for the fatboot crates.
//!
//! This crate carries the pieces that more than one member of the workspace
//! needs: byte-backed integers with a fixed endianness for packed on-disk
//! records, fixed-length UTF-16 strings (GPT partition labels), a CRC-32
//! wrapper, and the re-entrant readers-writer lock that serializes mutation
//! of the FAT structures.

pub mod hash;
pub mod str;
pub mod sync;
pub mod types;
