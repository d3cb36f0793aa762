//! A read-only TFTP server for FAT boot partitions inside disk images.
//!
//! The server implements RFC 1350 plus the option-negotiation, block
//! size, transfer-size, and (u)timeout extensions. Topology follows the
//! protocol's transfer-identifier rules: the well-known port receives
//! only initial read requests; every accepted transfer is handed to a
//! sub-server on a fresh ephemeral port (a fresh TID) with its own
//! thread and re-transmission timer, reaped by a supervisor thread.
//!
//! [`boot::BootHandler`] is the file-serving handler: the first
//! component of a requested path is a board's hex serial number, which
//! maps to a configured disk image; the rest of the path resolves
//! inside the FAT file system found on the configured partition of that
//! image.

pub mod boot;
pub mod netascii;
pub mod server;
pub mod transfer;
pub mod wire;

pub use boot::{Board, BootHandler};
pub use server::{Handler, HandlerError, TftpServer};
pub use transfer::{Transfer, TransferError, TransferSource};
pub use wire::{ErrorCode, Mode, Packet, WireError};
