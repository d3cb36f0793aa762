//! The file-serving handler: board serial numbers mapped to FAT file
//! systems inside disk images.
//!
//! A request for `1234abcd/config.txt` looks up the board with serial
//! number `0x1234abcd`, opens (and memoizes) the disk image configured
//! for it, interprets the configured partition as a FAT file system,
//! and resolves `config.txt` against that file system's root.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Mutex;

use fatboot_fat::{FatError, FatFileSystem};
use fatboot_part::{Access, DiskImage, PartError};
use tracing::{debug, info};

use crate::server::{Handler, HandlerError};
use crate::transfer::TransferSource;

/// One board to serve: its serial number, the image to serve from, the
/// partition holding the boot file system, and (optionally) the only
/// client address allowed to fetch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub serial: u64,
    pub image: PathBuf,
    pub partition: u32,
    pub ip: Option<IpAddr>,
}

impl Board {
    /// Parses the `SERIAL,FILENAME[,PART[,IP]]` form used by
    /// configuration files and the command line. The serial is hex;
    /// the partition defaults to 1.
    pub fn from_spec(spec: &str) -> Result<Self, String> {
        let fields: Vec<&str> = spec.split(',').collect();
        let (serial, image, part, ip) = match fields.as_slice() {
            [serial, image] => (serial, image, None, None),
            [serial, image, part] => (serial, image, Some(part), None),
            [serial, image, part, ip] => (serial, image, Some(part), Some(ip)),
            _ => return Err(format!("invalid board specification {spec:?}")),
        };
        Ok(Board {
            serial: u64::from_str_radix(serial, 16)
                .map_err(|_| format!("invalid serial number {serial:?}"))?,
            image: PathBuf::from(image),
            partition: match part {
                None => 1,
                Some(part) => part
                    .parse()
                    .map_err(|_| format!("invalid partition number {part:?}"))?,
            },
            ip: match ip {
                None => None,
                Some(ip) => Some(
                    ip.parse()
                        .map_err(|_| format!("invalid address {ip:?}"))?,
                ),
            },
        })
    }
}

/// A board's opened image and file system, cached across requests. The
/// image owns the mapping the file system borrows from, so both live
/// here together.
struct OpenImage {
    _image: DiskImage,
    fs: FatFileSystem,
}

/// The [`Handler`] serving FAT boot partitions to configured boards.
pub struct BootHandler {
    boards: HashMap<u64, Board>,
    images: Mutex<HashMap<u64, OpenImage>>,
}

impl BootHandler {
    pub fn new(boards: impl IntoIterator<Item = Board>) -> Self {
        Self {
            boards: boards.into_iter().map(|b| (b.serial, b)).collect(),
            images: Mutex::new(HashMap::new()),
        }
    }

    /// The file system serving *board*, opened on first use.
    fn file_system(&self, board: &Board) -> Result<FatFileSystem, HandlerError> {
        let mut images = self.images.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(open) = images.get(&board.serial) {
            return Ok(open.fs.clone());
        }
        let image = DiskImage::open(&board.image, Access::Read).map_err(|err| match err {
            PartError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                HandlerError::NotFound(board.image.display().to_string())
            }
            other => HandlerError::Other(other.to_string()),
        })?;
        let partitions = image
            .partitions()
            .map_err(|err| HandlerError::Other(err.to_string()))?;
        let partition = partitions
            .get(board.partition)
            .map_err(|err| HandlerError::Other(err.to_string()))?;
        let fs =
            FatFileSystem::new(partition).map_err(|err| HandlerError::Other(err.to_string()))?;
        info!(
            serial = board.serial,
            image = %board.image.display(),
            partition = board.partition,
            label = fs.label(),
            "opened boot file system"
        );
        let fs_clone = fs.clone();
        images.insert(board.serial, OpenImage { _image: image, fs });
        Ok(fs_clone)
    }
}

impl Handler for BootHandler {
    fn resolve(
        &self,
        filename: &str,
        client: SocketAddr,
    ) -> Result<TransferSource, HandlerError> {
        let trimmed = filename.trim_start_matches('/');
        let (serial, rest) = match trimmed.split_once('/') {
            Some((serial, rest)) => (serial, rest),
            None => (trimmed, ""),
        };
        let serial = u64::from_str_radix(serial, 16)
            .map_err(|_| HandlerError::NotFound(filename.into()))?;
        let board = self
            .boards
            .get(&serial)
            .ok_or_else(|| HandlerError::NotFound(filename.into()))?;
        if let Some(ip) = board.ip {
            if client.ip() != ip {
                return Err(HandlerError::PermissionDenied(
                    "IP does not match".into(),
                ));
            }
        }
        let fs = self.file_system(board)?;
        let path = fs.root().join(rest);
        debug!(serial, path = %path, "resolving");
        let file = path.open().map_err(|err| match err {
            FatError::NotFound(p) => HandlerError::NotFound(p),
            FatError::IsADirectory(p) => HandlerError::Other(format!("is a directory: {p}")),
            FatError::PermissionDenied(p) => HandlerError::PermissionDenied(p),
            other => HandlerError::Other(other.to_string()),
        })?;
        Ok(TransferSource::Seekable(Box::new(file)))
    }
}
