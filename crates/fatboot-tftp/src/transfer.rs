//! Per-client transfer state: the block cache, option negotiation, and
//! progress accounting.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::netascii::Transcoder;
use crate::wire::{
    Mode, TFTP_BLKSIZE, TFTP_DEF_BLKSIZE, TFTP_DEF_TIMEOUT, TFTP_MAX_BLKSIZE, TFTP_MAX_TIMEOUT,
    TFTP_MIN_BLKSIZE, TFTP_MIN_TIMEOUT, TFTP_OPTIONS, TFTP_TIMEOUT, TFTP_TSIZE, TFTP_UTIMEOUT,
};

/// Outcomes internal to the transfer state machine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The terminal short block was sent and acknowledged; the transfer
    /// is complete. Signals normal completion, never surfaced to the
    /// client.
    #[error("transfer completed")]
    Done,

    /// A block that was already transmitted *and* acknowledged was
    /// requested again (a late duplicate ACK); no re-transmit is
    /// necessary.
    #[error("no re-transmit necessary")]
    AlreadyAcknowledged,

    /// A block beyond the next unread one was requested.
    #[error("invalid block number requested")]
    InvalidBlock,

    /// The client negotiated pathologically silly or dangerous option
    /// values.
    #[error("bad options: {0}")]
    BadOptions(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// The byte stream feeding a transfer.
///
/// Octet transfers keep the source seekable so `tsize` can be probed;
/// netascii transfers wrap it in a [`Transcoder`], after which the size
/// is unknowable (deliberately: computing it would mean transcoding the
/// whole stream up front) and the `tsize` option is dropped.
pub enum TransferSource {
    Seekable(Box<dyn ReadSeek>),
    Stream(Box<dyn Read + Send>),
}

impl TransferSource {
    /// The remaining size of the stream, determined by seeking to the
    /// end and back. Fails for unseekable streams.
    fn size(&mut self) -> io::Result<u64> {
        match self {
            TransferSource::Seekable(source) => {
                let pos = source.stream_position()?;
                let size = source.seek(SeekFrom::End(0))?;
                source.seek(SeekFrom::Start(pos))?;
                Ok(size)
            }
            TransferSource::Stream(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream size is not knowable",
            )),
        }
    }

    /// Reads up to *len* bytes (short only at end of stream).
    fn read_block(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let n = match self {
                TransferSource::Seekable(s) => s.read(&mut buf[read..])?,
                TransferSource::Stream(s) => s.read(&mut buf[read..])?,
            };
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }
}

/// The state of a single transfer with one client.
///
/// Block numbers here are logical (unbounded); the wire carries their
/// low 16 bits. `blocks` caches blocks that were read and transmitted
/// but not yet acknowledged; in a lockstep transfer, at most one.
pub struct Transfer {
    pub address: SocketAddr,
    source: TransferSource,
    pub mode: Mode,
    pub block_size: usize,
    blocks: HashMap<u64, Vec<u8>>,
    blocks_read: u64,
    last_ack_size: Option<usize>,
    /// Time before an unacknowledged block is re-sent.
    pub timeout: Duration,
    pub started: Instant,
    pub last_recv: Instant,
    pub last_send: Option<Instant>,
}

impl Transfer {
    pub fn new(address: SocketAddr, source: TransferSource, mode: Mode) -> Self {
        let source = match mode {
            Mode::Octet => source,
            Mode::Netascii => {
                let inner: Box<dyn Read + Send> = match source {
                    TransferSource::Seekable(s) => Box::new(Transcoder::new(s)),
                    TransferSource::Stream(s) => Box::new(Transcoder::new(s)),
                };
                TransferSource::Stream(inner)
            }
        };
        let now = Instant::now();
        Self {
            address,
            source,
            mode,
            block_size: TFTP_DEF_BLKSIZE,
            blocks: HashMap::new(),
            blocks_read: 0,
            last_ack_size: None,
            timeout: TFTP_DEF_TIMEOUT,
            started: now,
            last_recv: now,
            last_send: None,
        }
    }

    /// Negotiates *options* from the client's RRQ. Unrecognized names
    /// are dropped; the rest keep their client order with the values
    /// adjusted to what the server accepts. An empty result means no
    /// OACK: the reply is the first DATA packet.
    pub fn negotiate(
        &mut self,
        options: &[(String, String)],
    ) -> Result<Vec<(String, String)>, TransferError> {
        let mut accepted: Vec<(String, String)> = Vec::new();
        let mut utimeout = false;
        for (name, value) in options {
            if !TFTP_OPTIONS.contains(&name.as_str()) {
                continue;
            }
            match name.as_str() {
                TFTP_BLKSIZE => {
                    // Block sizes below 8 are silly per RFC 2348
                    let requested: usize = value
                        .parse()
                        .map_err(|_| TransferError::BadOptions("unparseable block size".into()))?;
                    self.block_size = requested.min(TFTP_MAX_BLKSIZE);
                    if self.block_size < TFTP_MIN_BLKSIZE {
                        return Err(TransferError::BadOptions("silly block size".into()));
                    }
                    accepted.push((name.clone(), self.block_size.to_string()));
                }
                TFTP_TSIZE => {
                    // Where the size cannot (cheaply) be determined
                    // (netascii), the option is simply dropped
                    if let Ok(size) = self.source.size() {
                        accepted.push((name.clone(), size.to_string()));
                    }
                }
                TFTP_TIMEOUT => {
                    // Seconds; fractions tolerated
                    let seconds: f64 = value
                        .parse()
                        .map_err(|_| TransferError::BadOptions("unparseable timeout".into()))?;
                    if !seconds.is_finite() || seconds < 0.0 {
                        return Err(TransferError::BadOptions("silly timeout".into()));
                    }
                    self.timeout = Duration::from_secs_f64(seconds);
                    accepted.push((name.clone(), value.clone()));
                }
                TFTP_UTIMEOUT => {
                    let micros: u64 = value
                        .parse()
                        .map_err(|_| TransferError::BadOptions("unparseable utimeout".into()))?;
                    self.timeout = Duration::from_micros(micros);
                    utimeout = true;
                    accepted.push((name.clone(), value.clone()));
                }
                _ => unreachable!("filtered above"),
            }
        }
        if utimeout {
            // utimeout wins over timeout regardless of their order;
            // dropping timeout from the reply tells the client so
            accepted.retain(|(name, _)| name != TFTP_TIMEOUT);
        }
        if !(TFTP_MIN_TIMEOUT..=TFTP_MAX_TIMEOUT).contains(&self.timeout) {
            return Err(TransferError::BadOptions("silly timeout".into()));
        }
        Ok(accepted)
    }

    /// Returns block *n* (1-based).
    ///
    /// The next unread block comes from the source and is cached until
    /// acknowledged; a cached block is returned again for re-transmit.
    /// An already-acknowledged block raises
    /// [`TransferError::AlreadyAcknowledged`], a past-future block
    /// [`TransferError::InvalidBlock`], and any request after the
    /// terminal short block was acknowledged [`TransferError::Done`].
    pub fn get_block(&mut self, n: u64) -> Result<Vec<u8>, TransferError> {
        if n == self.blocks_read + 1 {
            if self.finished() {
                return Err(TransferError::Done);
            }
            let block = self.source.read_block(self.block_size)?;
            self.blocks.insert(n, block.clone());
            self.blocks_read += 1;
            return Ok(block);
        }
        if let Some(block) = self.blocks.get(&n) {
            // Re-transmit of an unacknowledged block (its DATA packet
            // was presumably lost); blocks_read is not updated
            return Ok(block.clone());
        }
        if n <= self.blocks_read {
            Err(TransferError::AlreadyAcknowledged)
        } else {
            Err(TransferError::InvalidBlock)
        }
    }

    /// Records the client's acknowledgement of block *n*, dropping it
    /// from the cache.
    pub fn ack(&mut self, n: u64) {
        if let Some(block) = self.blocks.remove(&n) {
            self.last_ack_size = Some(block.len());
        }
    }

    /// Widens a 16-bit wire block number to the logical one, assuming
    /// lockstep (the outstanding block is the last one read).
    pub fn widen_block(&self, wire: u16) -> u64 {
        if self.blocks_read > 0 && self.blocks_read as u16 == wire {
            self.blocks_read
        } else {
            wire as u64
        }
    }

    /// The blocks currently awaiting acknowledgement.
    pub fn unacknowledged(&self) -> impl Iterator<Item = (u64, &[u8])> {
        self.blocks.iter().map(|(&n, b)| (n, b.as_slice()))
    }

    /// Bytes transferred to the client and acknowledged.
    pub fn transferred(&self) -> u64 {
        match self.last_ack_size {
            None => 0,
            Some(last) => (self.blocks_read - 1) * self.block_size as u64 + last as u64,
        }
    }

    /// A transfer completes when the final (under-sized) block has been
    /// sent *and acknowledged*, per RFC 1350.
    pub fn finished(&self) -> bool {
        self.last_ack_size
            .is_some_and(|last| last < self.block_size)
    }
}
