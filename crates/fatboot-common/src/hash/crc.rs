use crc::{CRC_32_ISO_HDLC, Crc};

const HASHER: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 with the ISO-HDLC (IEEE) polynomial, as used by the GPT header
/// and partition-entry array checksums.
#[derive(Debug, Copy, Clone)]
pub struct Crc32;

impl Crc32 {
    pub fn checksum(data: &[u8]) -> u32 {
        HASHER.checksum(data)
    }

    /// Checksum over several non-contiguous chunks, fed in order.
    pub fn checksum_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u32 {
        let mut digest = HASHER.digest();
        for part in parts {
            digest.update(part);
        }
        digest.finalize()
    }
}
