use crate::types::endian::{Endian, LittleEndian};
use crate::types::number::U16;

/// A fixed-length UTF-16LE string as found in GPT partition entries.
///
/// The on-disk form is `N` little-endian code units, NUL-padded. Decoding
/// stops at the first NUL; unpaired surrogates are replaced.
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
pub struct FixedUtf16Str<const N: usize> {
    data: [U16<LittleEndian>; N],
}

unsafe impl<const N: usize> bytemuck::Pod for FixedUtf16Str<N> {}
unsafe impl<const N: usize> bytemuck::Zeroable for FixedUtf16Str<N> {}

impl<const N: usize> FixedUtf16Str<N> {
    /// Builds a new value from *s*, truncating at `N` code units.
    pub fn from_str(s: &str) -> Self {
        let mut data = [U16::new(0); N];
        for (slot, unit) in data.iter_mut().zip(s.encode_utf16()) {
            slot.set(unit);
        }
        Self { data }
    }

    /// Decodes the string, stopping at the first NUL code unit.
    pub fn to_string(&self) -> String {
        let units: Vec<u16> = self
            .data
            .iter()
            .map(|c| c.get())
            .take_while(|&c| c != 0)
            .collect();
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}
