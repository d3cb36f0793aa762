//! FAT directories: 32-byte slot streams with long-filename overlays.
//!
//! A directory is a byte stream of 32-byte slots (the fixed root region
//! on FAT12/16, a cluster chain otherwise). A slot is one of: a short
//! entry, a long-filename fragment (`attr == 0x0F`), a deleted slot
//! (first byte 0xE5), a volume label, or the terminator (first byte
//! 0x00, after which every slot is implicitly free). Iteration groups
//! each run of LFN fragments with the short entry that follows it; the
//! raw slots never escape this module.

use std::sync::Arc;

use chrono::NaiveDateTime;
use fatboot_common::types::{Endian, U16, U32};
use tracing::warn;

use crate::fs::FsInner;
use crate::structures::fat::{ClusterRegion, FatTable};
use crate::structures::raw::directory::{RawDirEntry, RawLfnEntry};
use crate::structures::time::{decode_date, decode_timestamp, encode_timestamp};
use crate::{FatError, FatType, Result};

bitflags::bitflags! {
    /// The attribute byte of a directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// The four low attribute bits together mark an LFN fragment.
pub(crate) const ATTR_LFN: u8 = 0x0F;

/// Characters that may not appear in a long filename.
const LFN_FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Whether *name* is usable as a long filename.
pub(crate) fn valid_name(name: &str) -> bool {
    let units = name.encode_utf16().count();
    units > 0
        && units <= 255
        && name != "."
        && name != ".."
        && !name
            .chars()
            .any(|c| c.is_control() || LFN_FORBIDDEN.contains(&c))
}

/// The LFN checksum: a one-byte rotate-right-and-add over the 11 bytes
/// of the short entry's name.
pub(crate) fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, &b| (sum >> 1).wrapping_add((sum & 1) << 7).wrapping_add(b))
}

fn short_name_bytes(raw: &RawDirEntry) -> [u8; 11] {
    let mut name = [0u8; 11];
    name[..8].copy_from_slice(&raw.filename);
    name[8..].copy_from_slice(&raw.ext);
    name
}

/// Decodes an 8.3 name. Short names use a single-byte encoding; this
/// implementation decodes them as ISO-8859-1.
fn decode_sfn(filename: &[u8; 8], ext: &[u8; 3]) -> String {
    let mut filename = *filename;
    // 0x05 stands in for an initial 0xE5 (the deleted marker)
    if filename[0] == 0x05 {
        filename[0] = 0xE5;
    }
    let decode = |bytes: &[u8]| -> String {
        bytes
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end_matches(' ')
            .to_string()
    };
    let stem = decode(&filename);
    let ext = decode(ext);
    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

/// Splits *name* into the sequence of LFN fragments preceding a short
/// entry with the given *checksum*, in wire order (terminal fragment
/// first). The final fragment is NUL terminated when there is room and
/// padded with 0xFFFF.
pub(crate) fn lfn_split(name: &str, checksum: u8) -> Vec<RawLfnEntry> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let count = units.len().div_ceil(RawLfnEntry::CHARS);
    let mut entries = Vec::with_capacity(count);
    for index in (0..count).rev() {
        let mut chunk = [0xFFFFu16; RawLfnEntry::CHARS];
        let start = index * RawLfnEntry::CHARS;
        let slice = &units[start..units.len().min(start + RawLfnEntry::CHARS)];
        chunk[..slice.len()].copy_from_slice(slice);
        if slice.len() < RawLfnEntry::CHARS {
            chunk[slice.len()] = 0;
        }
        let mut entry: RawLfnEntry = bytemuck::Zeroable::zeroed();
        entry.sequence = (index + 1) as u8
            | if index + 1 == count {
                RawLfnEntry::LAST_SEQUENCE
            } else {
                0
            };
        entry.attr = ATTR_LFN;
        entry.checksum = checksum;
        for (i, unit) in chunk.iter().enumerate() {
            let bytes = unit.to_le_bytes();
            match i {
                0..5 => entry.name_1[i * 2..i * 2 + 2].copy_from_slice(&bytes),
                5..11 => entry.name_2[(i - 5) * 2..(i - 5) * 2 + 2].copy_from_slice(&bytes),
                _ => entry.name_3[(i - 11) * 2..(i - 11) * 2 + 2].copy_from_slice(&bytes),
            }
        }
        entries.push(entry);
    }
    entries
}

/// Assembles and validates a run of LFN fragments (in wire order)
/// against the short entry that followed them.
///
/// Returns `None` (after logging a warning) when the run is missing or
/// duplicated fragments, fails the checksum, or carries a non-zero first
/// cluster; the caller then falls back to the short name.
pub(crate) fn lfn_assemble(fragments: &[RawLfnEntry], short: &RawDirEntry) -> Option<String> {
    if fragments.is_empty() {
        return None;
    }
    let checksum = lfn_checksum(&short_name_bytes(short));
    let count = fragments.len() as u8;
    if fragments[0].sequence & RawLfnEntry::LAST_SEQUENCE == 0 {
        warn!("long filename run without a terminal fragment");
        return None;
    }
    let mut units = Vec::with_capacity(fragments.len() * RawLfnEntry::CHARS);
    for (i, fragment) in fragments.iter().enumerate() {
        let expected = count - i as u8;
        if fragment.sequence & 0x1F != expected {
            warn!("long filename fragments out of sequence");
            return None;
        }
        if fragment.checksum != checksum {
            warn!("long filename checksum mismatch");
            return None;
        }
        if fragment.first_cluster.get() != 0 {
            warn!("long filename fragment with non-zero cluster");
            return None;
        }
    }
    // Character order is the reverse of wire order
    for fragment in fragments.iter().rev() {
        for i in 0..RawLfnEntry::CHARS {
            let bytes = match i {
                0..5 => [fragment.name_1[i * 2], fragment.name_1[i * 2 + 1]],
                5..11 => [fragment.name_2[(i - 5) * 2], fragment.name_2[(i - 5) * 2 + 1]],
                _ => [fragment.name_3[(i - 11) * 2], fragment.name_3[(i - 11) * 2 + 1]],
            };
            units.push(u16::from_le_bytes(bytes));
        }
    }
    if let Some(nul) = units.iter().position(|&u| u == 0) {
        units.truncate(nul);
    }
    while units.last() == Some(&0xFFFF) {
        units.pop();
    }
    Some(
        char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    )
}

/// A decoded short directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub(crate) raw: RawDirEntry,
}

impl DirEntry {
    pub(crate) fn new_file(now: NaiveDateTime) -> Result<Self> {
        let (date, time, ms) = encode_timestamp(now)?;
        let mut raw: RawDirEntry = bytemuck::Zeroable::zeroed();
        raw.attr = FileAttributes::ARCHIVE.bits();
        raw.ctime_ms = ms;
        raw.ctime = U16::new(time);
        raw.cdate = U16::new(date);
        raw.mtime = U16::new(time);
        raw.mdate = U16::new(date);
        raw.adate = U16::new(date);
        Ok(Self { raw })
    }

    pub(crate) fn new_dir(now: NaiveDateTime, cluster: u32, fat_type: FatType) -> Result<Self> {
        let mut entry = Self::new_file(now)?;
        entry.raw.attr = FileAttributes::DIRECTORY.bits();
        entry.set_first_cluster(cluster, fat_type);
        Ok(entry)
    }

    pub fn attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.raw.attr)
    }

    pub fn is_dir(&self) -> bool {
        self.attributes().contains(FileAttributes::DIRECTORY)
    }

    pub fn size(&self) -> u64 {
        self.raw.size.get() as u64
    }

    pub(crate) fn set_size(&mut self, size: u32) {
        self.raw.size = U32::new(size);
    }

    /// The first cluster of the entry's data. The high half of the field
    /// is only meaningful on FAT32.
    pub fn first_cluster(&self, fat_type: FatType) -> u32 {
        let lo = self.raw.first_cluster_lo.get() as u32;
        match fat_type {
            FatType::Fat32 => ((self.raw.first_cluster_hi.get() as u32) << 16) | lo,
            _ => lo,
        }
    }

    pub(crate) fn set_first_cluster(&mut self, cluster: u32, fat_type: FatType) {
        self.raw.first_cluster_lo = U16::new(cluster as u16);
        self.raw.first_cluster_hi = U16::new(match fat_type {
            FatType::Fat32 => (cluster >> 16) as u16,
            _ => 0,
        });
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        decode_timestamp(self.raw.cdate.get(), self.raw.ctime.get(), self.raw.ctime_ms)
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        decode_timestamp(self.raw.mdate.get(), self.raw.mtime.get(), 0)
    }

    pub fn accessed(&self) -> Option<NaiveDateTime> {
        decode_date(self.raw.adate.get())
    }

    /// Stamps the modification time, truncated to the 2-second grid.
    pub(crate) fn set_modified(&mut self, now: NaiveDateTime) -> Result<()> {
        let (date, time, _) = encode_timestamp(now)?;
        self.raw.mdate = U16::new(date);
        self.raw.mtime = U16::new(time);
        Ok(())
    }

    pub(crate) fn set_accessed(&mut self, now: NaiveDateTime) -> Result<()> {
        let (date, _, _) = encode_timestamp(now)?;
        self.raw.adate = U16::new(date);
        Ok(())
    }

    /// The entry's 8.3 name, decoded.
    pub fn sfn(&self) -> String {
        decode_sfn(&self.raw.filename, &self.raw.ext)
    }
}

/// One logical directory entry: a short entry and (when present and
/// valid) the long name assembled from the LFN fragments before it.
#[derive(Debug, Clone)]
pub struct DirEntryGroup {
    /// The assembled long name, when valid fragments preceded the entry.
    pub long_name: Option<String>,
    /// The decoded 8.3 name.
    pub sfn: String,
    pub entry: DirEntry,
    /// Slot index of the first slot of the group.
    pub(crate) start_slot: usize,
    /// Slots spanned, LFN fragments included.
    pub(crate) span: usize,
}

impl DirEntryGroup {
    /// The name this entry goes by: the long name when present, else the
    /// short one.
    pub fn name(&self) -> &str {
        self.long_name.as_deref().unwrap_or(&self.sfn)
    }

    pub(crate) fn matches(&self, name: &str) -> bool {
        self.name().to_lowercase() == name.to_lowercase()
    }
}

/// One decoded slot.
enum Slot {
    Terminator,
    Deleted,
    VolumeLabel,
    LongFragment(RawLfnEntry),
    Short(RawDirEntry),
}

fn decode_slot(bytes: &[u8; RawDirEntry::SIZE]) -> Slot {
    match bytes[0] {
        0x00 => return Slot::Terminator,
        0xE5 => return Slot::Deleted,
        _ => {}
    }
    let attr = bytes[11];
    if attr == ATTR_LFN {
        Slot::LongFragment(bytemuck::pod_read_unaligned(bytes))
    } else if attr & FileAttributes::VOLUME_LABEL.bits() != 0 {
        Slot::VolumeLabel
    } else {
        Slot::Short(bytemuck::pod_read_unaligned(bytes))
    }
}

/// Where a directory's slots live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirStorage {
    /// The fixed root region of a FAT12/16 volume. Cannot grow.
    Root,
    /// A cluster chain starting at the given cluster.
    Chain(u32),
}

/// Random access to a directory's slots, with the cluster chain resolved
/// once up front.
struct SlotReader {
    fs: Arc<FsInner>,
    storage: DirStorage,
    chain: Vec<u32>,
}

impl SlotReader {
    fn new(fs: Arc<FsInner>, storage: DirStorage) -> Self {
        let chain = match storage {
            DirStorage::Root => Vec::new(),
            DirStorage::Chain(start) => FatTable::new(&fs).chain(start).collect(),
        };
        Self { fs, storage, chain }
    }

    fn count(&self) -> usize {
        match self.storage {
            DirStorage::Root => self.fs.root_size / RawDirEntry::SIZE,
            DirStorage::Chain(_) => {
                self.chain.len() * self.fs.cluster_size / RawDirEntry::SIZE
            }
        }
    }

    fn location(&self, index: usize) -> Option<usize> {
        let byte = index * RawDirEntry::SIZE;
        match self.storage {
            DirStorage::Root => {
                (byte + RawDirEntry::SIZE <= self.fs.root_size)
                    .then(|| self.fs.root_offset + byte)
            }
            DirStorage::Chain(_) => {
                let cluster = *self.chain.get(byte / self.fs.cluster_size)?;
                let offset = byte % self.fs.cluster_size;
                Some(
                    self.fs.data_offset
                        + (cluster as usize - 2) * self.fs.cluster_size
                        + offset,
                )
            }
        }
    }

    fn read(&self, index: usize) -> Option<[u8; RawDirEntry::SIZE]> {
        let offset = self.location(index)?;
        let bytes = self.fs.mem.slice(offset..offset + RawDirEntry::SIZE)?;
        Some(bytes.try_into().unwrap())
    }

    fn write(&self, index: usize, bytes: &[u8; RawDirEntry::SIZE]) -> Result<()> {
        let offset = self
            .location(index)
            .ok_or_else(|| FatError::InvalidValue(format!("slot {index} out of range")))?;
        self.fs.mem.write_at(offset, bytes)?;
        Ok(())
    }

    /// Extends the directory by one (zeroed) cluster. The fixed root
    /// cannot grow.
    fn grow(&mut self) -> Result<()> {
        match self.storage {
            DirStorage::Root => Err(FatError::NoSpace),
            DirStorage::Chain(_) => {
                let table = FatTable::new(&self.fs);
                let new = table.alloc()?;
                table.mark_end(new)?;
                ClusterRegion::new(&self.fs).zero(new)?;
                if let Some(&last) = self.chain.last() {
                    table.set(last, new)?;
                }
                self.chain.push(new);
                Ok(())
            }
        }
    }
}

/// A directory in a FAT file system.
///
/// Obtained from [`crate::FatFileSystem::open_dir`] or through the path
/// facade; iteration yields [`DirEntryGroup`]s with volume labels and
/// the `.`/`..` entries hidden.
#[derive(Clone)]
pub struct FatDirectory {
    fs: Arc<FsInner>,
    storage: DirStorage,
}

impl std::fmt::Debug for FatDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatDirectory")
            .field("cluster", &self.first_cluster())
            .finish()
    }
}

impl FatDirectory {
    pub(crate) fn new(fs: Arc<FsInner>, cluster: u32) -> Self {
        let storage = match (cluster, fs.fat_type) {
            (0, FatType::Fat12 | FatType::Fat16) => DirStorage::Root,
            (0, FatType::Fat32) => DirStorage::Chain(fs.root_cluster),
            (c, _) => DirStorage::Chain(c),
        };
        Self { fs, storage }
    }

    /// The directory's first cluster; 0 for the fixed FAT12/16 root.
    pub fn first_cluster(&self) -> u32 {
        match self.storage {
            DirStorage::Root => 0,
            DirStorage::Chain(c) => c,
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        match self.storage {
            DirStorage::Root => true,
            DirStorage::Chain(c) => {
                self.fs.fat_type == FatType::Fat32 && c == self.fs.root_cluster
            }
        }
    }

    /// Iterates the directory's logical entries.
    pub fn iter(&self) -> DirIter {
        DirIter {
            reader: SlotReader::new(Arc::clone(&self.fs), self.storage),
            index: 0,
            pending: Vec::new(),
            done: false,
        }
    }

    /// Looks up an entry by name, case-insensitively, against the long
    /// name (or the short name when no valid long name is present).
    pub fn find(&self, name: &str) -> Option<DirEntryGroup> {
        self.iter().find(|group| group.matches(name))
    }

    pub fn is_dir_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Inserts a new entry under *name*, generating a short name (and
    /// the LFN run where one is needed) and claiming the leftmost run of
    /// free slots, growing the directory by a cluster when none fits.
    pub(crate) fn insert(&self, name: &str, entry: DirEntry) -> Result<()> {
        if !valid_name(name) {
            return Err(FatError::InvalidValue(format!("invalid name {name:?}")));
        }
        let _guard = self.fs.lock.write();
        let mut reader = SlotReader::new(Arc::clone(&self.fs), self.storage);
        let (filename, ext, needs_lfn) = self.generate_sfn(&reader, name)?;

        let mut raw = entry.raw;
        raw.filename = filename;
        raw.ext = ext;
        let fragments = if needs_lfn {
            let mut name11 = [0u8; 11];
            name11[..8].copy_from_slice(&filename);
            name11[8..].copy_from_slice(&ext);
            lfn_split(name, lfn_checksum(&name11))
        } else {
            Vec::new()
        };
        let total = fragments.len() + 1;

        let start = self.find_free_run(&mut reader, total)?;
        for (i, fragment) in fragments.iter().enumerate() {
            reader.write(start + i, bytemuck::bytes_of(fragment).try_into().unwrap())?;
        }
        reader.write(start + fragments.len(), bytemuck::bytes_of(&raw).try_into().unwrap())?;
        Ok(())
    }

    /// Finds the leftmost run of *total* consecutive free slots, growing
    /// the backing chain as required. If the run swallows the terminator
    /// and live slots could follow, a fresh terminator is written after
    /// the run.
    fn find_free_run(&self, reader: &mut SlotReader, total: usize) -> Result<usize> {
        loop {
            let count = reader.count();
            let mut run = 0usize;
            let mut terminated = false;
            let mut terminator_at = None;
            for index in 0..count {
                let free = if terminated {
                    true
                } else {
                    match decode_slot(&reader.read(index).ok_or(FatError::NoSpace)?) {
                        Slot::Terminator => {
                            terminated = true;
                            terminator_at = Some(index);
                            true
                        }
                        Slot::Deleted => true,
                        _ => false,
                    }
                };
                if free {
                    run += 1;
                    if run == total {
                        let start = index + 1 - total;
                        if let Some(term) = terminator_at {
                            let end = start + total;
                            if end > term && end < count {
                                reader.write(end, &[0u8; RawDirEntry::SIZE])?;
                            }
                        }
                        return Ok(start);
                    }
                } else {
                    run = 0;
                }
            }
            reader.grow()?;
        }
    }

    /// Deletes the entry *name*, stamping every slot of its group with
    /// the deleted marker. The caller frees the entry's clusters.
    pub(crate) fn remove(&self, name: &str) -> Result<DirEntry> {
        let _guard = self.fs.lock.write();
        let group = self
            .find(name)
            .ok_or_else(|| FatError::NotFound(name.into()))?;
        let reader = SlotReader::new(Arc::clone(&self.fs), self.storage);
        for index in group.start_slot..group.start_slot + group.span {
            let mut bytes = reader
                .read(index)
                .ok_or_else(|| FatError::NotFound(name.into()))?;
            bytes[0] = 0xE5;
            reader.write(index, &bytes)?;
        }
        Ok(group.entry)
    }

    /// Rewrites the short entry of *name* in place with *entry*'s
    /// metadata, keeping the stored 8.3 name bytes (the LFN run, and
    /// hence the checksum, stays valid).
    pub(crate) fn update(&self, name: &str, entry: &DirEntry) -> Result<()> {
        let _guard = self.fs.lock.write();
        let group = self
            .find(name)
            .ok_or_else(|| FatError::NotFound(name.into()))?;
        let reader = SlotReader::new(Arc::clone(&self.fs), self.storage);
        let slot = group.start_slot + group.span - 1;
        let mut raw = entry.raw;
        raw.filename = group.entry.raw.filename;
        raw.ext = group.entry.raw.ext;
        reader.write(slot, bytemuck::bytes_of(&raw).try_into().unwrap())?;
        Ok(())
    }

    /// Writes the `.` and `..` entries a fresh sub-directory must carry.
    /// *own* is the new directory's entry; *parent* is the parent's, or
    /// `None` when the parent is the root (`..` then points at cluster
    /// 0).
    pub(crate) fn write_dot_entries(&self, own: &DirEntry, parent: Option<&DirEntry>) -> Result<()> {
        let _guard = self.fs.lock.write();
        let reader = SlotReader::new(Arc::clone(&self.fs), self.storage);
        let mut dot = own.raw;
        dot.filename = *b".       ";
        dot.ext = *b"   ";
        reader.write(0, bytemuck::bytes_of(&dot).try_into().unwrap())?;
        let mut dotdot = match parent {
            Some(parent) => parent.raw,
            None => {
                let mut raw = own.raw;
                raw.first_cluster_lo = U16::new(0);
                raw.first_cluster_hi = U16::new(0);
                raw
            }
        };
        dotdot.filename = *b"..      ";
        dotdot.ext = *b"   ";
        reader.write(1, bytemuck::bytes_of(&dotdot).try_into().unwrap())?;
        Ok(())
    }

    /// Generates a unique 8.3 name for *name*. Returns the packed name
    /// fields and whether an LFN run is required.
    fn generate_sfn(&self, reader: &SlotReader, name: &str) -> Result<([u8; 8], [u8; 3], bool)> {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, ext),
            _ => (name, ""),
        };
        let mapped_stem = sfn_map(stem);
        let mapped_ext = sfn_map(ext);

        // A name that is already its own valid 8.3 rendition needs no
        // LFN run and no ~N suffix
        if !mapped_stem.is_empty()
            && mapped_stem.len() <= 8
            && mapped_ext.len() <= 3
            && mapped_stem == stem
            && mapped_ext == ext
        {
            return Ok((pack_sfn::<8>(&mapped_stem), pack_sfn::<3>(&mapped_ext), false));
        }

        let existing: Vec<[u8; 11]> = {
            let mut names = Vec::new();
            let mut index = 0;
            while let Some(bytes) = reader.read(index) {
                match decode_slot(&bytes) {
                    Slot::Terminator => break,
                    Slot::Short(raw) => names.push(short_name_bytes(&raw)),
                    _ => {}
                }
                index += 1;
            }
            names
        };
        let ext_packed = pack_sfn::<3>(&mapped_ext[..mapped_ext.len().min(3)]);
        let basis: String = mapped_stem.chars().take(6).collect();
        for n in 1..=999_999u32 {
            let suffix = format!("~{n}");
            let keep = basis.len().min(8 - suffix.len());
            let candidate = format!("{}{suffix}", &basis[..keep]);
            let packed = pack_sfn::<8>(&candidate);
            let mut name11 = [0u8; 11];
            name11[..8].copy_from_slice(&packed);
            name11[8..].copy_from_slice(&ext_packed);
            if !existing.contains(&name11) {
                return Ok((packed, ext_packed, true));
            }
        }
        Err(FatError::NoSpace)
    }
}

/// Maps one name component onto the 8.3 character set: uppercased, with
/// spaces and dots stripped and everything else that an 8.3 name cannot
/// carry replaced by `_`.
fn sfn_map(part: &str) -> String {
    const ALLOWED: &str = "$%'-_@~`!(){}^#&";
    part.chars()
        .filter(|&c| c != ' ' && c != '.')
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_uppercase() || c.is_ascii_digit() || ALLOWED.contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn pack_sfn<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [b' '; N];
    for (slot, c) in out.iter_mut().zip(s.chars()) {
        *slot = c as u8;
    }
    out
}

/// Iterator over a directory's logical entries. See
/// [`FatDirectory::iter`].
pub struct DirIter {
    reader: SlotReader,
    index: usize,
    pending: Vec<RawLfnEntry>,
    done: bool,
}

impl Iterator for DirIter {
    type Item = DirEntryGroup;

    fn next(&mut self) -> Option<DirEntryGroup> {
        if self.done {
            return None;
        }
        let _guard = self.reader.fs.lock.read();
        while let Some(bytes) = self.reader.read(self.index) {
            let index = self.index;
            self.index += 1;
            match decode_slot(&bytes) {
                Slot::Terminator => {
                    self.done = true;
                    return None;
                }
                Slot::Deleted => {
                    if !self.pending.is_empty() {
                        warn!("discarding orphan long filename fragments");
                        self.pending.clear();
                    }
                }
                Slot::VolumeLabel => {
                    if !self.pending.is_empty() {
                        warn!("discarding orphan long filename fragments");
                        self.pending.clear();
                    }
                }
                Slot::LongFragment(fragment) => self.pending.push(fragment),
                Slot::Short(raw) => {
                    let fragments = std::mem::take(&mut self.pending);
                    let long_name = lfn_assemble(&fragments, &raw);
                    // Fragments that failed validation do not count
                    // towards the group's span
                    let span = if long_name.is_some() {
                        fragments.len() + 1
                    } else {
                        1
                    };
                    let entry = DirEntry { raw };
                    let sfn = entry.sfn();
                    if sfn == "." || sfn == ".." {
                        continue;
                    }
                    return Some(DirEntryGroup {
                        long_name,
                        sfn,
                        entry,
                        start_slot: index + 1 - span,
                        span,
                    });
                }
            }
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_with_name(name11: [u8; 11]) -> RawDirEntry {
        let mut raw: RawDirEntry = bytemuck::Zeroable::zeroed();
        raw.filename.copy_from_slice(&name11[..8]);
        raw.ext.copy_from_slice(&name11[8..]);
        raw.attr = FileAttributes::ARCHIVE.bits();
        raw
    }

    #[test]
    fn test_checksum_known_value() {
        // "LOTS-O~1   " is the short form of "lots-of-zeros"
        assert_eq!(lfn_checksum(b"LOTS-O~1   "), {
            let mut sum = 0u8;
            for &b in b"LOTS-O~1   " {
                sum = (sum >> 1).wrapping_add((sum & 1) << 7).wrapping_add(b);
            }
            sum
        });
    }

    #[test]
    fn test_lfn_round_trip() {
        for name in [
            "a",
            "hello.txt",
            "exactly-thirteen",
            "lots-of-zeros",
            "a name with spaces and length beyond thirteen characters.extension",
            &"x".repeat(255),
        ] {
            let short = short_with_name(*b"DUMMY      ");
            let checksum = lfn_checksum(b"DUMMY      ");
            let fragments = lfn_split(name, checksum);
            assert_eq!(
                fragments.len(),
                name.encode_utf16().count().div_ceil(13),
                "fragment count for {name:?}"
            );
            assert_eq!(
                lfn_assemble(&fragments, &short).as_deref(),
                Some(name),
                "round trip of {name:?}"
            );
        }
    }

    #[test]
    fn test_lfn_checksum_mismatch_rejected() {
        let short = short_with_name(*b"DUMMY      ");
        let mut fragments = lfn_split("lots-of-zeros", lfn_checksum(b"DUMMY      "));
        fragments.last_mut().unwrap().checksum ^= 0xFF;
        assert_eq!(lfn_assemble(&fragments, &short), None);
    }

    #[test]
    fn test_lfn_sequence_gap_rejected() {
        let short = short_with_name(*b"DUMMY      ");
        let mut fragments = lfn_split(&"y".repeat(40), lfn_checksum(b"DUMMY      "));
        fragments.remove(1);
        assert_eq!(lfn_assemble(&fragments, &short), None);
    }

    #[test]
    fn test_sfn_decode() {
        assert_eq!(decode_sfn(b"HELLO   ", b"TXT"), "HELLO.TXT");
        assert_eq!(decode_sfn(b"NOEXT   ", b"   "), "NOEXT");
        assert_eq!(decode_sfn(b"\x05ELLO   ", b"TXT"), "\u{e5}ELLO.TXT");
    }

    #[test]
    fn test_sfn_map() {
        assert_eq!(sfn_map("lots-of-zeros"), "LOTS-OF-ZEROS");
        assert_eq!(sfn_map("a b c"), "ABC");
        assert_eq!(sfn_map("comma,name"), "COMMA_NAME");
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("config.txt"));
        assert!(valid_name("with spaces"));
        assert!(!valid_name(""));
        assert!(!valid_name("."));
        assert!(!valid_name(".."));
        assert!(!valid_name("a/b"));
        assert!(!valid_name("nul\0"));
        assert!(!valid_name(&"x".repeat(256)));
    }
}
