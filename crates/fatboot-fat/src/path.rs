//! A `Path`-like facade over a [`FatFileSystem`].
//!
//! A [`FatPath`] is a sequence of name components plus a *weak* handle
//! on its file system, so paths never keep a closed file system alive;
//! using one after the last [`FatFileSystem`] handle dropped fails with
//! [`FatError::Closed`]. Resolution walks the directory tree matching
//! names case-insensitively against the long name of each entry (or the
//! short name where no valid long name exists).
//!
//! Paths compare case-insensitively, and only within one file system;
//! ordering across file systems is undefined (`partial_cmp` returns
//! `None`).

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use chrono::{Local, NaiveDateTime};

use crate::dir::{DirEntry, DirEntryGroup, FatDirectory};
use crate::file::{EntryBinding, FatFile};
use crate::fs::{FatFileSystem, FsInner};
use crate::structures::fat::FatTable;
use crate::{FatError, Result};

const SEP: char = '/';

/// POSIX-shaped metadata for a path, as returned by [`FatPath::stat`].
///
/// `atime` has day resolution, `mtime` two-second resolution, and
/// `ctime` up to 10 ms resolution depending on the driver that wrote
/// it. Directories carry no timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatStat {
    pub mode: u32,
    /// The first cluster of the entry's data.
    pub ino: u64,
    /// A stable identifier of the owning file system.
    pub dev: u64,
    pub nlink: u32,
    pub size: u64,
    pub atime: Option<NaiveDateTime>,
    pub mtime: Option<NaiveDateTime>,
    pub ctime: Option<NaiveDateTime>,
}

/// Which operations an [`FatPath::open_with`] call permits, mirroring
/// `std::fs::OpenOptions`.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    append: bool,
    truncate: bool,
    create: bool,
    create_new: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    pub fn create_new(&mut self, create_new: bool) -> &mut Self {
        self.create_new = create_new;
        self
    }

    fn wants_write(&self) -> bool {
        self.write || self.append || self.truncate || self.create || self.create_new
    }
}

/// A path within a [`FatFileSystem`].
#[derive(Clone)]
pub struct FatPath {
    fs: Weak<FsInner>,
    /// Name components; an absolute path leads with an empty component.
    parts: Vec<String>,
}

/// The result of walking a path: the containing directory, the entry
/// (when it exists), and the directory view (when the path names one).
struct Resolved {
    parent: Option<FatDirectory>,
    group: Option<DirEntryGroup>,
    dir: Option<FatDirectory>,
}

impl Resolved {
    fn exists(&self) -> bool {
        self.group.is_some() || matches!((&self.parent, &self.dir), (None, Some(_)))
    }
}

impl FatPath {
    pub(crate) fn root(fs: &FatFileSystem) -> Self {
        Self {
            fs: Arc::downgrade(&fs.inner),
            parts: vec![String::new()],
        }
    }

    fn fs(&self) -> Result<Arc<FsInner>> {
        self.fs.upgrade().ok_or(FatError::Closed)
    }

    /// The file system handle, re-wrapped. Fails when the file system
    /// has been closed.
    pub fn file_system(&self) -> Result<FatFileSystem> {
        Ok(FatFileSystem { inner: self.fs()? })
    }

    /// Appends components to the path. Segments are split on `/`; an
    /// absolute argument replaces the path entirely.
    pub fn join(&self, segments: impl AsRef<str>) -> FatPath {
        let segments = segments.as_ref();
        let mut parts = if segments.starts_with(SEP) {
            vec![String::new()]
        } else {
            self.parts.clone()
        };
        parts.extend(
            segments
                .split(SEP)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
        FatPath {
            fs: self.fs.clone(),
            parts,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.parts.first().is_some_and(String::is_empty)
    }

    fn is_root(&self) -> bool {
        self.parts == [String::new()]
    }

    /// The final component, or `""` for the root.
    pub fn name(&self) -> &str {
        match self.parts.last() {
            Some(last) => last,
            None => "",
        }
    }

    /// The extension of the final component, including the dot.
    pub fn suffix(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(i) if i > 0 => &name[i..],
            _ => "",
        }
    }

    /// The final component without its extension.
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(i) if i > 0 => &name[..i],
            _ => name,
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The logical parent; the root is its own parent.
    pub fn parent(&self) -> FatPath {
        if self.parts.len() > 1 {
            FatPath {
                fs: self.fs.clone(),
                parts: self.parts[..self.parts.len() - 1].to_vec(),
            }
        } else {
            self.clone()
        }
    }

    /// The chain of ancestors, nearest first, ending at the root.
    pub fn parents(&self) -> Vec<FatPath> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        loop {
            out.push(cur.clone());
            let next = cur.parent();
            if next == cur {
                break;
            }
            cur = next;
        }
        out
    }

    /// Eliminates `.` and `..` components, returning a new absolute
    /// path. With *strict*, the result must exist.
    pub fn resolve(&self, strict: bool) -> Result<FatPath> {
        if !self.is_absolute() {
            return Err(FatError::InvalidValue(format!(
                "cannot resolve relative path {self}"
            )));
        }
        let mut parts: Vec<String> = vec![String::new()];
        for part in &self.parts[1..] {
            match part.as_str() {
                "." => {}
                ".." => {
                    if parts.len() > 1 {
                        parts.pop();
                    }
                }
                _ => parts.push(part.clone()),
            }
        }
        let path = FatPath {
            fs: self.fs.clone(),
            parts,
        };
        if strict {
            path.must_exist()?;
        }
        Ok(path)
    }

    fn walk(&self) -> Result<Resolved> {
        let fs = self.fs()?;
        if !self.is_absolute() {
            return Err(FatError::InvalidValue(format!(
                "cannot resolve relative path {self}"
            )));
        }
        let mut cur = FatDirectory::new(Arc::clone(&fs), 0);
        if self.is_root() {
            return Ok(Resolved {
                parent: None,
                group: None,
                dir: Some(cur),
            });
        }
        let components = &self.parts[1..];
        for (i, part) in components.iter().enumerate() {
            let last = i + 1 == components.len();
            match cur.find(part) {
                Some(group) if group.entry.is_dir() => {
                    let next = FatDirectory::new(
                        Arc::clone(&fs),
                        group.entry.first_cluster(fs.fat_type),
                    );
                    if last {
                        return Ok(Resolved {
                            parent: Some(cur),
                            group: Some(group),
                            dir: Some(next),
                        });
                    }
                    cur = next;
                }
                Some(group) => {
                    if last {
                        return Ok(Resolved {
                            parent: Some(cur),
                            group: Some(group),
                            dir: None,
                        });
                    }
                    return Err(FatError::NotADirectory(self.to_string()));
                }
                None => {
                    return Ok(Resolved {
                        parent: last.then_some(cur),
                        group: None,
                        dir: None,
                    });
                }
            }
        }
        unreachable!("component loop always returns")
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.walk()?.exists())
    }

    pub fn is_dir(&self) -> Result<bool> {
        Ok(self.walk()?.dir.is_some())
    }

    pub fn is_file(&self) -> Result<bool> {
        let resolved = self.walk()?;
        Ok(resolved.group.is_some() && resolved.dir.is_none())
    }

    fn must_exist(&self) -> Result<Resolved> {
        let resolved = self.walk()?;
        if !resolved.exists() {
            return Err(FatError::NotFound(self.to_string()));
        }
        Ok(resolved)
    }

    fn must_be_dir(&self) -> Result<FatDirectory> {
        self.must_exist()?
            .dir
            .ok_or_else(|| FatError::NotADirectory(self.to_string()))
    }

    /// Opens the file read-only.
    pub fn open(&self) -> Result<FatFile> {
        OpenOptions::new().read(true).open_path(self)
    }

    /// Opens the file for writing, creating it and truncating any
    /// existing contents.
    pub fn create(&self) -> Result<FatFile> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open_path(self)
    }

    /// Opens the file for appending, creating it when missing.
    pub fn append(&self) -> Result<FatFile> {
        OpenOptions::new()
            .write(true)
            .append(true)
            .create(true)
            .open_path(self)
    }

    /// Opens the file with explicit [`OpenOptions`].
    pub fn open_with(&self, options: &OpenOptions) -> Result<FatFile> {
        options.open_path(self)
    }

    /// Reads the whole file.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        use std::io::Read;
        let mut file = self.open()?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Reads the whole file as UTF-8 text.
    pub fn read_text(&self) -> Result<String> {
        String::from_utf8(self.read_bytes()?).map_err(|e| {
            FatError::InvalidValue(format!("{self} does not contain valid UTF-8: {e}"))
        })
    }

    /// Replaces the file's contents, creating it when missing.
    pub fn write_bytes(&self, data: &[u8]) -> Result<usize> {
        use std::io::Write;
        let mut file = self.create()?;
        file.write_all(data)?;
        file.flush()?;
        Ok(data.len())
    }

    /// Replaces the file's contents with UTF-8 text.
    pub fn write_text(&self, text: &str) -> Result<usize> {
        self.write_bytes(text.as_bytes())
    }

    /// Creates the file when missing; bumps its modification time
    /// otherwise.
    pub fn touch(&self) -> Result<()> {
        let fs = self.fs()?;
        let _guard = fs.lock.write();
        let resolved = self.walk()?;
        match resolved.group {
            Some(group) if resolved.dir.is_none() => {
                let parent = resolved.parent.expect("entry implies parent");
                let mut entry = group.entry;
                entry.set_modified(Local::now().naive_local())?;
                parent.update(group.name(), &entry)?;
                Ok(())
            }
            Some(_) => Ok(()),
            None => {
                drop(self.create()?);
                Ok(())
            }
        }
    }

    /// Removes the file. Directories go through [`rmdir`](Self::rmdir).
    pub fn unlink(&self, missing_ok: bool) -> Result<()> {
        let fs = self.fs()?;
        let _guard = fs.lock.write();
        let resolved = match self.must_exist() {
            Ok(resolved) => resolved,
            Err(FatError::NotFound(_)) if missing_ok => return Ok(()),
            Err(err) => return Err(err),
        };
        if resolved.dir.is_some() {
            return Err(FatError::IsADirectory(self.to_string()));
        }
        let parent = resolved.parent.expect("file implies parent");
        let entry = parent.remove(self.name())?;
        let table = FatTable::new(&fs);
        for cluster in table.chain(entry.first_cluster(fs.fat_type)) {
            table.mark_free(cluster)?;
        }
        Ok(())
    }

    /// Renames this file or directory to *target* (which must live on
    /// the same file system), returning the target path. An existing
    /// target file is replaced; an existing target directory is refused.
    pub fn rename(&self, target: &FatPath) -> Result<FatPath> {
        let fs = self.fs()?;
        if !Weak::ptr_eq(&self.fs, &target.fs) {
            return Err(FatError::CrossFileSystem);
        }
        if self == target {
            self.must_exist()?;
            return Ok(target.clone());
        }
        let _guard = fs.lock.write();

        let source = self.must_exist()?;
        let source_parent = source.parent.ok_or_else(|| {
            FatError::PermissionDenied("cannot rename the root directory".into())
        })?;
        let source_group = source.group.expect("non-root path has an entry");

        let resolved = target.walk()?;
        let replaced_cluster = match &resolved.group {
            Some(group) => {
                if resolved.dir.is_some() {
                    return Err(FatError::IsADirectory(target.to_string()));
                }
                let cluster = group.entry.first_cluster(fs.fat_type);
                resolved
                    .parent
                    .as_ref()
                    .expect("entry implies parent")
                    .update(target.name(), &source_group.entry)?;
                cluster
            }
            None => {
                let parent = target.parent().must_be_dir()?;
                parent.insert(target.name(), source_group.entry)?;
                0
            }
        };
        source_parent.remove(self.name())?;
        if replaced_cluster != 0 {
            let table = FatTable::new(&fs);
            for cluster in table.chain(replaced_cluster) {
                table.mark_free(cluster)?;
            }
        }
        Ok(target.clone())
    }

    /// Creates a directory here, with `.` and `..` entries in its fresh
    /// cluster (`..` points at cluster 0 when the parent is the root).
    pub fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<()> {
        let fs = self.fs()?;
        if fs.read_only {
            return Err(FatError::PermissionDenied(
                "file system is read-only".into(),
            ));
        }
        let _guard = fs.lock.write();
        let resolved = self.walk()?;
        if resolved.exists() {
            if exist_ok && resolved.dir.is_some() {
                return Ok(());
            }
            return Err(FatError::Exists(self.to_string()));
        }
        let parent_path = self.parent();
        if !parent_path.exists()? {
            if !parents {
                return Err(FatError::NotFound(parent_path.to_string()));
            }
            parent_path.mkdir(true, true)?;
        }
        let parent = parent_path.must_be_dir()?;
        let parent_entry = parent_path.walk()?.group.map(|g| g.entry);

        let table = FatTable::new(&fs);
        let cluster = table.alloc()?;
        table.mark_end(cluster)?;
        crate::structures::fat::ClusterRegion::new(&fs).zero(cluster)?;

        let entry = DirEntry::new_dir(Local::now().naive_local(), cluster, fs.fat_type)?;
        parent.insert(self.name(), entry)?;
        let new_dir = FatDirectory::new(Arc::clone(&fs), cluster);
        new_dir.write_dot_entries(&entry, parent_entry.as_ref())?;
        Ok(())
    }

    /// Removes this directory; it must be empty and must not be the
    /// root.
    pub fn rmdir(&self) -> Result<()> {
        let fs = self.fs()?;
        let _guard = fs.lock.write();
        let resolved = self.must_exist()?;
        let dir = resolved
            .dir
            .ok_or_else(|| FatError::NotADirectory(self.to_string()))?;
        let parent = match resolved.parent {
            Some(parent) if !dir.is_root() => parent,
            _ => {
                return Err(FatError::PermissionDenied(
                    "cannot remove the root directory".into(),
                ));
            }
        };
        if !dir.is_dir_empty() {
            return Err(FatError::DirectoryNotEmpty(self.to_string()));
        }
        let entry = parent.remove(self.name())?;
        let table = FatTable::new(&fs);
        for cluster in table.chain(entry.first_cluster(fs.fat_type)) {
            table.mark_free(cluster)?;
        }
        Ok(())
    }

    /// The children of this directory, in on-disk order. The `.` and
    /// `..` entries are not included.
    pub fn iterdir(&self) -> Result<Vec<FatPath>> {
        let dir = self.must_be_dir()?;
        Ok(dir.iter().map(|group| self.join(group.name())).collect())
    }

    /// Matches the path against a glob-style *pattern*, from the right
    /// when the pattern is relative. Matching is case-insensitive, as
    /// FAT itself is.
    pub fn matches(&self, pattern: &str) -> Result<bool> {
        let pat_parts: Vec<&str> = if pattern.starts_with(SEP) {
            std::iter::once("")
                .chain(pattern.split(SEP).filter(|s| !s.is_empty()))
                .collect()
        } else {
            pattern.split(SEP).filter(|s| !s.is_empty()).collect()
        };
        if pat_parts.is_empty() {
            return Err(FatError::InvalidValue("empty pattern".into()));
        }
        if pat_parts.len() > self.parts.len() {
            return Ok(false);
        }
        Ok(self
            .parts
            .iter()
            .rev()
            .zip(pat_parts.iter().rev())
            .all(|(part, pat)| {
                if pat.is_empty() {
                    part.is_empty()
                } else {
                    fnmatch(pat, part)
                }
            }))
    }

    /// Expands a relative glob *pattern* beneath this directory.
    /// Supports `?`, `*`, character classes, and `**` as an entire
    /// component (recursive descent).
    pub fn glob(&self, pattern: &str) -> Result<Vec<FatPath>> {
        self.must_exist()?;
        if pattern.starts_with(SEP) {
            return Err(FatError::InvalidValue(
                "non-relative patterns are not supported".into(),
            ));
        }
        let parts: Vec<&str> = pattern.split(SEP).filter(|s| !s.is_empty()).collect();
        if parts.is_empty() {
            return Err(FatError::InvalidValue("empty pattern".into()));
        }
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        self.search(&parts, &mut out, &mut seen)?;
        Ok(out)
    }

    /// [`glob`](Self::glob) with an implicit leading `**/`.
    pub fn rglob(&self, pattern: &str) -> Result<Vec<FatPath>> {
        self.must_exist()?;
        if pattern.starts_with(SEP) {
            return Err(FatError::InvalidValue(
                "non-relative patterns are not supported".into(),
            ));
        }
        let mut parts = vec!["**"];
        parts.extend(pattern.split(SEP).filter(|s| !s.is_empty()));
        if parts.len() == 1 {
            return Err(FatError::InvalidValue("empty pattern".into()));
        }
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        self.search(&parts, &mut out, &mut seen)?;
        Ok(out)
    }

    fn search(
        &self,
        parts: &[&str],
        out: &mut Vec<FatPath>,
        seen: &mut std::collections::HashSet<String>,
    ) -> Result<()> {
        let Some((part, rest)) = parts.split_first() else {
            if seen.insert(self.to_string().to_lowercase()) {
                out.push(self.clone());
            }
            return Ok(());
        };
        if !self.is_dir()? {
            return Ok(());
        }
        if *part == "**" {
            self.search(rest, out, seen)?;
            for child in self.iterdir()? {
                if child.is_dir()? {
                    child.search(parts, out, seen)?;
                }
            }
        } else if part.contains("**") {
            return Err(FatError::InvalidValue(
                "** can only be an entire component".into(),
            ));
        } else if part.contains(['*', '?', '[']) {
            for child in self.iterdir()? {
                if fnmatch(part, child.name()) {
                    child.search(rest, out, seen)?;
                }
            }
        } else {
            let child = self.join(part);
            if child.exists()? {
                child.search(rest, out, seen)?;
            }
        }
        Ok(())
    }

    /// POSIX-shaped metadata. Files report mode `0o444`, directories
    /// `0o40555`; the inode is the first cluster and the device a
    /// stable identifier of the file system.
    pub fn stat(&self) -> Result<FatStat> {
        let fs = self.fs()?;
        let dev = Arc::as_ptr(&fs) as u64;
        let resolved = self.must_exist()?;
        match (&resolved.dir, &resolved.group) {
            (Some(dir), _) => Ok(FatStat {
                mode: 0o40555,
                ino: dir.first_cluster() as u64,
                dev,
                nlink: 0,
                size: 0,
                atime: None,
                mtime: None,
                ctime: None,
            }),
            (None, Some(group)) => {
                // Re-read the entry by name in case the first cluster
                // moved underneath us (truncate and re-populate)
                let parent = resolved.parent.as_ref().expect("entry implies parent");
                let group = parent
                    .find(group.name())
                    .ok_or_else(|| FatError::NotFound(self.to_string()))?;
                Ok(FatStat {
                    mode: 0o444,
                    ino: group.entry.first_cluster(fs.fat_type) as u64,
                    dev,
                    nlink: 1,
                    size: group.entry.size(),
                    atime: group.entry.accessed(),
                    mtime: group.entry.modified(),
                    ctime: group.entry.created(),
                })
            }
            _ => unreachable!("must_exist guarantees an entry or a directory"),
        }
    }
}

impl OpenOptions {
    fn open_path(&self, path: &FatPath) -> Result<FatFile> {
        let fs = path.fs()?;
        if fs.read_only && self.wants_write() {
            return Err(FatError::PermissionDenied(
                "file system is read-only".into(),
            ));
        }
        let guard = self.wants_write().then(|| fs.lock.write());

        let resolved = path.walk()?;
        if resolved.dir.is_some() {
            return Err(FatError::IsADirectory(path.to_string()));
        }
        if self.create_new && resolved.group.is_some() {
            return Err(FatError::Exists(path.to_string()));
        }
        let (parent, group) = match resolved.group {
            Some(group) => (resolved.parent.expect("entry implies parent"), group),
            None => {
                if !(self.create || self.create_new) {
                    return Err(FatError::NotFound(path.to_string()));
                }
                let parent = path.parent().must_be_dir()?;
                let entry = DirEntry::new_file(Local::now().naive_local())?;
                parent.insert(path.name(), entry)?;
                let group = parent
                    .find(path.name())
                    .ok_or_else(|| FatError::NotFound(path.to_string()))?;
                (parent, group)
            }
        };

        let fat_type = fs.fat_type;
        let mut file = FatFile::with_binding(
            Arc::clone(&fs),
            group.entry.first_cluster(fat_type),
            group.entry.size(),
            self.write || self.append || self.truncate,
            self.append,
            EntryBinding {
                dir: parent,
                name: group.name().to_string(),
            },
        );
        if self.truncate && group.entry.size() > 0 {
            file.truncate()?;
        }
        drop(guard);
        Ok(file)
    }
}

/// Case-insensitive glob matching for one path component: `?`, `*`, and
/// `[...]` classes (with ranges and a leading `!` for negation).
fn fnmatch(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();
    match_parts(&pattern, &name)
}

fn match_parts(pattern: &[char], name: &[char]) -> bool {
    let Some(&first) = pattern.first() else {
        return name.is_empty();
    };
    match first {
        '*' => (0..=name.len()).any(|skip| match_parts(&pattern[1..], &name[skip..])),
        '?' => !name.is_empty() && match_parts(&pattern[1..], &name[1..]),
        '[' => {
            let Some(end) = pattern.iter().skip(1).position(|&c| c == ']') else {
                // An unterminated class matches a literal bracket
                return name.first() == Some(&'[') && match_parts(&pattern[1..], &name[1..]);
            };
            let class = &pattern[1..end + 1];
            let rest = &pattern[end + 2..];
            let Some(&c) = name.first() else {
                return false;
            };
            let (negate, class) = match class.first() {
                Some('!') => (true, &class[1..]),
                _ => (false, class),
            };
            let mut matched = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == '-' {
                    if (class[i]..=class[i + 2]).contains(&c) {
                        matched = true;
                    }
                    i += 3;
                } else {
                    if class[i] == c {
                        matched = true;
                    }
                    i += 1;
                }
            }
            matched != negate && match_parts(rest, &name[1..])
        }
        literal => name.first() == Some(&literal) && match_parts(&pattern[1..], &name[1..]),
    }
}

impl std::fmt::Display for FatPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        f.write_str(&self.parts.join("/"))
    }
}

impl std::fmt::Debug for FatPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FatPath({self})")
    }
}

impl PartialEq for FatPath {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.fs, &other.fs)
            && self.parts.len() == other.parts.len()
            && self
                .parts
                .iter()
                .zip(&other.parts)
                .all(|(a, b)| a.to_lowercase() == b.to_lowercase())
    }
}

impl Eq for FatPath {}

impl PartialOrd for FatPath {
    /// Ordering is only defined within one file system; comparisons
    /// across file systems return `None`.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !Weak::ptr_eq(&self.fs, &other.fs) {
            return None;
        }
        let a = self.parts.iter().map(|p| p.to_lowercase());
        let b = other.parts.iter().map(|p| p.to_lowercase());
        Some(a.cmp(b))
    }
}
