//! Path-facade tests: resolution, directory operations, globbing, and
//! the long/short filename behavior visible through it.

mod common;

use common::{ImageSpec, image, open_fs};
use fatboot_fat::{FatError, FatFileSystem, FsOptions};
use fatboot_part::{Access, DiskImage};

#[test]
fn test_fat12_nested_read_and_stat() {
    let file = image(&ImageSpec::fat12());
    let gpl3 = "GNU GENERAL PUBLIC LICENSE\nVersion 3, 29 June 2007\n".repeat(40);
    {
        let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
        fs.root().join("a.dir").mkdir(false, false).unwrap();
        fs.root().join("a.dir/licenses").mkdir(false, false).unwrap();
        fs.root()
            .join("a.dir/licenses/gpl3.txt")
            .write_text(&gpl3)
            .unwrap();
    }
    let (_img, fs) = open_fs(file.path(), Access::Read);
    let p = fs.root().join("a.dir").join("licenses").join("gpl3.txt");
    assert_eq!(p.read_text().unwrap(), gpl3);
    let stat = p.stat().unwrap();
    assert_eq!(stat.mode, 0o444);
    assert_eq!(stat.nlink, 1);
    assert_ne!(stat.ino, 0);
    assert_eq!(stat.size, gpl3.len() as u64);
    assert!(stat.mtime.is_some());

    let dir_stat = fs.root().join("a.dir").stat().unwrap();
    assert_eq!(dir_stat.mode, 0o40555);
    assert_eq!(dir_stat.nlink, 0);
    assert_eq!(dir_stat.dev, stat.dev);
}

#[test]
fn test_case_insensitive_lookup() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    fs.root().join("MixedCase.TXT").write_text("hi").unwrap();
    assert!(fs.root().join("mixedcase.txt").exists().unwrap());
    assert_eq!(fs.root().join("MIXEDCASE.txt").read_text().unwrap(), "hi");
    assert_eq!(fs.root().join("MixedCase.TXT"), fs.root().join("mixedcase.txt"));
}

#[test]
fn test_sfn_generation_and_uniqueness() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    fs.root().join("lots-of-zeros").write_text("0").unwrap();
    fs.root().join("lots-of-zeroes").write_text("00").unwrap();
    let groups: Vec<_> = fs.open_dir(0).iter().collect();
    let sfns: Vec<&str> = groups.iter().map(|g| g.sfn.as_str()).collect();
    assert_eq!(sfns, ["LOTS-O~1", "LOTS-O~2"]);
    let longs: Vec<_> = groups.iter().map(|g| g.name()).collect();
    assert_eq!(longs, ["lots-of-zeros", "lots-of-zeroes"]);

    // A name that is already a clean 8.3 rendition keeps it, with no
    // long-name run
    fs.root().join("README.TXT").write_text("r").unwrap();
    let group = fs.open_dir(0).find("readme.txt").unwrap();
    assert_eq!(group.sfn, "README.TXT");
    assert!(group.long_name.is_none());
}

#[test]
fn test_lfn_corruption_falls_back_to_sfn() {
    let file = image(&ImageSpec::fat16());
    {
        let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
        fs.root().join("lots-of-zeros").write_text("0000").unwrap();
    }
    // Corrupt the checksum of the LFN fragment that precedes the short
    // entry
    let mut bytes = std::fs::read(file.path()).unwrap();
    let short = b"LOTS-O~1   ";
    let pos = bytes
        .windows(short.len())
        .position(|w| w == short)
        .expect("short entry on disk");
    let lfn_slot = pos - 32;
    assert_eq!(bytes[lfn_slot + 11], 0x0F);
    bytes[lfn_slot + 13] ^= 0xFF;
    std::fs::write(file.path(), &bytes).unwrap();

    let (_img, fs) = open_fs(file.path(), Access::Read);
    let names: Vec<String> = fs
        .root()
        .iterdir()
        .unwrap()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names, ["LOTS-O~1"]);
    assert_eq!(
        fs.root().join("LOTS-O~1").read_text().unwrap(),
        "0000"
    );
}

#[test]
fn test_mkdir_rmdir() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let nested = fs.root().join("a/b/c");
    assert!(matches!(
        nested.mkdir(false, false),
        Err(FatError::NotFound(_))
    ));
    nested.mkdir(true, false).unwrap();
    assert!(nested.is_dir().unwrap());
    nested.mkdir(true, true).unwrap();
    assert!(matches!(
        nested.mkdir(false, false),
        Err(FatError::Exists(_))
    ));

    nested.join("file").write_text("x").unwrap();
    assert!(matches!(
        nested.rmdir(),
        Err(FatError::DirectoryNotEmpty(_))
    ));
    nested.join("file").unlink(false).unwrap();
    nested.rmdir().unwrap();
    assert!(!nested.exists().unwrap());
    assert!(matches!(
        fs.root().rmdir(),
        Err(FatError::PermissionDenied(_))
    ));
}

#[test]
fn test_mkdir_writes_dot_entries() {
    let file = image(&ImageSpec::fat32());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    fs.root().join("sub").mkdir(false, false).unwrap();
    fs.root().join("sub/inner").mkdir(false, false).unwrap();
    // Dot entries are preserved on disk but hidden from iteration
    assert_eq!(fs.root().join("sub").iterdir().unwrap().len(), 1);
    let stat = fs.root().join("sub").stat().unwrap();
    assert_ne!(stat.ino, 0);
    // A fresh directory inside a fresh directory still resolves
    assert!(fs.root().join("sub/inner").is_dir().unwrap());
}

#[test]
fn test_rename_and_replace() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let src = fs.root().join("foo");
    src.write_text("some text").unwrap();
    let target = src.rename(&fs.root().join("bar")).unwrap();
    assert_eq!(target.read_text().unwrap(), "some text");
    assert!(!src.exists().unwrap());

    // Replacing an existing file frees its clusters
    let victim = fs.root().join("victim");
    victim.write_bytes(&vec![9u8; 1024]).unwrap();
    let free_before = fs.fat().free().count();
    target.rename(&victim).unwrap();
    assert_eq!(victim.read_text().unwrap(), "some text");
    assert!(fs.fat().free().count() > free_before);

    // A directory target is refused
    fs.root().join("d").mkdir(false, false).unwrap();
    assert!(matches!(
        victim.rename(&fs.root().join("d")),
        Err(FatError::IsADirectory(_))
    ));
}

#[test]
fn test_rename_across_file_systems_fails() {
    let file_a = image(&ImageSpec::fat16());
    let file_b = image(&ImageSpec::fat16());
    let (_ia, fs_a) = open_fs(file_a.path(), Access::ReadWrite);
    let (_ib, fs_b) = open_fs(file_b.path(), Access::ReadWrite);
    let p = fs_a.root().join("x");
    p.write_text("x").unwrap();
    assert!(matches!(
        p.rename(&fs_b.root().join("x")),
        Err(FatError::CrossFileSystem)
    ));
    assert!(fs_a.root().partial_cmp(&fs_b.root()).is_none());
}

#[test]
fn test_glob_and_rglob() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    for name in ["a.txt", "b.txt", "notes.md"] {
        fs.root().join(name).write_text("").unwrap();
    }
    fs.root().join("sub").mkdir(false, false).unwrap();
    fs.root().join("sub/c.txt").write_text("").unwrap();

    let mut txt: Vec<String> = fs
        .root()
        .glob("*.txt")
        .unwrap()
        .iter()
        .map(|p| p.to_string())
        .collect();
    txt.sort();
    assert_eq!(txt, ["/a.txt", "/b.txt"]);

    let classes = fs.root().glob("[ab].txt").unwrap();
    assert_eq!(classes.len(), 2);

    let question = fs.root().glob("?.txt").unwrap();
    assert_eq!(question.len(), 2);

    let sub = fs.root().glob("sub/*.txt").unwrap();
    assert_eq!(sub.len(), 1);
    assert_eq!(sub[0].to_string(), "/sub/c.txt");

    let mut all_txt: Vec<String> = fs
        .root()
        .rglob("*.txt")
        .unwrap()
        .iter()
        .map(|p| p.to_string())
        .collect();
    all_txt.sort();
    assert_eq!(all_txt, ["/a.txt", "/b.txt", "/sub/c.txt"]);

    let deep = fs.root().glob("**/c.txt").unwrap();
    assert_eq!(deep.len(), 1);

    assert!(fs.root().glob("bad**name").is_err());
    assert!(fs.root().glob("/absolute").is_err());

    assert!(sub[0].matches("*.txt").unwrap());
    assert!(sub[0].matches("sub/*.txt").unwrap());
    assert!(!sub[0].matches("/*.txt").unwrap());
}

#[test]
fn test_path_algebra() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::Read);
    let p = fs.root().join("dir/archive.tar.gz");
    assert_eq!(p.name(), "archive.tar.gz");
    assert_eq!(p.suffix(), ".gz");
    assert_eq!(p.stem(), "archive.tar");
    assert_eq!(p.parent().to_string(), "/dir");
    assert_eq!(p.parent().parent().to_string(), "/");
    assert_eq!(p.parent().parent().parent().to_string(), "/");
    assert!(p.is_absolute());
    let resolved = fs.root().join("dir/../other/./x").resolve(false).unwrap();
    assert_eq!(resolved.to_string(), "/other/x");
}

#[test]
fn test_closed_file_system_is_fatal() {
    let file = image(&ImageSpec::fat16());
    let img = DiskImage::open(file.path(), Access::Read).unwrap();
    let len = img.mapping().len();
    let fs =
        FatFileSystem::from_mapping(img.mapping().clone(), 0..len, FsOptions::default()).unwrap();
    let root = fs.root();
    assert!(root.exists().unwrap());
    drop(fs);
    assert!(matches!(root.exists(), Err(FatError::Closed)));
    assert!(matches!(root.join("x").open(), Err(FatError::Closed)));
}

#[test]
fn test_open_options() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let p = fs.root().join("x.txt");
    assert!(matches!(p.open(), Err(FatError::NotFound(_))));
    p.write_text("hello").unwrap();
    assert!(matches!(
        p.open_with(fatboot_fat::OpenOptions::new().write(true).create_new(true)),
        Err(FatError::Exists(_))
    ));
    // Opening a directory as a file fails either way
    fs.root().join("d").mkdir(false, false).unwrap();
    assert!(matches!(
        fs.root().join("d").open(),
        Err(FatError::IsADirectory(_))
    ));
    // Touch updates the modification time of an existing file
    p.touch().unwrap();
    assert!(p.stat().unwrap().mtime.is_some());
}
