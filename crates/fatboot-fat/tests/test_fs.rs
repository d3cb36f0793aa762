//! Engine-level tests: files, directories, the allocation table, and
//! its invariants, over freshly formatted scratch images.

mod common;

use std::io::{Read, Seek, SeekFrom, Write};

use common::{ImageSpec, image, open_fs};
use fatboot_fat::FatError;
use fatboot_part::Access;

#[test]
fn test_labels_and_types() {
    for spec in [ImageSpec::fat12(), ImageSpec::fat16(), ImageSpec::fat32()] {
        let file = image(&spec);
        let (_img, fs) = open_fs(file.path(), Access::Read);
        assert_eq!(fs.fat_type(), spec.fat_type);
        assert_eq!(fs.label(), "TEST");
        assert_eq!(fs.cluster_size(), 512);
        assert!(fs.read_only());
    }
}

#[test]
fn test_write_then_read_back() {
    let file = image(&ImageSpec::fat16());
    let payload: Vec<u8> = (0..2000u32).flat_map(|i| i.to_le_bytes()).collect();
    {
        let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
        assert!(!fs.read_only());
        fs.root().join("data.bin").write_bytes(&payload).unwrap();
    }
    let (_img, fs) = open_fs(file.path(), Access::Read);
    assert_eq!(fs.root().join("data.bin").read_bytes().unwrap(), payload);
    // The file spans multiple clusters
    assert!(payload.len() > fs.cluster_size());
}

#[test]
fn test_seek_and_partial_reads() {
    let file = image(&ImageSpec::fat16());
    {
        let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
        let mut f = fs.root().join("seek.bin").create().unwrap();
        for i in 0..4u8 {
            f.write_all(&[i; 600]).unwrap();
        }
        f.flush().unwrap();
    }
    let (_img, fs) = open_fs(file.path(), Access::Read);
    let mut f = fs.root().join("seek.bin").open().unwrap();
    assert_eq!(f.size(), 2400);
    f.seek(SeekFrom::Start(599)).unwrap();
    let mut buf = [0u8; 2];
    f.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [0, 1]);
    f.seek(SeekFrom::End(-1)).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(f.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], 3);
    assert!(f.seek(SeekFrom::Current(-100)).is_err());
}

#[test]
fn test_append_mode() {
    let file = image(&ImageSpec::fat12());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let p = fs.root().join("log.txt");
    p.write_text("one\n").unwrap();
    {
        let mut f = p.append().unwrap();
        f.write_all(b"two\n").unwrap();
        f.flush().unwrap();
    }
    assert_eq!(p.read_text().unwrap(), "one\ntwo\n");
}

#[test]
fn test_truncate_frees_clusters() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let p = fs.root().join("big.bin");
    p.write_bytes(&vec![0xAB; 5 * 512]).unwrap();
    let free_before: u32 = fs.fat().free().count() as u32;
    p.write_bytes(b"small").unwrap();
    let free_after: u32 = fs.fat().free().count() as u32;
    // Five clusters shrank to one
    assert_eq!(free_after, free_before + 4);
    assert_eq!(p.read_bytes().unwrap(), b"small");
}

#[test]
fn test_unlink_frees_chain() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let free_initial = fs.fat().free().count();
    let p = fs.root().join("gone.bin");
    p.write_bytes(&vec![1u8; 3 * 512]).unwrap();
    assert_eq!(fs.fat().free().count(), free_initial - 3);
    p.unlink(false).unwrap();
    assert_eq!(fs.fat().free().count(), free_initial);
    assert!(!p.exists().unwrap());
    assert!(matches!(p.unlink(false), Err(FatError::NotFound(_))));
    p.unlink(true).unwrap();
}

#[test]
fn test_readonly_fs_rejects_mutation() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::Read);
    let p = fs.root().join("nope.txt");
    assert!(matches!(
        p.create(),
        Err(FatError::PermissionDenied(_))
    ));
    assert!(matches!(
        fs.root().join("d").mkdir(false, false),
        Err(FatError::PermissionDenied(_))
    ));
    assert!(matches!(fs.fat().set(2, 0), Err(FatError::PermissionDenied(_))));
}

#[test]
fn test_cow_mapping_leaves_file_untouched() {
    let file = image(&ImageSpec::fat16());
    let before = std::fs::read(file.path()).unwrap();
    {
        let (_img, fs) = open_fs(file.path(), Access::Cow);
        assert!(!fs.read_only());
        fs.root().join("volatile").write_text("scratch").unwrap();
        assert!(fs.root().join("volatile").exists().unwrap());
    }
    assert_eq!(std::fs::read(file.path()).unwrap(), before);
}

#[test]
fn test_fat32_free_count_round_trip() {
    let file = image(&ImageSpec::fat32());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let (free_before, _) = fs.fs_info().unwrap();

    let fat = fs.fat();
    let cluster = fat.alloc().unwrap();
    fat.mark_end(cluster).unwrap();
    let (free, last) = fs.fs_info().unwrap();
    assert_eq!(free, free_before - 1);
    assert_eq!(last, cluster);

    fat.mark_free(cluster).unwrap();
    let (free, last) = fs.fs_info().unwrap();
    assert_eq!(free, free_before);
    assert_eq!(last, cluster);
}

#[test]
fn test_fat32_free_count_invariant() {
    let file = image(&ImageSpec::fat32());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    // A small storm of allocations, frees, and file operations
    let fat = fs.fat();
    let a = fat.alloc().unwrap();
    fat.mark_end(a).unwrap();
    let b = fat.alloc().unwrap();
    fat.set(a, b).unwrap();
    fat.mark_end(b).unwrap();
    fs.root().join("f1").write_bytes(&[0u8; 700]).unwrap();
    fs.root().join("f2").write_bytes(&[1u8; 100]).unwrap();
    fs.root().join("f1").unlink(false).unwrap();
    fat.mark_free(b).unwrap();
    fat.mark_free(a).unwrap();

    let (free, _) = fs.fs_info().unwrap();
    let zeros = (2..fat.len())
        .filter(|&k| fat.get(k).unwrap() == 0)
        .count() as u32;
    assert_eq!(free, zeros);
}

#[test]
fn test_mirror_invariant() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    fs.root().join("a").write_bytes(&[0u8; 1500]).unwrap();
    fs.root().join("b").write_bytes(&[1u8; 600]).unwrap();
    fs.root().join("a").unlink(false).unwrap();
    let fat = fs.fat();
    for k in 0..fat.len() {
        let values = fat.get_all(k).unwrap();
        assert!(values.windows(2).all(|w| w[0] == w[1]), "mirror mismatch at {k}");
    }
}

#[test]
fn test_chain_terminates_on_cycle() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let fat = fs.fat();
    // Manufacture the cycle 10 -> 11 -> 12 -> 10
    fat.set(10, 11).unwrap();
    fat.set(11, 12).unwrap();
    fat.set(12, 10).unwrap();
    let chain: Vec<u32> = fat.chain(10).collect();
    assert_eq!(chain, [10, 11, 12]);
    // And a self-loop
    fat.set(20, 20).unwrap();
    assert_eq!(fat.chain(20).collect::<Vec<_>>(), [20]);
}

#[test]
fn test_fat_set_guards() {
    let file = image(&ImageSpec::fat16());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    let fat = fs.fat();
    assert!(matches!(fat.set(0, 1), Err(FatError::IndexError(0))));
    assert!(matches!(fat.set(1, 1), Err(FatError::IndexError(1))));
    assert!(matches!(
        fat.set(fat.len(), 1),
        Err(FatError::IndexError(_))
    ));
    assert!(matches!(fat.get(fat.len()), Err(FatError::IndexError(_))));
    assert!(matches!(fat.set(2, 0x1_0000), Err(FatError::InvalidValue(_))));
    assert!(matches!(fs.clusters().get(0), Err(FatError::IndexError(0))));
    assert!(matches!(fs.clusters().get(1), Err(FatError::IndexError(1))));
}

#[test]
fn test_fat12_width_guard() {
    let file = image(&ImageSpec::fat12());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    assert!(matches!(
        fs.fat().set(2, 0x1000),
        Err(FatError::InvalidValue(_))
    ));
    fs.fat().set(2, 0xFFF).unwrap();
    assert_eq!(fs.fat().get(2).unwrap(), 0xFFF);
}

#[test]
fn test_no_space_reported() {
    let file = image(&ImageSpec::fat12());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    // Claim every free cluster, then ask for one more
    let free: Vec<u32> = fs.fat().free().collect();
    for k in &free {
        fs.fat().mark_end(*k).unwrap();
    }
    assert!(matches!(fs.fat().alloc(), Err(FatError::NoSpace)));
    // A write that needs a fresh cluster surfaces the condition too
    let err = fs.root().join("full").write_bytes(b"x").unwrap_err();
    let io: std::io::Error = match err {
        FatError::Io(e) => e,
        other => other.into(),
    };
    assert_eq!(io.kind(), std::io::ErrorKind::StorageFull);
}

#[test]
fn test_fat32_root_directory_is_chain() {
    let file = image(&ImageSpec::fat32());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    // Enough entries to spill the root directory past one cluster
    for i in 0..40 {
        fs.root()
            .join(format!("long-file-name-number-{i:02}.txt"))
            .write_text("x")
            .unwrap();
    }
    let names: Vec<String> = fs
        .root()
        .iterdir()
        .unwrap()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(names.len(), 40);
    assert!(names.contains(&"long-file-name-number-39.txt".to_string()));
}

#[test]
fn test_fixed_root_fills_up() {
    let file = image(&ImageSpec::fat12());
    let (_img, fs) = open_fs(file.path(), Access::ReadWrite);
    // 224 root slots; each short-named file takes one
    for i in 0..224 {
        fs.root().join(format!("F{i}")).write_text("").unwrap();
    }
    assert!(matches!(
        fs.root().join("F224").create(),
        Err(FatError::NoSpace)
    ));
}
