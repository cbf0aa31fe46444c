use jpak_format::{Error, JpakArchive, JpakBuilder};
use std::fs;
use tempfile::TempDir;

#[test]
fn jpak_builder_creates_valid_package() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("builder-test.jpak");

    JpakBuilder::new()
        .with_file("/data/a.bin", b"0123456789".to_vec())
        .with_directory("/data/nested")
        .write_to(&path)
        .unwrap();

    let archive = JpakArchive::open(&path).unwrap();
    let data = archive.find_directory_entry("/data").unwrap();
    assert_eq!(data.child_names(), vec!["nested", "a.bin"]);
    assert_eq!(archive.read_range("/data/a.bin", 5, 100).unwrap(), b"56789");
}

#[test]
fn jpak_builder_packs_directory_tree_in_name_order() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("b-dir/inner")).unwrap();
    fs::create_dir_all(src.join("a-dir")).unwrap();
    fs::write(src.join("z.txt"), b"zzz").unwrap();
    fs::write(src.join("m.txt"), b"m").unwrap();
    fs::write(src.join("b-dir/inner/deep.txt"), b"deep").unwrap();

    let out = temp.path().join("tree.jpak");
    JpakBuilder::from_dir(&src).unwrap().write_to(&out).unwrap();

    let archive = JpakArchive::open(&out).unwrap();
    let root = archive.root();
    assert_eq!(root.child_names(), vec!["a-dir", "b-dir", "m.txt", "z.txt"]);
    assert_eq!(archive.read_file("/b-dir/inner/deep.txt").unwrap(), b"deep");
    assert_eq!(archive.read_file("/z.txt").unwrap(), b"zzz");
    assert!(archive.find_directory_entry("/a-dir").unwrap().child_names().is_empty());
}

#[test]
fn jpak_archive_rejects_non_jpak_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("not-a-package.bin");
    fs::write(&path, b"PK\x03\x04 this is a zip header, not jpak").unwrap();

    let err = JpakArchive::open(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidFormat(_)));
}

#[test]
fn jpak_archive_rejects_corrupt_table() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("corrupt.jpak");
    let mut data = b"JPAK1{not json".to_vec();
    data.extend_from_slice(&5u32.to_le_bytes());
    fs::write(&path, &data).unwrap();

    let err = JpakArchive::open(&path).unwrap_err();
    assert!(matches!(err, Error::JsonError(_)));
}

#[test]
fn jpak_archive_missing_file_is_io_error() {
    let temp = TempDir::new().unwrap();
    let err = JpakArchive::open(temp.path().join("nope.jpak")).unwrap_err();
    assert!(matches!(err, Error::IoError(_)));
}
