mod common;

use std::fs;

use common::{scratch_path, text};
use mpq_store::host::*;
use mpq_store::*;

#[test]
fn host_lifecycle() {
    let (dir, path) = scratch_path("host.mpq");
    let source = dir.path().join("readme.txt");
    let dest = dir.path().join("out.txt");
    fs::write(&source, text(7000)).unwrap();

    let handle = create_archive(&path, MPQ_CREATE_LISTFILE, 4).unwrap();
    assert!(add_file(
        handle,
        &source,
        "docs\\readme.txt",
        MPQ_ADD_COMPRESS | MPQ_ADD_ENCRYPTED | MPQ_ADD_FIX_KEY
    ));
    assert!(!add_file(handle, &source, "docs\\readme.txt", MPQ_ADD_COMPRESS));
    assert!(add_file(
        handle,
        &source,
        "docs\\readme.txt",
        MPQ_ADD_COMPRESS | MPQ_ADD_REPLACE_EXISTING | MPQ_ADD_SECTOR_CRC
    ));
    assert!(!add_file(handle, dir.path().join("missing"), "x", 0));
    assert!(close_archive(handle));

    assert!(list_files(handle).is_empty());
    assert!(!extract_file(handle, "docs\\readme.txt", &dest));

    let handle = open_archive(&path, 0, MPQ_OPEN_READ_ONLY).unwrap();
    assert_eq!(list_files(handle), vec!["docs\\readme.txt"]);
    assert!(extract_file(handle, "DOCS/README.TXT", &dest));
    assert_eq!(fs::read(&dest).unwrap(), text(7000));
    assert!(!add_file(handle, &source, "other.txt", 0));
    assert!(close_archive(handle));
}

#[test]
fn host_reports_open_failures() {
    let (_dir, path) = scratch_path("missing.mpq");

    assert!(matches!(
        open_archive(&path, 0, 0),
        Err(Error::Io { .. })
    ));

    fs::write(&path, b"definitely not an archive").unwrap();
    assert!(matches!(
        open_archive(&path, 0, MPQ_OPEN_READ_ONLY),
        Err(Error::InvalidFormat)
    ));
    assert!(matches!(
        create_archive(&path, 0, 4),
        Err(Error::AlreadyExists { .. })
    ));

    let handle = create_archive(&path, MPQ_CREATE_OVERWRITE, 4).unwrap();
    assert!(list_files(handle).is_empty());
    assert!(close_archive(handle));
}

#[test]
fn host_handles_unicode_paths() {
    let (dir, _) = scratch_path("unused.mpq");
    let folder = dir.path().join("中文路径-测试");
    fs::create_dir(&folder).unwrap();

    let path = folder.join("资料包-测试.mpq");
    let source = folder.join("源文件-你好.txt");
    let dest = folder.join("输出文件-再见.txt");
    let content = "来自中文路径的内容";
    fs::write(&source, content).unwrap();

    let handle = create_archive(&path, MPQ_CREATE_LISTFILE, 16).unwrap();
    assert!(add_file(handle, &source, "中文/存档文件.txt", MPQ_ADD_COMPRESS));
    assert!(close_archive(handle));
    assert!(path.exists());

    let handle = open_archive(&path, 0, MPQ_OPEN_READ_ONLY).unwrap();
    assert!(list_files(handle).contains(&"中文/存档文件.txt".to_string()));
    assert!(extract_file(handle, "中文/存档文件.txt", &dest));
    assert!(close_archive(handle));

    assert_eq!(fs::read_to_string(&dest).unwrap(), content);
}
