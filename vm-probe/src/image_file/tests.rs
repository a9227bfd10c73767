use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use super::*;

fn scratch(name: &str, contents: &[u8]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("vm-probe-{}-{name}", std::process::id()));
    File::create(&path).unwrap().write_all(contents).unwrap();
    path
}

#[test]
fn reads_at_offset() {
    let path = scratch("offset", b"0123456789");
    let mut image = ImageFile::open(&path).unwrap();
    assert_eq!(image.size().unwrap(), 10);

    let mut buf = [0; 4];
    assert_eq!(image.read_at(3, &mut buf), 4);
    assert_eq!(&buf, b"3456");
    assert_eq!(image.read_at(8, &mut buf), 2);
    assert!(image.take_error().is_none());

    fs::remove_file(path).unwrap();
}

#[test]
fn read_errors_are_kept() {
    let path = scratch("write-only", b"0123456789");
    // 只写打开，读取必然出错
    let mut image = ImageFile::new(File::options().write(true).open(&path).unwrap());

    let mut buf = [0; 4];
    assert_eq!(image.read_at(0, &mut buf), 0);
    assert!(image.take_error().is_some());
    assert!(image.take_error().is_none());

    fs::remove_file(path).unwrap();
}
