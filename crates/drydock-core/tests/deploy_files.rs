use std::io::Write;
use std::path::Path;

use tempfile::TempDir;

use drydock_core::fs::{copy_dir_filtered, extract_zip_or_reuse, is_network_path, CopyFilter};

fn write_file(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn deployment_copy_excludes_backup_payloads() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    write_file(&src.join("Web.config"), b"<xml/>");
    write_file(&src.join("bin").join("App.dll"), b"bin");
    write_file(&src.join("db").join("data.backup"), b"dump");
    write_file(&src.join("stray.bak"), b"dump");
    write_file(&src.join("notes.BACKUP"), b"dump");

    copy_dir_filtered(&src, &dst, &CopyFilter::deployment_default()).unwrap();

    assert!(dst.join("Web.config").exists());
    assert!(dst.join("bin").join("App.dll").exists());
    assert!(!dst.join("db").exists(), "db directory must not be copied");
    assert!(!dst.join("stray.bak").exists());
    assert!(!dst.join("notes.BACKUP").exists(), "extension match is case-insensitive");
}

#[test]
fn copy_preserves_nested_structure() {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");
    write_file(&src.join("a").join("b").join("c.txt"), b"deep");

    copy_dir_filtered(&src, &dst, &CopyFilter::deployment_default()).unwrap();

    assert_eq!(std::fs::read(dst.join("a/b/c.txt")).unwrap(), b"deep");
}

fn write_zip(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file("Web.config", options).unwrap();
    writer.write_all(b"<xml/>").unwrap();
    writer.start_file("db/data.backup", options).unwrap();
    writer.write_all(b"dump").unwrap();
    writer.finish().unwrap();
}

#[test]
fn extracts_archive_next_to_itself() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("Studio_8.1.3.zip");
    write_zip(&archive);

    let extracted = extract_zip_or_reuse(&archive).unwrap();

    assert_eq!(extracted, temp.path().join("Studio_8.1.3"));
    assert!(extracted.join("Web.config").exists());
    assert!(extracted.join("db").join("data.backup").exists());
}

#[test]
fn reuses_existing_extraction() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("Studio_8.1.3.zip");
    write_zip(&archive);
    let prior = temp.path().join("Studio_8.1.3");
    write_file(&prior.join("marker.txt"), b"already here");

    let extracted = extract_zip_or_reuse(&archive).unwrap();

    assert_eq!(extracted, prior);
    assert!(extracted.join("marker.txt").exists());
    assert!(!extracted.join("Web.config").exists(), "no re-extraction expected");
}

#[test]
fn directory_input_is_taken_as_is() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("already-unpacked");
    std::fs::create_dir(&dir).unwrap();

    assert_eq!(extract_zip_or_reuse(&dir).unwrap(), dir);
}

#[test]
fn network_paths_are_recognized() {
    assert!(is_network_path(Path::new(r"\\artifacts\builds\Studio.zip")));
    assert!(!is_network_path(Path::new("/mnt/artifacts/Studio.zip")));
    assert!(!is_network_path(Path::new(r"C:\builds\Studio.zip")));
}
