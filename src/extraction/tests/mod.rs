use crate::error::{Error, ExtractError};
use crate::extraction::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing multiple files
fn create_zip_archive_multi(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

/// Create a valid 7z archive from a source directory using sevenz_rust
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

// ---------------------------------------------------------------------------
// Signature detection
// ---------------------------------------------------------------------------

#[test]
fn test_detect_format_signatures() {
    assert_eq!(detect_format(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
    assert_eq!(detect_format(b"PK\x05\x06"), Some(ArchiveFormat::Zip));
    assert_eq!(
        detect_format(b"7z\xBC\xAF\x27\x1C\x00\x04"),
        Some(ArchiveFormat::SevenZip)
    );
    assert_eq!(detect_format(b"Rar!\x1A\x07\x00"), Some(ArchiveFormat::Rar));
    assert_eq!(
        detect_format(b"Rar!\x1A\x07\x01\x00"),
        Some(ArchiveFormat::Rar)
    );
    assert_eq!(detect_format(b"ID3\x04"), None);
    assert_eq!(detect_format(b""), None);
}

#[test]
fn test_sniff_format_handles_short_and_empty_files() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("empty.bin");
    let short = dir.path().join("short.bin");
    std::fs::write(&empty, b"").unwrap();
    std::fs::write(&short, b"PK").unwrap();

    assert_eq!(sniff_format(&empty).unwrap(), None);
    assert_eq!(sniff_format(&short).unwrap(), None);
    assert!(sniff_format(&dir.path().join("missing.bin")).is_err());
}

// ---------------------------------------------------------------------------
// ZIP
// ---------------------------------------------------------------------------

#[test]
fn test_zip_extract_nested_entries() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("album.zip");
    let dest = dir.path().join("album.zip.x");
    create_zip_archive_multi(
        &archive,
        &[("track1.mp3", b"one"), ("disc2/track2.mp3", b"two")],
    );

    let files = ZipExtractor::extract(&archive, &dest).unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(std::fs::read(dest.join("track1.mp3")).unwrap(), b"one");
    assert_eq!(std::fs::read(dest.join("disc2/track2.mp3")).unwrap(), b"two");
}

#[test]
fn test_zip_extract_overwrites_previous_output() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    let dest = dir.path().join("a.zip.x");
    create_zip_archive_multi(&archive, &[("file.txt", b"fresh")]);
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("file.txt"), b"stale and longer").unwrap();

    ZipExtractor::extract(&archive, &dest).unwrap();

    assert_eq!(std::fs::read(dest.join("file.txt")).unwrap(), b"fresh");
}

#[test]
fn test_zip_entry_escaping_destination_is_rejected() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("evil.zip");
    let dest = dir.path().join("evil.zip.x");
    create_zip_archive_multi(&archive, &[("../escaped.txt", b"gotcha")]);

    let result = ZipExtractor::extract(&archive, &dest);

    assert!(matches!(
        result,
        Err(Error::Extract(ExtractError::PathTraversal { .. }))
    ));
    assert!(!dir.path().join("escaped.txt").exists());
}

#[test]
fn test_zip_corrupt_archive_fails() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, b"PK\x03\x04 this is not really a zip").unwrap();

    let result = ZipExtractor::extract(&archive, &dir.path().join("broken.zip.x"));

    assert!(matches!(
        result,
        Err(Error::Extract(ExtractError::Failed { .. }))
    ));
    assert!(!ZipExtractor::can_open(&archive));
}

// ---------------------------------------------------------------------------
// 7z
// ---------------------------------------------------------------------------

#[test]
fn test_7z_extract_round_trip() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source");
    std::fs::create_dir_all(source.join("inner")).unwrap();
    std::fs::write(source.join("a.txt"), b"alpha").unwrap();
    std::fs::write(source.join("inner/b.txt"), b"beta").unwrap();
    let archive = dir.path().join("bundle.7z");
    create_7z_archive(&archive, &source);
    let dest = dir.path().join("bundle.7z.x");

    let files = SevenZipExtractor::extract(&archive, &dest).unwrap();

    assert_eq!(files.len(), 2);
    assert_eq!(sniff_format(&archive).unwrap(), Some(ArchiveFormat::SevenZip));
    let contents: Vec<Vec<u8>> = files.iter().map(|f| std::fs::read(f).unwrap()).collect();
    assert!(contents.contains(&b"alpha".to_vec()));
    assert!(contents.contains(&b"beta".to_vec()));
}

#[test]
fn test_7z_entry_path_keeps_only_plain_components() {
    assert_eq!(
        SevenZipExtractor::entry_path("disc1/./track.mp3"),
        Some(Path::new("disc1").join("track.mp3"))
    );
    assert_eq!(SevenZipExtractor::entry_path("../escaped.txt"), None);
    assert_eq!(SevenZipExtractor::entry_path("inner/../../escaped.txt"), None);
    assert_eq!(SevenZipExtractor::entry_path("/etc/passwd"), None);
    assert_eq!(SevenZipExtractor::entry_path("."), Some(PathBuf::new()));
}

#[test]
fn test_7z_entry_escaping_destination_is_rejected() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("evil.7z");
    let mut writer = sevenz_rust::SevenZWriter::create(&archive).unwrap();
    let mut entry = sevenz_rust::SevenZArchiveEntry::default();
    entry.name = "../escaped.txt".to_string();
    entry.has_stream = true;
    writer
        .push_archive_entry(entry, Some(&b"outside"[..]))
        .unwrap();
    writer.finish().unwrap();
    let dest = dir.path().join("nested").join("evil.7z.x");

    let err = SevenZipExtractor::extract(&archive, &dest).unwrap_err();

    assert!(matches!(
        err,
        Error::Extract(ExtractError::PathTraversal { .. })
    ));
    assert!(!dir.path().join("nested").join("escaped.txt").exists());
}

// ---------------------------------------------------------------------------
// Native tool
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_native_tool_probes_by_content() {
    let dir = TempDir::new().unwrap();
    let zip = dir.path().join("renamed.bin");
    let text = dir.path().join("notes.zip");
    let fake = dir.path().join("fake.zip");
    create_zip_archive_multi(&zip, &[("a.txt", b"a")]);
    std::fs::write(&text, b"plain text with a misleading extension").unwrap();
    std::fs::write(&fake, b"PK\x03\x04 garbage").unwrap();
    let tool = NativeArchiveTool::new();

    assert!(tool.is_archive(&zip).await.unwrap());
    assert!(!tool.is_archive(&text).await.unwrap());
    assert!(!tool.is_archive(&fake).await.unwrap());
}

#[tokio::test]
async fn test_native_tool_extracts_zip() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("album.zip");
    create_zip_archive_multi(&archive, &[("track1.mp3", b"one")]);
    let dest = dir.path().join("album.zip.x");

    NativeArchiveTool::new()
        .extract(&archive, &dest)
        .await
        .unwrap();

    assert!(dest.join("track1.mp3").is_file());
}

#[tokio::test]
async fn test_native_tool_rejects_unknown_format() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("song.mp3");
    std::fs::write(&file, b"ID3 not an archive").unwrap();

    let result = NativeArchiveTool::new()
        .extract(&file, &dir.path().join("song.mp3.x"))
        .await;

    assert!(matches!(
        result,
        Err(Error::Extract(ExtractError::UnsupportedFormat { .. }))
    ));
}

#[tokio::test]
async fn test_native_tool_missing_file_probe_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(
        NativeArchiveTool::new()
            .is_archive(&dir.path().join("missing"))
            .await
            .is_err()
    );
}
