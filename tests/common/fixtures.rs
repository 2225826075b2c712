//! Archive fixtures built with the zip crate

use std::io::{Cursor, Write};
use std::path::Path;

/// Leading bytes of an MP3 with an ID3 tag
pub const FAKE_MP3: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00audio";

/// Build an in-memory ZIP archive containing `entries`
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// `album.zip` containing `track1.mp3` and `track2.zip`, which itself holds `track3.mp3`
pub fn nested_album() -> Vec<u8> {
    let inner = zip_bytes(&[("track3.mp3", FAKE_MP3)]);
    zip_bytes(&[("track1.mp3", FAKE_MP3), ("track2.zip", inner.as_slice())])
}

/// Write `bytes` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, bytes: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}
