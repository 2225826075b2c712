//! Archive probing and extraction
//!
//! The pipeline talks to an [`ArchiveTool`]: it asks whether a local file is
//! an archive and unpacks it into a destination directory. Two tools ship
//! with the crate:
//!
//! - [`SevenZipCli`] runs the external `7z` binary (`t` to probe, `x` to unpack)
//! - [`NativeArchiveTool`] sniffs the file signature and unpacks ZIP, 7z and
//!   RAR archives in-process through [`ZipExtractor`], [`SevenZipExtractor`]
//!   and [`RarExtractor`]

mod native;
mod rar;
mod sevenz;
mod sevenzip_cli;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use native::NativeArchiveTool;
pub use rar::RarExtractor;
pub use sevenz::SevenZipExtractor;
pub use sevenzip_cli::SevenZipCli;
pub use zip::ZipExtractor;

use crate::error::Result;
use async_trait::async_trait;
use std::io::Read;
use std::path::Path;

/// Probes and unpacks archives
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Whether the file at `path` is an archive this tool can unpack
    ///
    /// A file that cannot be recognized is not an error; `Ok(false)` is
    /// returned. Errors are reserved for failures to inspect the file at all.
    async fn is_archive(&self, path: &Path) -> Result<bool>;

    /// Unpack `archive` into `destination`, overwriting existing files
    async fn extract(&self, archive: &Path, destination: &Path) -> Result<()>;

    /// Short name used in log output
    fn name(&self) -> &'static str;
}

/// Archive container formats recognized by signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// ZIP (`PK`)
    Zip,
    /// 7-Zip (`7z\xBC\xAF\x27\x1C`)
    SevenZip,
    /// RAR 4 or 5 (`Rar!\x1A\x07`)
    Rar,
}

const ZIP_SIGNATURES: [&[u8]; 3] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const SEVENZIP_SIGNATURE: &[u8] = b"7z\xBC\xAF\x27\x1C";
const RAR_SIGNATURE: &[u8] = b"Rar!\x1A\x07";

/// Identify the archive format of `header` (the first bytes of a file)
pub fn detect_format(header: &[u8]) -> Option<ArchiveFormat> {
    if ZIP_SIGNATURES.iter().any(|sig| header.starts_with(sig)) {
        Some(ArchiveFormat::Zip)
    } else if header.starts_with(SEVENZIP_SIGNATURE) {
        Some(ArchiveFormat::SevenZip)
    } else if header.starts_with(RAR_SIGNATURE) {
        Some(ArchiveFormat::Rar)
    } else {
        None
    }
}

/// Read the leading bytes of `path` and identify its archive format
pub fn sniff_format(path: &Path) -> Result<Option<ArchiveFormat>> {
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        let read = file.read(&mut header[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(detect_format(&header[..filled]))
}
