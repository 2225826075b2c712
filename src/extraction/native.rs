//! In-process archive tool built on the zip, sevenz-rust and unrar crates.

use super::{ArchiveFormat, ArchiveTool, RarExtractor, SevenZipExtractor, ZipExtractor, sniff_format};
use crate::error::{Error, ExtractError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;

/// Archive tool that needs no external binary
///
/// Formats are recognized by their leading signature bytes, not by file
/// extension, so renamed archives are still unpacked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeArchiveTool;

impl NativeArchiveTool {
    /// Create a new native tool
    pub fn new() -> Self {
        Self
    }

    fn probe(path: &Path) -> Result<bool> {
        match sniff_format(path)? {
            // A ZIP signature alone also matches many container formats
            Some(ArchiveFormat::Zip) => Ok(ZipExtractor::can_open(path)),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    fn unpack(archive: &Path, destination: &Path) -> Result<Vec<PathBuf>> {
        match sniff_format(archive)? {
            Some(ArchiveFormat::Zip) => ZipExtractor::extract(archive, destination),
            Some(ArchiveFormat::SevenZip) => SevenZipExtractor::extract(archive, destination),
            Some(ArchiveFormat::Rar) => RarExtractor::extract(archive, destination),
            None => Err(ExtractError::UnsupportedFormat {
                archive: archive.to_path_buf(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl ArchiveTool for NativeArchiveTool {
    async fn is_archive(&self, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        spawn_blocking(move || Self::probe(&path))
            .await
            .map_err(|e| Error::Other(format!("archive probe task failed: {}", e)))?
    }

    async fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        let archive_owned = archive.to_path_buf();
        let destination_owned = destination.to_path_buf();

        spawn_blocking(move || Self::unpack(&archive_owned, &destination_owned))
            .await
            .map_err(|e| {
                Error::Extract(ExtractError::Failed {
                    archive: archive.to_path_buf(),
                    reason: format!("extraction task panicked: {}", e),
                })
            })??;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "native"
    }
}
