//! Transport serving sources from local directories.

use super::RemoteTransport;
use crate::error::{Error, Result, TransferError};
use crate::types::{Identity, RemoteFile};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Transport whose "remote" is a directory on the local machine
///
/// The content hash reported for each file is its SHA-256, so a changed file
/// is picked up on the next run exactly like a changed remote file.
#[derive(Debug, Clone, Default)]
pub struct LocalDirectoryTransport {
    roots: BTreeMap<String, PathBuf>,
}

impl LocalDirectoryTransport {
    /// Create a transport with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `source` from `root`
    pub fn with_source(mut self, source: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(source.into(), root.into());
        self
    }

    fn root(&self, source: &str) -> Result<&PathBuf> {
        self.roots.get(source).ok_or_else(|| {
            TransferError::Failed {
                path: source.to_string(),
                reason: "no local directory configured for source".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl RemoteTransport for LocalDirectoryTransport {
    async fn list_files(&self, source: &str) -> Result<Vec<RemoteFile>> {
        let root = self.root(source)?.clone();
        tokio::task::spawn_blocking(move || list_directory(&root))
            .await
            .map_err(|e| Error::Other(format!("listing task failed: {}", e)))?
    }

    async fn download(&self, identity: &Identity, destination: &Path) -> Result<()> {
        let source_path = identity
            .relative_path
            .split('/')
            .fold(self.root(&identity.source)?.clone(), |path, part| path.join(part));

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source_path, destination)
            .await
            .map_err(|e| TransferError::Failed {
                path: source_path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

fn list_directory(root: &Path) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| TransferError::Failed {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Other(e.to_string()))?;
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(RemoteFile {
            relative_path,
            size: entry.metadata().ok().map(|m| m.len()),
            hash: sha256_file(entry.path())?,
        });
    }
    Ok(files)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lists_nested_files_sorted_with_content_hash() {
        let remote = TempDir::new().unwrap();
        std::fs::create_dir_all(remote.path().join("b")).unwrap();
        std::fs::write(remote.path().join("b/two.txt"), b"two").unwrap();
        std::fs::write(remote.path().join("a.txt"), b"one").unwrap();
        let transport = LocalDirectoryTransport::new().with_source("docs", remote.path());

        let files = transport.list_files("docs").await.unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b/two.txt"]);
        assert_eq!(files[0].size, Some(3));
        assert_eq!(files[0].hash.len(), 64);
        assert_ne!(files[0].hash, files[1].hash);
    }

    #[tokio::test]
    async fn hash_changes_with_content() {
        let remote = TempDir::new().unwrap();
        let transport = LocalDirectoryTransport::new().with_source("docs", remote.path());
        std::fs::write(remote.path().join("a.txt"), b"first").unwrap();
        let before = transport.list_files("docs").await.unwrap();

        std::fs::write(remote.path().join("a.txt"), b"second").unwrap();
        let after = transport.list_files("docs").await.unwrap();

        assert_ne!(before[0].hash, after[0].hash);
    }

    #[tokio::test]
    async fn download_copies_into_new_directories() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::create_dir_all(remote.path().join("nested")).unwrap();
        std::fs::write(remote.path().join("nested/file.bin"), b"payload").unwrap();
        let transport = LocalDirectoryTransport::new().with_source("docs", remote.path());
        let identity = Identity::new("docs", "nested/file.bin");
        let destination = identity.local_path(local.path());

        transport.download(&identity, &destination).await.unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn unknown_source_and_missing_file_fail() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let transport = LocalDirectoryTransport::new().with_source("docs", remote.path());

        assert!(transport.list_files("photos").await.is_err());

        let identity = Identity::new("docs", "missing.bin");
        let result = transport
            .download(&identity, &identity.local_path(local.path()))
            .await;
        assert!(matches!(
            result,
            Err(Error::Transfer(TransferError::Failed { .. }))
        ));
    }
}
