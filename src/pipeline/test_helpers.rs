//! Fake collaborators for pipeline tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::config::{Config, RemoteConfig, SourceConfig};
use crate::error::{ExtractError, Result, TransferError};
use crate::extraction::ArchiveTool;
use crate::transport::RemoteTransport;
use crate::types::{Identity, RemoteFile};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// In-memory transport with programmable failures and gates
#[derive(Default)]
pub(crate) struct FakeTransport {
    listings: BTreeMap<String, Vec<RemoteFile>>,
    failing: HashSet<String>,
    gates: HashMap<String, Arc<Semaphore>>,
    failing_listing: HashSet<String>,
    downloads: AtomicUsize,
    started: AtomicUsize,
    downloaded: Mutex<Vec<Identity>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// List `relative_path` under `source` with `hash`
    pub(crate) fn with_file(mut self, source: &str, relative_path: &str, hash: &str) -> Self {
        self.listings
            .entry(source.to_string())
            .or_default()
            .push(RemoteFile {
                relative_path: relative_path.to_string(),
                size: Some(relative_path.len() as u64),
                hash: hash.to_string(),
            });
        self
    }

    /// Make every download of `relative_path` fail
    pub(crate) fn failing(mut self, relative_path: &str) -> Self {
        self.failing.insert(relative_path.to_string());
        self
    }

    /// Make listing `source` fail
    pub(crate) fn failing_listing(mut self, source: &str) -> Self {
        self.failing_listing.insert(source.to_string());
        self
    }

    /// Hold downloads of `relative_path` until the returned gate gets a permit
    pub(crate) fn gated(&mut self, relative_path: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .insert(relative_path.to_string(), Arc::clone(&gate));
        gate
    }

    /// Number of finished download calls
    pub(crate) fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of download calls that have started
    pub(crate) fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn downloaded(&self) -> Vec<Identity> {
        self.downloaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteTransport for FakeTransport {
    async fn list_files(&self, source: &str) -> Result<Vec<RemoteFile>> {
        if self.failing_listing.contains(source) {
            return Err(TransferError::Fatal {
                command: format!("list {}", source),
                code: 1,
                output: String::new(),
            }
            .into());
        }
        Ok(self.listings.get(source).cloned().unwrap_or_default())
    }

    async fn download(&self, identity: &Identity, destination: &Path) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gates.get(&identity.relative_path) {
            let _permit = gate.acquire().await.unwrap();
        }

        let result = if self.failing.contains(&identity.relative_path) {
            Err(TransferError::Failed {
                path: identity.relative_path.clone(),
                reason: "simulated transfer failure".to_string(),
            }
            .into())
        } else {
            std::fs::create_dir_all(destination.parent().unwrap()).unwrap();
            std::fs::write(destination, identity.key()).unwrap();
            Ok(())
        };

        self.downloaded.lock().unwrap().push(identity.clone());
        self.downloads.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Archive tool that decides by file name
///
/// A file is an archive if its name was registered with
/// [`FakeArchiveTool::with_archive`]; extracting it writes the registered
/// member paths.
#[derive(Default)]
pub(crate) struct FakeArchiveTool {
    archives: HashMap<String, Vec<String>>,
    failing_extract: HashSet<String>,
    failing_probe: HashSet<String>,
    delays: HashMap<String, Duration>,
    extractions: AtomicUsize,
    extracted: Mutex<Vec<String>>,
}

impl FakeArchiveTool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_archive(mut self, name: &str, members: &[&str]) -> Self {
        self.archives.insert(
            name.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub(crate) fn failing_extract(mut self, name: &str) -> Self {
        self.failing_extract.insert(name.to_string());
        self
    }

    pub(crate) fn failing_probe(mut self, name: &str) -> Self {
        self.failing_probe.insert(name.to_string());
        self
    }

    /// Hold extraction of `name` for `delay` before unpacking
    pub(crate) fn slow_extract(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub(crate) fn extraction_count(&self) -> usize {
        self.extractions.load(Ordering::SeqCst)
    }

    /// Names of the archives whose extraction started, in start order
    pub(crate) fn extracted(&self) -> Vec<String> {
        self.extracted.lock().unwrap().clone()
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveTool for FakeArchiveTool {
    async fn is_archive(&self, path: &Path) -> Result<bool> {
        let name = Self::file_name(path);
        if self.failing_probe.contains(&name) {
            return Err(ExtractError::Failed {
                archive: path.to_path_buf(),
                reason: "simulated probe failure".to_string(),
            }
            .into());
        }
        Ok(self.archives.contains_key(&name))
    }

    async fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        let name = Self::file_name(archive);
        self.extracted.lock().unwrap().push(name.clone());
        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing_extract.contains(&name) {
            return Err(ExtractError::Failed {
                archive: archive.to_path_buf(),
                reason: "simulated extraction failure".to_string(),
            }
            .into());
        }
        let Some(members) = self.archives.get(&name) else {
            return Err(ExtractError::UnsupportedFormat {
                archive: archive.to_path_buf(),
            }
            .into());
        };

        for member in members {
            let path = destination.join(member);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, member.as_bytes()).unwrap();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Configuration rooted in `dir` with the given sources on one remote
pub(crate) fn test_config(dir: &TempDir, sources: &[&str], downloads: usize) -> Config {
    let mut config = Config::default();
    config.settings.destination_dir = dir.path().join("downloads");
    config.settings.metadata_path = dir.path().join("metadata.json");
    config.settings.completion_wait = Duration::from_millis(50);
    config.settings.metadata_flush_interval = Duration::from_secs(3600);
    config.settings.progress_interval = Duration::from_secs(3600);
    config.settings.minimise_json = false;
    for source in sources {
        config.sources.insert(
            source.to_string(),
            SourceConfig {
                remote_name: "remote".to_string(),
                remote_path: format!("/{}", source),
            },
        );
    }
    config.remotes.insert(
        "remote".to_string(),
        RemoteConfig {
            max_concurrent_downloads: downloads,
        },
    );
    config
}

/// Local path of `identity` below the configured destination
pub(crate) fn local_path(config: &Config, identity: &Identity) -> PathBuf {
    identity.local_path(&config.settings.destination_dir)
}
