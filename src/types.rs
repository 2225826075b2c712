//! Core types for tree-sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Unique key for one file instance: the source it was listed from plus its
/// path relative to that source's root.
///
/// Serialized as `source/relative_path` when used as a metadata key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    /// Name of the configured source
    pub source: String,
    /// Path relative to the source root, always `/`-separated
    pub relative_path: String,
}

impl Identity {
    /// Create a new identity, normalizing path separators to `/`
    pub fn new(source: impl Into<String>, relative_path: impl AsRef<str>) -> Self {
        Self {
            source: source.into(),
            relative_path: normalize_relative(relative_path.as_ref()),
        }
    }

    /// The metadata key for this identity (`source/relative_path`)
    pub fn key(&self) -> String {
        format!("{}/{}", self.source, self.relative_path)
    }

    /// Rebuild an identity from its metadata key
    ///
    /// Returns `None` when the key has no source component or no path.
    pub fn from_key(key: &str) -> Option<Self> {
        let (source, relative_path) = key.split_once('/')?;
        if source.is_empty() || relative_path.is_empty() {
            return None;
        }
        Some(Self::new(source, relative_path))
    }

    /// Whether both components are set
    pub fn is_complete(&self) -> bool {
        !self.source.is_empty() && !self.relative_path.is_empty()
    }

    /// Local path of this file below `destination_root`
    pub fn local_path(&self, destination_root: &Path) -> PathBuf {
        let mut path = destination_root.join(&self.source);
        for part in self.relative_path.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    /// Directory an archive with this identity is unpacked into
    ///
    /// The directory is a deterministic sibling of the archive: `<archive>.x`.
    pub fn extract_dir(&self, destination_root: &Path) -> PathBuf {
        let mut path = self.local_path(destination_root).into_os_string();
        path.push(".x");
        PathBuf::from(path)
    }

    /// Identity of a file produced by extracting this archive
    ///
    /// `member_path` is relative to the extraction directory.
    pub fn member(&self, member_path: &str) -> Self {
        Self::new(
            self.source.clone(),
            format!("{}.x/{}", self.relative_path, normalize_relative(member_path)),
        )
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.relative_path)
    }
}

fn normalize_relative(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Persisted per-file error flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorFlag {
    /// Work was dispatched but never confirmed finished
    Cancelled,
    /// Transport or post-download probe failed
    DownloadFailed,
    /// Unpacking or classifying archive members failed
    ExtractFailed,
    /// Removing a local archive after extraction failed
    ArchiveDeletionFailed,
}

/// What kind of file a metadata record describes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    /// Not (yet) known to be an archive
    #[default]
    Unknown,
    /// An archive that was (or is being) unpacked
    Archive,
}

/// Outcome of a single file within a task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultStatus {
    /// Nothing further to do for this file
    Done,
    /// The file is an archive and must be unpacked
    ExtractNeeded,
    /// Transport or archive probe failed
    DownloadFailed,
    /// Unpacking or member classification failed
    ExtractFailed,
    /// Local archive removal failed
    DeleteFailed,
}

impl ResultStatus {
    /// Whether this status represents a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResultStatus::DownloadFailed | ResultStatus::ExtractFailed | ResultStatus::DeleteFailed
        )
    }

    /// Error flag recorded for a failure status
    pub fn error_flag(&self) -> Option<ErrorFlag> {
        match self {
            ResultStatus::DownloadFailed => Some(ErrorFlag::DownloadFailed),
            ResultStatus::ExtractFailed => Some(ErrorFlag::ExtractFailed),
            ResultStatus::DeleteFailed => Some(ErrorFlag::ArchiveDeletionFailed),
            ResultStatus::Done | ResultStatus::ExtractNeeded => None,
        }
    }
}

/// Result value returned by a worker task for one file
#[derive(Debug)]
pub struct ProcessResult {
    /// Outcome
    pub status: ResultStatus,
    /// File the result is about
    pub identity: Identity,
    /// Top-level remote file the work originated from
    pub root: Identity,
    /// Archive this file was extracted from, if it is an archive member
    pub parent: Option<Identity>,
    /// Cause of a failure status
    pub error: Option<Error>,
}

impl ProcessResult {
    /// A result with no error attached
    pub fn new(status: ResultStatus, identity: Identity, root: Identity) -> Self {
        Self {
            status,
            identity,
            root,
            parent: None,
            error: None,
        }
    }

    /// A result for a member produced by extracting `parent`
    pub fn member(status: ResultStatus, identity: Identity, root: Identity, parent: Identity) -> Self {
        Self {
            status,
            identity,
            root,
            parent: Some(parent),
            error: None,
        }
    }

    /// Turn this result into a failure carrying `error`
    pub fn fail(mut self, status: ResultStatus, error: Error) -> Self {
        self.status = status;
        self.error = Some(error);
        self
    }
}

/// Class of worker pool a task runs in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Per-remote download pool
    Download,
    /// Shared extraction pool
    Extract,
    /// Shared deletion pool
    Delete,
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PoolKind::Download => "download",
            PoolKind::Extract => "extract",
            PoolKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Handle for a submitted task ("future")
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One entry of a remote listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the source root
    pub relative_path: String,
    /// Size reported by the remote, if known
    pub size: Option<u64>,
    /// Content fingerprint reported by the remote
    pub hash: String,
}

/// Summary of one synchronization run
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    /// Root units dispatched for processing
    pub total: u64,
    /// Root units that finished without errors or cancellation
    pub processed: u64,
    /// Root units that failed or were cancelled
    pub failed: u64,
    /// Listed files skipped because they were already processed
    pub skipped: u64,
    /// Non-archive files materialized (downloaded or extracted)
    pub leaf_files: u64,
    /// Whether the run was stopped by a shutdown request
    pub interrupted: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}
