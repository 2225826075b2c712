//! Worker task bodies.
//!
//! Each body runs inside a pool permit and reports its outcome only through
//! the returned [`ProcessResult`]s; none of them touch driver state.

use crate::error::{Error, ExtractError, Result};
use crate::extraction::ArchiveTool;
use crate::processes::TaskBody;
use crate::transport::RemoteTransport;
use crate::types::{Identity, ProcessResult, ResultStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Fetch a remote file and probe whether it is an archive
pub(crate) fn download_file(
    transport: Arc<dyn RemoteTransport>,
    archive_tool: Arc<dyn ArchiveTool>,
    identity: Identity,
    destination_root: PathBuf,
) -> TaskBody {
    Box::pin(async move {
        let mut result = ProcessResult::new(ResultStatus::Done, identity.clone(), identity.clone());
        let local_path = identity.local_path(&destination_root);

        debug!(
            source = %identity.source,
            path = %identity.relative_path,
            transport = transport.name(),
            "downloading file"
        );
        if let Err(e) = transport.download(&identity, &local_path).await {
            return vec![result.fail(ResultStatus::DownloadFailed, e)];
        }

        match archive_tool.is_archive(&local_path).await {
            Ok(true) => result.status = ResultStatus::ExtractNeeded,
            Ok(false) => {}
            Err(e) => return vec![result.fail(ResultStatus::DownloadFailed, e)],
        }
        vec![result]
    })
}

/// Unpack an archive and classify every file it produced
///
/// Member results come first (in path order); the archive's own result is
/// always last. The first member that cannot be probed stops the walk, and
/// only the failed archive result is returned.
pub(crate) fn extract_archive(
    archive_tool: Arc<dyn ArchiveTool>,
    identity: Identity,
    root: Identity,
    destination_root: PathBuf,
) -> TaskBody {
    Box::pin(async move {
        let archive_result = ProcessResult::new(ResultStatus::Done, identity.clone(), root.clone());
        let archive_path = identity.local_path(&destination_root);
        let extract_dir = identity.extract_dir(&destination_root);

        if let Err(e) = clear_stale_output(&extract_dir).await {
            return vec![archive_result.fail(ResultStatus::ExtractFailed, e)];
        }

        debug!(
            source = %identity.source,
            path = %identity.relative_path,
            tool = archive_tool.name(),
            "extracting archive"
        );
        if let Err(e) = archive_tool.extract(&archive_path, &extract_dir).await {
            return vec![archive_result.fail(ResultStatus::ExtractFailed, e)];
        }

        let members = match list_extracted_files(archive_path.clone(), extract_dir).await {
            Ok(members) => members,
            Err(e) => return vec![archive_result.fail(ResultStatus::ExtractFailed, e)],
        };

        let mut results = Vec::with_capacity(members.len() + 1);
        for (member_path, local_path) in members {
            let member = identity.member(&member_path);
            match archive_tool.is_archive(&local_path).await {
                Ok(is_archive) => {
                    let status = if is_archive {
                        ResultStatus::ExtractNeeded
                    } else {
                        ResultStatus::Done
                    };
                    results.push(ProcessResult::member(
                        status,
                        member,
                        root.clone(),
                        identity.clone(),
                    ));
                }
                Err(e) => {
                    warn!(key = %member, error = %e, "could not classify extracted file");
                    return vec![archive_result.fail(ResultStatus::ExtractFailed, e)];
                }
            }
        }
        results.push(archive_result);
        results
    })
}

/// Remove the local copy of an unpacked archive
pub(crate) fn delete_archive(
    identity: Identity,
    root: Identity,
    destination_root: PathBuf,
) -> TaskBody {
    Box::pin(async move {
        let result = ProcessResult::new(ResultStatus::Done, identity.clone(), root);
        let path = identity.local_path(&destination_root);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "deleted extracted archive");
                vec![result]
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![result],
            Err(e) => vec![result.fail(ResultStatus::DeleteFailed, Error::Io(e))],
        }
    })
}

/// Output of an earlier attempt would otherwise be reported as members again
async fn clear_stale_output(extract_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(extract_dir).await {
        Ok(()) => {
            debug!(path = %extract_dir.display(), "removed stale extraction directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Files below `extract_dir`, sorted, as `/`-separated relative names paired
/// with the walked path
///
/// A name that is not valid UTF-8 fails the whole listing; a lossy name
/// would no longer point at the file on disk.
async fn list_extracted_files(
    archive_path: PathBuf,
    extract_dir: PathBuf,
) -> Result<Vec<(String, PathBuf)>> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&extract_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&extract_dir)
                .map_err(|e| Error::Other(format!("walked outside extraction directory: {}", e)))?;
            let parts = relative
                .components()
                .map(|c| c.as_os_str().to_str())
                .collect::<Option<Vec<&str>>>()
                .ok_or_else(|| ExtractError::Failed {
                    archive: archive_path.clone(),
                    reason: format!(
                        "extracted file name is not valid UTF-8: {}",
                        relative.display()
                    ),
                })?;
            files.push((parts.join("/"), entry.into_path()));
        }
        Ok(files)
    })
    .await
    .map_err(|e| Error::Other(format!("directory walk failed: {}", e)))?
}
