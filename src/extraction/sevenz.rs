use crate::error::{Error, ExtractError, Result};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Archive extractor for 7z files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Extract a 7z archive into `dest_path`
    ///
    /// Entry names are checked before anything is written; the first name
    /// that would leave `dest_path` stops the extraction with
    /// [`ExtractError::PathTraversal`].
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting 7z extraction");

        std::fs::create_dir_all(dest_path)?;

        let mut extracted_files = Vec::new();
        let mut rejected = None;
        sevenz_rust::decompress_file_with_extract_fn(
            archive_path,
            dest_path,
            |entry, reader, _joined| {
                let relative = match Self::entry_path(entry.name()) {
                    // The archive root itself is stored as an unnamed directory
                    Some(relative) if relative.as_os_str().is_empty() && entry.is_directory() => {
                        return Ok(true);
                    }
                    Some(relative) if !relative.as_os_str().is_empty() => relative,
                    _ => {
                        rejected = Some(entry.name().to_string());
                        return Ok(false);
                    }
                };
                let target = dest_path.join(relative);
                if !entry.is_directory() {
                    extracted_files.push(target.clone());
                }
                sevenz_rust::default_entry_extract_fn(entry, reader, &target)
            },
        )
        .map_err(|e| {
            Error::Extract(ExtractError::Failed {
                archive: archive_path.to_path_buf(),
                reason: format!("failed to extract 7z archive: {}", e),
            })
        })?;

        if let Some(entry) = rejected {
            return Err(ExtractError::PathTraversal {
                archive: archive_path.to_path_buf(),
                entry,
            }
            .into());
        }

        extracted_files.sort();
        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "7z extraction successful"
        );
        Ok(extracted_files)
    }

    /// Relative path an entry named `name` is written to
    ///
    /// `None` for names with parent, root or prefix components. A name with
    /// no plain component maps to an empty path.
    pub(crate) fn entry_path(name: &str) -> Option<PathBuf> {
        let mut path = PathBuf::new();
        for component in Path::new(name).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(path)
    }
}
