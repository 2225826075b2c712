//! Metadata store
//!
//! Durable per-file records driving the skip/retry decision of every run.
//!
//! ## Submodules
//!
//! - [`record`] - record schema, typed field values, document shape
//! - [`flush`] - periodic background flushing
//!
//! Record mutation happens under one short-held mutex. [`MetadataStore::flush`]
//! additionally holds a flush lock for the whole serialize-and-rename so that
//! two flushes never interleave their writes.

mod flush;
pub mod record;


pub use flush::spawn_flush_loop;
pub use record::{METADATA_VERSION, MetadataDocument, MetadataField, MetadataRecord, MetadataValue};

use crate::error::{Error, MetadataError, Result};
use crate::types::{ErrorFlag, FileKind, Identity};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Durable store of [`MetadataRecord`]s keyed by identity path
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    minimise_json: bool,
    document: Mutex<MetadataDocument>,
    flush_lock: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
}

impl MetadataStore {
    /// Open the document at `path`, creating (and immediately writing) an
    /// empty one if it does not exist
    pub async fn open(path: &Path, minimise_json: bool) -> Result<Self> {
        let document = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let document: MetadataDocument = serde_json::from_slice(&bytes)?;
                if !document.is_supported_version() {
                    return Err(MetadataError::UnsupportedVersion {
                        version: document.version,
                        path: path.to_path_buf(),
                    }
                    .into());
                }
                info!(
                    path = %path.display(),
                    records = document.entries.len(),
                    "loaded metadata document"
                );
                Some(document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(Error::Io(e)),
        };

        let created = document.is_none();
        let store = Self {
            path: path.to_path_buf(),
            minimise_json,
            document: Mutex::new(document.unwrap_or_default()),
            flush_lock: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
        };

        if created {
            debug!(path = %path.display(), "creating empty metadata document");
            store.flush().await?;
        }

        Ok(store)
    }

    /// Location of the persisted document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, MetadataDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether records changed since the last successful flush
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the store has no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a record exists for `identity`
    pub fn exists(&self, identity: &Identity) -> bool {
        self.lock().entries.contains_key(&identity.key())
    }

    /// Copy of the record for `identity`
    pub fn record(&self, identity: &Identity) -> Result<MetadataRecord> {
        let key = identity.key();
        self.lock()
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound { key }.into())
    }

    /// Read one field of the record for `identity`
    pub fn get(&self, identity: &Identity, field: MetadataField) -> Result<MetadataValue> {
        Ok(self.record(identity)?.get(field))
    }

    /// Read one field by its schema name
    ///
    /// # Errors
    ///
    /// [`MetadataError::UnknownField`] if `field` is not part of the schema.
    pub fn get_by_name(&self, identity: &Identity, field: &str) -> Result<MetadataValue> {
        let field: MetadataField = field.parse()?;
        self.get(identity, field)
    }

    /// Write a value into its field, creating the record with defaults if needed
    pub fn set(&self, identity: &Identity, value: MetadataValue) {
        let mut document = self.lock();
        document
            .entries
            .entry(identity.key())
            .or_default()
            .apply(value);
        drop(document);
        self.mark_dirty();
    }

    /// Write `value` into the field named `field`
    ///
    /// # Errors
    ///
    /// - [`MetadataError::UnknownField`] if `field` is not part of the schema
    /// - [`MetadataError::FieldTypeMismatch`] if `value` belongs to another field
    pub fn set_by_name(&self, identity: &Identity, field: &str, value: MetadataValue) -> Result<()> {
        let field: MetadataField = field.parse()?;
        let mut document = self.lock();
        document
            .entries
            .entry(identity.key())
            .or_default()
            .set(field, value)?;
        drop(document);
        self.mark_dirty();
        Ok(())
    }

    /// Create (or reset) the record for `identity` with default values
    pub fn initialize(&self, identity: &Identity) {
        self.lock()
            .entries
            .insert(identity.key(), MetadataRecord::default());
        self.mark_dirty();
    }

    /// Remove the record for `identity`, returning whether one existed
    pub fn delete(&self, identity: &Identity) -> bool {
        let removed = self.lock().entries.remove(&identity.key()).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    /// Whether the record for `identity` carries any error flag
    pub fn has_errors(&self, identity: &Identity) -> Result<bool> {
        Ok(self.record(identity)?.has_errors())
    }

    /// Set or clear one error flag, creating the record if needed
    pub fn set_error_flag(&self, identity: &Identity, flag: ErrorFlag, status: bool) {
        let mut document = self.lock();
        let record = document.entries.entry(identity.key()).or_default();
        if status {
            record.error_flags.insert(flag);
        } else {
            record.error_flags.remove(&flag);
        }
        drop(document);
        self.mark_dirty();
    }

    /// Set the file kind
    pub fn set_file_kind(&self, identity: &Identity, kind: FileKind) {
        self.set(identity, MetadataValue::FileKind(kind));
    }

    /// Set the remote hash
    pub fn set_remote_hash(&self, identity: &Identity, hash: impl Into<String>) {
        self.set(identity, MetadataValue::RemoteHash(hash.into()));
    }

    /// Link `identity` to the archive it was extracted from
    pub fn set_parent(&self, identity: &Identity, parent: Option<&Identity>) {
        self.set(identity, MetadataValue::ParentKey(parent.map(Identity::key)));
    }

    /// Archive `identity` was extracted from, if it is an archive member
    pub fn parent_of(&self, identity: &Identity) -> Result<Option<Identity>> {
        match self.record(identity)?.parent_key {
            Some(key) => Identity::from_key(&key)
                .map(Some)
                .ok_or_else(|| MetadataError::InvalidKey { key }.into()),
            None => Ok(None),
        }
    }

    /// Direct members of the archive `identity`
    pub fn archive_members(&self, identity: &Identity) -> Vec<Identity> {
        let key = identity.key();
        self.lock()
            .entries
            .iter()
            .filter(|(_, record)| record.parent_key.as_deref() == Some(key.as_str()))
            .filter_map(|(member_key, _)| Identity::from_key(member_key))
            .collect()
    }

    /// Delete the records of every member of `identity`, transitively
    ///
    /// The archive's own record is kept. Returns the number of deleted records.
    pub fn delete_archive_members(&self, identity: &Identity) -> usize {
        let mut document = self.lock();
        let mut pending = vec![identity.key()];
        let mut deleted = 0;

        while let Some(parent) = pending.pop() {
            let members: Vec<String> = document
                .entries
                .iter()
                .filter(|(_, record)| record.parent_key.as_deref() == Some(parent.as_str()))
                .map(|(key, _)| key.clone())
                .collect();
            for member in members {
                document.entries.remove(&member);
                deleted += 1;
                pending.push(member);
            }
        }
        drop(document);

        if deleted > 0 {
            self.mark_dirty();
        }
        deleted
    }

    /// Whether a listed file was already processed successfully
    ///
    /// True when a record exists, carries no error flag, and its remote hash
    /// equals the freshly listed one.
    pub fn is_up_to_date(&self, identity: &Identity, remote_hash: &str) -> bool {
        self.lock()
            .entries
            .get(&identity.key())
            .is_some_and(|record| !record.has_errors() && record.remote_hash == remote_hash)
    }

    /// Reset the record of a file about to be dispatched
    ///
    /// Drops the member subtree of any previous extraction, re-initializes the
    /// record, stores `remote_hash`, and pre-sets [`ErrorFlag::Cancelled`]; only
    /// a confirmed success clears the flag again.
    pub fn prepare_for_dispatch(&self, identity: &Identity, remote_hash: &str) {
        let stale_members = self.delete_archive_members(identity);
        if stale_members > 0 {
            debug!(
                key = %identity,
                stale_members,
                "dropped member records of previous extraction"
            );
        }

        let record = MetadataRecord {
            error_flags: [ErrorFlag::Cancelled].into_iter().collect(),
            remote_hash: remote_hash.to_string(),
            ..MetadataRecord::default()
        };
        self.lock().entries.insert(identity.key(), record);
        self.mark_dirty();
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> MetadataDocument {
        self.lock().clone()
    }

    /// Serialize the whole store and atomically replace the document on disk
    pub async fn flush(&self) -> Result<()> {
        let _flush_guard = self.flush_lock.lock().await;

        let document = {
            let document = self.lock();
            self.dirty.store(false, Ordering::Release);
            document.clone()
        };

        let bytes = if self.minimise_json {
            serde_json::to_vec(&document)
        } else {
            serde_json::to_vec_pretty(&document)
        };
        let bytes = match bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                self.mark_dirty();
                return Err(e.into());
            }
        };

        if let Err(e) = write_atomically(&self.path, &bytes).await {
            warn!(path = %self.path.display(), error = %e, "failed to write metadata document");
            self.mark_dirty();
            return Err(e);
        }

        debug!(
            path = %self.path.display(),
            records = document.entries.len(),
            "flushed metadata"
        );
        Ok(())
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    tokio::fs::write(&temp_path, bytes).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
