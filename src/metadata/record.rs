//! Metadata record schema
//!
//! A record has a fixed set of fields. Each field has one typed value
//! variant, so a value can only ever be written to the field it belongs to;
//! string field names (from external callers) are validated against the
//! schema before use.

use crate::error::{MetadataError, Result};
use crate::types::{ErrorFlag, FileKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current metadata document version
pub const METADATA_VERSION: &str = "1.0";

/// Durable per-file record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// Failures recorded for the file
    #[serde(default)]
    pub error_flags: BTreeSet<ErrorFlag>,
    /// Whether the file is known to be an archive
    #[serde(default)]
    pub file_kind: FileKind,
    /// Metadata key of the archive this file was extracted from
    #[serde(default)]
    pub parent_key: Option<String>,
    /// Content fingerprint from the remote listing
    #[serde(default)]
    pub remote_hash: String,
}

impl MetadataRecord {
    /// Whether any error flag is set
    pub fn has_errors(&self) -> bool {
        !self.error_flags.is_empty()
    }

    /// Read a field
    pub fn get(&self, field: MetadataField) -> MetadataValue {
        match field {
            MetadataField::ErrorFlags => MetadataValue::ErrorFlags(self.error_flags.clone()),
            MetadataField::FileKind => MetadataValue::FileKind(self.file_kind),
            MetadataField::ParentKey => MetadataValue::ParentKey(self.parent_key.clone()),
            MetadataField::RemoteHash => MetadataValue::RemoteHash(self.remote_hash.clone()),
        }
    }

    /// Write a value into the field it belongs to
    pub fn apply(&mut self, value: MetadataValue) {
        match value {
            MetadataValue::ErrorFlags(flags) => self.error_flags = flags,
            MetadataValue::FileKind(kind) => self.file_kind = kind,
            MetadataValue::ParentKey(key) => self.parent_key = key,
            MetadataValue::RemoteHash(hash) => self.remote_hash = hash,
        }
    }

    /// Write `value` into `field`, rejecting values of another field's type
    pub fn set(&mut self, field: MetadataField, value: MetadataValue) -> Result<()> {
        if value.field() != field {
            return Err(MetadataError::FieldTypeMismatch {
                field: field.name().to_string(),
                expected: field.expected().to_string(),
            }
            .into());
        }
        self.apply(value);
        Ok(())
    }
}

/// Field names of [`MetadataRecord`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetadataField {
    /// `errorFlags`
    ErrorFlags,
    /// `fileKind`
    FileKind,
    /// `parentKey`
    ParentKey,
    /// `remoteHash`
    RemoteHash,
}

impl MetadataField {
    /// Every field of the schema
    pub const ALL: [MetadataField; 4] = [
        MetadataField::ErrorFlags,
        MetadataField::FileKind,
        MetadataField::ParentKey,
        MetadataField::RemoteHash,
    ];

    /// Name used in the persisted document
    pub fn name(&self) -> &'static str {
        match self {
            MetadataField::ErrorFlags => "errorFlags",
            MetadataField::FileKind => "fileKind",
            MetadataField::ParentKey => "parentKey",
            MetadataField::RemoteHash => "remoteHash",
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            MetadataField::ErrorFlags => "a set of error flags",
            MetadataField::FileKind => "a file kind",
            MetadataField::ParentKey => "an optional metadata key",
            MetadataField::RemoteHash => "a hash string",
        }
    }
}

impl std::fmt::Display for MetadataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MetadataField {
    type Err = crate::error::Error;

    /// Accepts both the persisted camelCase names and snake_case names
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "errorFlags" | "error_flags" => Ok(MetadataField::ErrorFlags),
            "fileKind" | "file_kind" => Ok(MetadataField::FileKind),
            "parentKey" | "parent_key" => Ok(MetadataField::ParentKey),
            "remoteHash" | "remote_hash" => Ok(MetadataField::RemoteHash),
            _ => Err(MetadataError::UnknownField {
                name: s.to_string(),
            }
            .into()),
        }
    }
}

/// A typed value for one field
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    /// Value of `errorFlags`
    ErrorFlags(BTreeSet<ErrorFlag>),
    /// Value of `fileKind`
    FileKind(FileKind),
    /// Value of `parentKey`
    ParentKey(Option<String>),
    /// Value of `remoteHash`
    RemoteHash(String),
}

impl MetadataValue {
    /// The field this value belongs to
    pub fn field(&self) -> MetadataField {
        match self {
            MetadataValue::ErrorFlags(_) => MetadataField::ErrorFlags,
            MetadataValue::FileKind(_) => MetadataField::FileKind,
            MetadataValue::ParentKey(_) => MetadataField::ParentKey,
            MetadataValue::RemoteHash(_) => MetadataField::RemoteHash,
        }
    }
}

/// The persisted document: version plus every record keyed by identity path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Document format version
    pub version: String,
    /// Records keyed by `source/relative_path`
    #[serde(default)]
    pub entries: BTreeMap<String, MetadataRecord>,
}

impl Default for MetadataDocument {
    fn default() -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            entries: BTreeMap::new(),
        }
    }
}

impl MetadataDocument {
    /// Whether this build can read the document's version
    pub fn is_supported_version(&self) -> bool {
        let major = |v: &str| v.split('.').next().map(str::to_string);
        major(&self.version) == major(METADATA_VERSION)
    }
}
