//! Error types for tree-sync
//!
//! This module provides the error taxonomy for the library:
//! - Contract violations (identity misuse, unknown metadata fields, exhausted
//!   progress, duplicate or unknown tasks). These abort a run.
//! - Task-level failures (transfer, extraction, deletion). These are captured
//!   inside a [`ProcessResult`](crate::types::ProcessResult) and recorded
//!   against the owning root unit.
//! - Startup failures (configuration, metadata document I/O).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tree-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tree-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "sources.music.remote_name")
        key: Option<String>,
    },

    /// Identity registry misuse
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Metadata store error
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Progress bookkeeping error
    #[error("progress error: {0}")]
    Progress(#[from] ProgressError),

    /// Task tracking error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Remote transfer failed
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Archive extraction failed
    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool could not be executed
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Identity registry errors
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The identity is already being worked on
    #[error("identity {key} is already in use by the {owner} pool")]
    InUse {
        /// Metadata key of the identity
        key: String,
        /// Pool currently owning the identity
        owner: String,
    },

    /// The identity has no source component
    #[error("identity for path {relative_path:?} has no source set")]
    Incomplete {
        /// Relative path of the incomplete identity
        relative_path: String,
    },
}

/// Metadata store errors
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Field name outside the record schema
    #[error("unknown metadata field: {name}")]
    UnknownField {
        /// The rejected field name
        name: String,
    },

    /// No record exists for the identity
    #[error("no metadata found for {key}")]
    NotFound {
        /// Metadata key that was looked up
        key: String,
    },

    /// Value does not match the field it was submitted for
    #[error("invalid value for metadata field {field}: expected {expected}")]
    FieldTypeMismatch {
        /// Field the value was submitted for
        field: String,
        /// Kind of value the field accepts
        expected: String,
    },

    /// Stored key cannot be turned back into an identity
    #[error("invalid metadata key: {key}")]
    InvalidKey {
        /// The offending key
        key: String,
    },

    /// Document was written by an incompatible version
    #[error("unsupported metadata document version {version} in {path}")]
    UnsupportedVersion {
        /// Version string found in the document
        version: String,
        /// Document location
        path: PathBuf,
    },
}

/// Progress counter errors
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Every unit has already been registered
    #[error("all {total} files have been registered as either processed or failed")]
    Exhausted {
        /// Configured total
        total: u64,
    },

    /// The total may only be set once
    #[error("total files already set to {total}")]
    TotalAlreadySet {
        /// Previously configured total
        total: u64,
    },

    /// Registration attempted before the total was set
    #[error("total files not set")]
    TotalNotSet,
}

/// Task tracking errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// A task for the identity is already tracked
    #[error("a task is already tracked for {key}")]
    Duplicate {
        /// Metadata key of the identity
        key: String,
    },

    /// The task handle is not tracked
    #[error("unknown task {task}")]
    UnknownFuture {
        /// Display form of the task handle
        task: String,
    },

    /// The identity's source has no download pool
    #[error("no download pool configured for source {source_name}")]
    UnknownRemote {
        /// Source name of the identity
        source_name: String,
    },
}

/// Remote transfer errors, classified by the transport's exit status
#[derive(Debug, Error)]
pub enum TransferError {
    /// Temporary failure; a later run may succeed
    #[error("temporary transfer failure (exit code {code}): {command}\n{output}")]
    Temporary {
        /// Command line that was executed
        command: String,
        /// Exit code
        code: i32,
        /// Captured stdout and stderr
        output: String,
    },

    /// Fatal failure (bad arguments, missing file, ...)
    #[error("fatal transfer failure (exit code {code}): {command}\n{output}")]
    Fatal {
        /// Command line that was executed
        command: String,
        /// Exit code
        code: i32,
        /// Captured stdout and stderr
        output: String,
    },

    /// Any other failure
    #[error("transfer failed for {path}: {reason}")]
    Failed {
        /// Remote or local path involved
        path: String,
        /// The reason the transfer failed
        reason: String,
    },
}

/// Archive extraction errors
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive could not be unpacked
    #[error("extraction failed for {archive}: {reason}")]
    Failed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// The extraction tool exited unsuccessfully
    #[error("archive tool failed (exit code {code}): {command}\n{output}")]
    ToolFailed {
        /// Command line that was executed
        command: String,
        /// Exit code
        code: i32,
        /// Captured stdout and stderr
        output: String,
    },

    /// The file is not in a supported archive format
    #[error("unsupported archive format: {archive}")]
    UnsupportedFormat {
        /// The file that was submitted for extraction
        archive: PathBuf,
    },

    /// An entry would be written outside the destination directory
    #[error("path traversal detected in {archive}: {entry}")]
    PathTraversal {
        /// The archive containing the entry
        archive: PathBuf,
        /// The offending entry name
        entry: String,
    },
}

impl Error {
    /// Whether this error is a programming or contract violation that must
    /// abort the run rather than be recorded against a root unit
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::Identity(_)
                | Error::Metadata(MetadataError::UnknownField { .. })
                | Error::Metadata(MetadataError::FieldTypeMismatch { .. })
                | Error::Progress(_)
                | Error::Task(_)
        )
    }

    /// Machine-readable error code used in structured log fields
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Identity(e) => match e {
                IdentityError::InUse { .. } => "identity_in_use",
                IdentityError::Incomplete { .. } => "identity_incomplete",
            },
            Error::Metadata(e) => match e {
                MetadataError::UnknownField { .. } => "unknown_field",
                MetadataError::NotFound { .. } => "metadata_not_found",
                MetadataError::FieldTypeMismatch { .. } => "field_type_mismatch",
                MetadataError::InvalidKey { .. } => "invalid_metadata_key",
                MetadataError::UnsupportedVersion { .. } => "unsupported_version",
            },
            Error::Progress(e) => match e {
                ProgressError::Exhausted { .. } => "progress_exhausted",
                ProgressError::TotalAlreadySet { .. } => "total_already_set",
                ProgressError::TotalNotSet => "total_not_set",
            },
            Error::Task(e) => match e {
                TaskError::Duplicate { .. } => "duplicate_task",
                TaskError::UnknownFuture { .. } => "unknown_future",
                TaskError::UnknownRemote { .. } => "unknown_remote",
            },
            Error::Transfer(e) => match e {
                TransferError::Temporary { .. } => "transfer_temporary",
                TransferError::Fatal { .. } => "transfer_fatal",
                TransferError::Failed { .. } => "transfer_failed",
            },
            Error::Extract(e) => match e {
                ExtractError::Failed { .. } => "extraction_failed",
                ExtractError::ToolFailed { .. } => "archive_tool_failed",
                ExtractError::UnsupportedFormat { .. } => "unsupported_format",
                ExtractError::PathTraversal { .. } => "path_traversal",
            },
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

/// Join captured process output into an indented block for error messages
pub(crate) fn format_process_output(stdout: &[u8], stderr: &[u8]) -> String {
    let indent = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("    {}", line))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!("  stdout:\n{}\n  stderr:\n{}", indent(stdout), indent(stderr))
}
