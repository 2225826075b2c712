//! Remote file transport
//!
//! Listing and fetching of remote files. The pipeline only depends on the
//! [`RemoteTransport`] trait; two implementations ship with the crate:
//!
//! - [`RcloneTransport`] drives the `rclone` binary (`lsf` / `copyto`)
//! - [`LocalDirectoryTransport`] serves sources from local directories

mod local;
mod rclone;

pub use local::LocalDirectoryTransport;
pub use rclone::{RcloneTransport, classify_exit_code, parse_listing};

use crate::error::Result;
use crate::types::{Identity, RemoteFile};
use async_trait::async_trait;
use std::path::Path;

/// Moves files from a remote source to local storage
///
/// Implementations must be safe to share between worker tasks; one instance
/// serves every download pool.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// List every file below the root of `source`
    ///
    /// Paths are relative to the source root and `/`-separated.
    async fn list_files(&self, source: &str) -> Result<Vec<RemoteFile>>;

    /// Fetch the remote file named by `identity` to `destination`
    ///
    /// Parent directories of `destination` are created as needed and an
    /// existing file is overwritten.
    async fn download(&self, identity: &Identity, destination: &Path) -> Result<()>;

    /// Short name used in log output
    fn name(&self) -> &'static str;
}
