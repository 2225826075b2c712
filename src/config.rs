//! Configuration types for tree-sync

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run-wide settings (directories, pool sizes, timers)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Local root all sources are synchronized into (default: "./downloads")
    #[serde(default = "default_destination_dir")]
    pub destination_dir: PathBuf,

    /// Metadata document location (default: "./metadata.json")
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,

    /// Interval between background metadata flushes (default: 60 seconds)
    #[serde(default = "default_metadata_flush_interval", with = "duration_serde")]
    pub metadata_flush_interval: Duration,

    /// Maximum concurrent archive extractions (default: 2)
    #[serde(default = "default_max_concurrent_extracts")]
    pub max_concurrent_extracts: usize,

    /// Maximum concurrent archive deletions (default: 2)
    #[serde(default = "default_max_concurrent_deletes")]
    pub max_concurrent_deletes: usize,

    /// Upper bound on a single wait for task completion (default: 10 seconds)
    ///
    /// A shutdown request is observed within one wait interval even while
    /// long transfers are in flight.
    #[serde(default = "default_completion_wait", with = "duration_serde")]
    pub completion_wait: Duration,

    /// Interval between progress log lines (default: 60 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Remove the local copy of an archive once it has been unpacked (default: false)
    #[serde(default)]
    pub delete_archives_after_extract: bool,

    /// Write the metadata document without whitespace (default: true)
    #[serde(default = "default_true")]
    pub minimise_json: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            destination_dir: default_destination_dir(),
            metadata_path: default_metadata_path(),
            metadata_flush_interval: default_metadata_flush_interval(),
            max_concurrent_extracts: default_max_concurrent_extracts(),
            max_concurrent_deletes: default_max_concurrent_deletes(),
            completion_wait: default_completion_wait(),
            progress_interval: default_progress_interval(),
            delete_archives_after_extract: false,
            minimise_json: true,
        }
    }
}

/// A named remote file tree to synchronize
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Name of the remote (rclone remote section) the source lives on
    pub remote_name: String,

    /// Path of the source root on the remote
    #[serde(default)]
    pub remote_path: String,
}

/// Per-remote limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Maximum concurrent downloads against this remote
    pub max_concurrent_downloads: usize,
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to rclone executable (auto-detected if None)
    #[serde(default)]
    pub rclone_path: Option<PathBuf>,

    /// Path to the rclone configuration file (default: "./rclone.conf")
    #[serde(default = "default_rclone_config_path")]
    pub rclone_config_path: PathBuf,

    /// Path to 7z executable (auto-detected if None)
    #[serde(default)]
    pub sevenzip_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            rclone_path: None,
            rclone_config_path: default_rclone_config_path(),
            sevenzip_path: None,
            search_path: true,
        }
    }
}

/// Main configuration for a synchronization run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Run-wide settings
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Sources to synchronize, keyed by source name
    pub sources: BTreeMap<String, SourceConfig>,

    /// Per-remote limits, keyed by remote name
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,

    /// External tool locations
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load a configuration document from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("could not read {}: {}", path.display(), e),
            key: None,
        })?;
        serde_json::from_str(&contents).map_err(|e| Error::Config {
            message: format!("could not parse {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Resolve relative paths against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        fn resolve(path: &mut PathBuf, base: &Path) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }

        resolve(&mut self.settings.destination_dir, base);
        resolve(&mut self.settings.metadata_path, base);
        resolve(&mut self.tools.rclone_config_path, base);
        if let Some(path) = self.tools.rclone_path.as_mut() {
            resolve(path, base);
        }
        if let Some(path) = self.tools.sevenzip_path.as_mut() {
            resolve(path, base);
        }
    }

    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config {
                message: "at least one source must be configured".to_string(),
                key: Some("sources".to_string()),
            });
        }

        for (source_name, source) in &self.sources {
            if source_name.is_empty() || source_name.contains('/') {
                return Err(Error::Config {
                    message: format!("invalid source name: {:?}", source_name),
                    key: Some("sources".to_string()),
                });
            }
            if !self.remotes.contains_key(&source.remote_name) {
                return Err(Error::Config {
                    message: format!(
                        "max_concurrent_downloads not configured for remote_name: {}",
                        source.remote_name
                    ),
                    key: Some(format!("remotes.{}", source.remote_name)),
                });
            }
        }

        for (remote_name, remote) in &self.remotes {
            if remote.max_concurrent_downloads == 0 {
                return Err(Error::Config {
                    message: "max_concurrent_downloads must be at least 1".to_string(),
                    key: Some(format!("remotes.{}.max_concurrent_downloads", remote_name)),
                });
            }
        }

        let settings = &self.settings;
        if settings.max_concurrent_extracts == 0 {
            return Err(Error::Config {
                message: "max_concurrent_extracts must be at least 1".to_string(),
                key: Some("settings.max_concurrent_extracts".to_string()),
            });
        }
        if settings.max_concurrent_deletes == 0 {
            return Err(Error::Config {
                message: "max_concurrent_deletes must be at least 1".to_string(),
                key: Some("settings.max_concurrent_deletes".to_string()),
            });
        }
        if settings.metadata_flush_interval.is_zero() {
            return Err(Error::Config {
                message: "metadata_flush_interval must be greater than zero".to_string(),
                key: Some("settings.metadata_flush_interval".to_string()),
            });
        }
        if settings.completion_wait.is_zero() {
            return Err(Error::Config {
                message: "completion_wait must be greater than zero".to_string(),
                key: Some("settings.completion_wait".to_string()),
            });
        }
        if settings.progress_interval.is_zero() {
            return Err(Error::Config {
                message: "progress_interval must be greater than zero".to_string(),
                key: Some("settings.progress_interval".to_string()),
            });
        }

        Ok(())
    }

    /// Download pool size for every remote that backs at least one source
    pub fn download_workers_per_remote(&self) -> BTreeMap<String, usize> {
        self.sources
            .values()
            .filter_map(|source| {
                self.remotes
                    .get(&source.remote_name)
                    .map(|remote| (source.remote_name.clone(), remote.max_concurrent_downloads))
            })
            .collect()
    }

    /// Mapping of source name to remote name
    pub fn source_remote_map(&self) -> BTreeMap<String, String> {
        self.sources
            .iter()
            .map(|(name, source)| (name.clone(), source.remote_name.clone()))
            .collect()
    }
}

// Default value functions
fn default_destination_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("metadata.json")
}

fn default_rclone_config_path() -> PathBuf {
    PathBuf::from("rclone.conf")
}

fn default_metadata_flush_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_concurrent_extracts() -> usize {
    2
}

fn default_max_concurrent_deletes() -> usize {
    2
}

fn default_completion_wait() -> Duration {
    Duration::from_secs(10)
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
