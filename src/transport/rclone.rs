//! rclone-backed transport using the external `rclone` binary

use super::RemoteTransport;
use crate::config::{Config, SourceConfig};
use crate::error::{Error, Result, TransferError, format_process_output};
use crate::types::{Identity, RemoteFile};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Transport that shells out to `rclone`
///
/// Every source maps to `<remote_name>:<remote_path>` on a remote defined in
/// the rclone configuration file.
#[derive(Debug, Clone)]
pub struct RcloneTransport {
    binary_path: PathBuf,
    config_path: PathBuf,
    sources: BTreeMap<String, SourceConfig>,
}

impl RcloneTransport {
    /// Create a transport for `sources`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the rclone configuration file cannot be
    /// read or does not define a remote referenced by a source.
    pub fn new(
        binary_path: PathBuf,
        config_path: PathBuf,
        sources: BTreeMap<String, SourceConfig>,
    ) -> Result<Self> {
        let contents = std::fs::read_to_string(&config_path).map_err(|e| Error::Config {
            message: format!(
                "could not read rclone config {}: {}",
                config_path.display(),
                e
            ),
            key: Some("tools.rclone_config_path".to_string()),
        })?;
        let remotes = config_sections(&contents);

        for (source_name, source) in &sources {
            if !remotes.contains(source.remote_name.as_str()) {
                return Err(Error::Config {
                    message: format!(
                        "configured remote name {:?} for source {:?} not found in rclone config file",
                        source.remote_name, source_name
                    ),
                    key: Some(format!("sources.{}.remote_name", source_name)),
                });
            }
        }

        Ok(Self {
            binary_path,
            config_path,
            sources,
        })
    }

    /// Build a transport from the run configuration
    ///
    /// Uses `tools.rclone_path` when set, otherwise searches PATH (if allowed).
    pub fn from_config(config: &Config) -> Result<Self> {
        let binary_path = match &config.tools.rclone_path {
            Some(path) => path.clone(),
            None if config.tools.search_path => which::which("rclone").map_err(|_| {
                Error::ExternalTool("rclone binary not found in PATH".to_string())
            })?,
            None => {
                return Err(Error::Config {
                    message: "rclone_path not set and PATH search disabled".to_string(),
                    key: Some("tools.rclone_path".to_string()),
                });
            }
        };
        Self::new(
            binary_path,
            config.tools.rclone_config_path.clone(),
            config.sources.clone(),
        )
    }

    fn source(&self, source: &str) -> Result<&SourceConfig> {
        self.sources.get(source).ok_or_else(|| Error::Config {
            message: format!("unknown source {:?}", source),
            key: Some("sources".to_string()),
        })
    }

    async fn run(&self, args: Vec<String>) -> Result<std::process::Output> {
        let output = Command::new(&self.binary_path)
            .arg("--config")
            .arg(&self.config_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute rclone: {}", e)))?;

        let command = format!(
            "{} --config {} {}",
            self.binary_path.display(),
            self.config_path.display(),
            args.join(" ")
        );
        classify_exit_code(
            &command,
            output.status.code().unwrap_or(-1),
            &output.stdout,
            &output.stderr,
        )?;
        Ok(output)
    }
}

#[async_trait]
impl RemoteTransport for RcloneTransport {
    async fn list_files(&self, source: &str) -> Result<Vec<RemoteFile>> {
        let source = self.source(source)?;
        let args = vec![
            "lsf".to_string(),
            format!("{}:{}", source.remote_name, source.remote_path),
            "--drive-list-chunk".to_string(),
            "0".to_string(),
            // Full recursive listing (ListR) can return incomplete results
            "--disable".to_string(),
            "ListR".to_string(),
            "--format".to_string(),
            "psh".to_string(),
            "--separator".to_string(),
            "|".to_string(),
            "--recursive".to_string(),
            "--files-only".to_string(),
        ];

        let output = self.run(args).await?;
        parse_listing(&String::from_utf8_lossy(&output.stdout))
    }

    async fn download(&self, identity: &Identity, destination: &Path) -> Result<()> {
        let source = self.source(&identity.source)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let remote_path = if source.remote_path.is_empty() {
            identity.relative_path.clone()
        } else {
            format!(
                "{}/{}",
                source.remote_path.trim_end_matches('/'),
                identity.relative_path
            )
        };
        let args = vec![
            "copyto".to_string(),
            format!("{}:{}", source.remote_name, remote_path),
            destination.display().to_string(),
        ];

        self.run(args).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rclone"
    }
}

/// Map an rclone exit code to a transfer result
///
/// 0 and 9 (nothing transferred) are success, 5 is temporary, 1-4 and 6-8
/// are fatal, anything else is a generic failure.
pub fn classify_exit_code(command: &str, code: i32, stdout: &[u8], stderr: &[u8]) -> Result<()> {
    let output = || format_process_output(stdout, stderr);
    match code {
        0 | 9 => Ok(()),
        5 => Err(TransferError::Temporary {
            command: command.to_string(),
            code,
            output: output(),
        }
        .into()),
        1..=4 | 6..=8 => Err(TransferError::Fatal {
            command: command.to_string(),
            code,
            output: output(),
        }
        .into()),
        _ => Err(TransferError::Failed {
            path: command.to_string(),
            reason: format!("rclone exited with code {}\n{}", code, output()),
        }
        .into()),
    }
}

/// Parse `lsf --format psh --separator |` output into listing entries
///
/// Each line is `path|size|hash`. The hash and size are split off from the
/// right so paths containing `|` survive. A size of `-1` means unknown.
pub fn parse_listing(stdout: &str) -> Result<Vec<RemoteFile>> {
    let mut files = Vec::new();
    for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
        let mut parts = line.rsplitn(3, '|');
        let (Some(hash), Some(size), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TransferError::Failed {
                path: line.to_string(),
                reason: "malformed rclone listing line".to_string(),
            }
            .into());
        };

        files.push(RemoteFile {
            relative_path: path.to_string(),
            size: size.trim().parse::<u64>().ok(),
            hash: hash.trim().to_string(),
        });
    }
    Ok(files)
}

fn config_sections(contents: &str) -> BTreeSet<&str> {
    contents
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('[')?.strip_suffix(']'))
        .map(str::trim)
        .collect()
}
