//! CLI-based archive tool using the external 7z binary

use super::ArchiveTool;
use crate::config::Config;
use crate::error::{Error, ExtractError, Result, format_process_output};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Archive tool that executes the external `7z` binary
///
/// Probing runs `7z t` with an empty password so encrypted archives fail the
/// test instead of prompting; extraction runs `7z x -aoa`, overwriting files
/// left by an earlier interrupted run.
#[derive(Debug, Clone)]
pub struct SevenZipCli {
    binary_path: PathBuf,
}

impl SevenZipCli {
    /// Create a new CLI tool with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find `7z` (or `7za`) in PATH
    pub fn from_path() -> Option<Self> {
        which::which("7z")
            .or_else(|_| which::which("7za"))
            .ok()
            .map(Self::new)
    }

    /// Build the tool from the run configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.tools.sevenzip_path {
            Some(path) => Ok(Self::new(path.clone())),
            None if config.tools.search_path => Self::from_path()
                .ok_or_else(|| Error::ExternalTool("7z binary not found in PATH".to_string())),
            None => Err(Error::Config {
                message: "sevenzip_path not set and PATH search disabled".to_string(),
                key: Some("tools.sevenzip_path".to_string()),
            }),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary_path);
        command.stdin(Stdio::null());
        command
    }
}

#[async_trait]
impl ArchiveTool for SevenZipCli {
    async fn is_archive(&self, path: &Path) -> Result<bool> {
        let output = self
            .command()
            .arg("t")
            .arg("-bd")
            .arg("-p")
            .arg(path)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute 7z: {}", e)))?;

        Ok(output.status.success())
    }

    async fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        let mut output_arg = std::ffi::OsString::from("-o");
        output_arg.push(destination);

        let output = self
            .command()
            .arg("x")
            .arg("-bd")
            .arg("-aoa")
            .arg(&output_arg)
            .arg(archive)
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute 7z: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        Err(ExtractError::ToolFailed {
            command: format!(
                "{} x -bd -aoa -o{} {}",
                self.binary_path.display(),
                destination.display(),
                archive.display()
            ),
            code: output.status.code().unwrap_or(-1),
            output: format_process_output(&output.stdout, &output.stderr),
        }
        .into())
    }

    fn name(&self) -> &'static str {
        "7z-cli"
    }
}
