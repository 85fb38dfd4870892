//! Post-run artifact handoff.
//!
//! After the server agent exported its statistics, local capture artifacts
//! are deposited next to the export and delivered to a collection endpoint.
//! The export `url`'s last path segment names the result directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Artifact errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem error while depositing artifacts.
    #[error("artifact io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The export url has no usable path segment.
    #[error("cannot derive a result location from {0:?}")]
    BadUrl(String),

    /// The delivery command exited unsuccessfully.
    #[error("delivery command failed ({status}): {stderr}")]
    CommandFailed {
        /// Exit status.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// Labels of the run the artifacts belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLabels {
    /// Experiment name
    pub exp_name: String,
    /// `dgram` or `stream`
    pub mode: String,
    /// Congestion-control algorithm
    pub cc: String,
    /// Implementation name
    pub implementation: String,
}

/// Artifact handoff collaborator.
#[async_trait]
pub trait ArtifactCollector: Send + Sync {
    /// Deposit and deliver artifacts for the export at `url`.
    /// Returns the local result directory.
    async fn collect(&self, url: &str, labels: &ArtifactLabels) -> Result<PathBuf, ArtifactError>;
}

/// Last non-empty path segment of a url, without query or fragment.
pub fn result_name(url: &str) -> Option<&str> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    // Drop the authority when a scheme was present.
    let path = if url.contains("://") {
        path.split_once('/').map_or("", |(_, p)| p)
    } else {
        path
    };
    path.rsplit('/')
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
}

/// Quote `value` for `sh`. Plain words pass through unchanged.
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.,:/@%+=".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Collector that copies a capture directory and runs a delivery command
/// through `sh -c`.
///
/// The command template may use `{exp_name}`, `{mode}`, `{cc}`, `{impl}`,
/// `{dir}`, `{archive}` and `{endpoint}`. An empty template only deposits.
#[derive(Debug, Clone)]
pub struct ShellArtifactCollector {
    results_root: PathBuf,
    capture_dir: Option<PathBuf>,
    endpoint: String,
    command: String,
}

impl ShellArtifactCollector {
    /// Create a collector.
    pub fn new(
        results_root: impl Into<PathBuf>,
        capture_dir: Option<PathBuf>,
        endpoint: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            results_root: results_root.into(),
            capture_dir,
            endpoint: endpoint.into(),
            command: command.into(),
        }
    }

    /// Result directory for an export url.
    pub fn result_dir(&self, url: &str) -> Result<PathBuf, ArtifactError> {
        result_name(url)
            .map(|name| self.results_root.join(name))
            .ok_or_else(|| ArtifactError::BadUrl(url.to_string()))
    }

    /// Expand the command template. Run labels and paths are shell-quoted;
    /// the endpoint is operator configuration and is inserted as written.
    pub fn render_command(&self, dir: &Path, labels: &ArtifactLabels) -> String {
        let archive = dir.with_extension("tar.gz");
        self.command
            .replace("{exp_name}", &shell_quote(&labels.exp_name))
            .replace("{mode}", &shell_quote(&labels.mode))
            .replace("{cc}", &shell_quote(&labels.cc))
            .replace("{impl}", &shell_quote(&labels.implementation))
            .replace("{dir}", &shell_quote(&dir.display().to_string()))
            .replace("{archive}", &shell_quote(&archive.display().to_string()))
            .replace("{endpoint}", &self.endpoint)
    }

    async fn deposit(&self, dir: &Path) -> Result<usize, ArtifactError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| ArtifactError::Io { path, source }
        };

        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;

        let Some(capture) = &self.capture_dir else {
            return Ok(0);
        };

        let mut copied = 0;
        let mut entries = tokio::fs::read_dir(capture).await.map_err(io_err(capture))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err(capture))? {
            let source = entry.path();
            let file_type = entry.file_type().await.map_err(io_err(&source))?;
            if !file_type.is_file() {
                continue;
            }
            let target = dir.join(entry.file_name());
            tokio::fs::copy(&source, &target)
                .await
                .map_err(io_err(&target))?;
            copied += 1;
        }
        Ok(copied)
    }
}

#[async_trait]
impl ArtifactCollector for ShellArtifactCollector {
    async fn collect(&self, url: &str, labels: &ArtifactLabels) -> Result<PathBuf, ArtifactError> {
        let dir = self.result_dir(url)?;
        let copied = self.deposit(&dir).await?;
        tracing::info!(dir = %dir.display(), files = copied, "artifacts deposited");

        if self.command.trim().is_empty() {
            return Ok(dir);
        }

        let command = self.render_command(&dir, labels);
        tracing::debug!(%command, "running delivery command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&self.results_root)
            .output()
            .await
            .map_err(|source| ArtifactError::Io {
                path: PathBuf::from("sh"),
                source,
            })?;

        if !output.status.success() {
            return Err(ArtifactError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(endpoint = %self.endpoint, exp = %labels.exp_name, "artifacts delivered");
        Ok(dir)
    }
}
