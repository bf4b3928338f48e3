//! Boundary to the external archiving tool that packages and deletes data.
//!
//! The pipeline never inspects what the tool does; it only needs a yes/no
//! answer. [`CommandArchiver`] runs the tool as a child process, passing
//! locations as `s3://` URLs.

use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with status {}: {stderr}", exit_label(.status))]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
}

fn exit_label(status: &Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Packaging and forced deletion, as offered by the archiving tool.
pub trait Archiver {
    /// Packages everything under `source_url` into `package_url`, writing an
    /// index of the package to `manifest_url`.
    async fn archive(
        &self,
        source_url: &str,
        manifest_url: &str,
        package_url: &str,
        strip_prefix: &str,
    ) -> Result<(), ArchiveError>;

    /// Deletes the originals listed in `manifest_url` once they are verified
    /// against `package_url`.
    async fn purge(
        &self,
        manifest_url: &str,
        package_url: &str,
        force_delete: bool,
    ) -> Result<(), ArchiveError>;
}

impl<A: Archiver> Archiver for &A {
    async fn archive(
        &self,
        source_url: &str,
        manifest_url: &str,
        package_url: &str,
        strip_prefix: &str,
    ) -> Result<(), ArchiveError> {
        (**self)
            .archive(source_url, manifest_url, package_url, strip_prefix)
            .await
    }

    async fn purge(
        &self,
        manifest_url: &str,
        package_url: &str,
        force_delete: bool,
    ) -> Result<(), ArchiveError> {
        (**self).purge(manifest_url, package_url, force_delete).await
    }
}

/// Runs `<program> [args..] archive|delete ...` and waits for it.
#[derive(Debug, Clone)]
pub struct CommandArchiver {
    program: String,
    args: Vec<String>,
}

impl CommandArchiver {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    async fn run(&self, subcommand_args: &[&str]) -> Result<(), ArchiveError> {
        info!(program = %self.program, args = ?subcommand_args, "invoking archiver");
        let output = Command::new(&self.program)
            .args(&self.args)
            .args(subcommand_args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ArchiveError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(program = %self.program, output = %stdout.trim(), "archiver output");
        }
        if !output.status.success() {
            return Err(ArchiveError::Failed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Archiver for CommandArchiver {
    async fn archive(
        &self,
        source_url: &str,
        manifest_url: &str,
        package_url: &str,
        strip_prefix: &str,
    ) -> Result<(), ArchiveError> {
        self.run(&[
            "archive",
            source_url,
            manifest_url,
            package_url,
            "--strip-prefix",
            strip_prefix,
        ])
        .await
    }

    async fn purge(
        &self,
        manifest_url: &str,
        package_url: &str,
        force_delete: bool,
    ) -> Result<(), ArchiveError> {
        let mut args = vec!["delete", manifest_url, package_url];
        if force_delete {
            args.push("--force-delete");
        }
        self.run(&args).await
    }
}
