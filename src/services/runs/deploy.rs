use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Builder;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::session::{self, RemoteShell};
use crate::config::PhaseTimeouts;
use crate::error::{DeployError, SessionError};
use crate::machines::Machine;

const SKIPPED_DIRS: [&str; 4] = ["target", ".git", "__pycache__", "node_modules"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStrategy {
    /// `tar --transform` renames the archive root while extracting.
    Transform,
    /// Plain extraction into a staging directory followed by a rename.
    ExtractAndRename,
}

/// Ships the local benchmark tree to `$HOME/<remote_dir>` on a machine.
#[derive(Debug, Clone)]
pub struct Deployer {
    local_dir: PathBuf,
    archive_root: String,
    remote_dir: String,
}

impl Deployer {
    pub fn new(local_dir: impl Into<PathBuf>, remote_dir: impl Into<String>) -> Self {
        let local_dir = local_dir.into();
        let archive_root = local_dir
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| crate::config::validate_dir_name(name).is_ok())
            .unwrap_or("benchmarks")
            .to_string();
        Self {
            local_dir,
            archive_root,
            remote_dir: remote_dir.into(),
        }
    }

    /// Shell prefix that enters the deployed tree.
    pub fn cd_prefix(&self) -> String {
        format!("cd \"$HOME/{}\"", self.remote_dir)
    }

    pub(super) fn transform_command(&self) -> String {
        format!(
            "tar -xzf - -C \"$HOME\" --transform 's,^{root},{dir},'",
            root = self.archive_root,
            dir = self.remote_dir,
        )
    }

    pub(super) fn extract_and_rename_command(&self) -> String {
        let staging = format!("\"$HOME/.{}-staging\"", self.remote_dir);
        format!(
            "rm -rf \"$HOME/{dir}\" {staging} \
             && mkdir -p {staging} \
             && tar -xzf - -C {staging} \
             && mv {staging}/{root} \"$HOME/{dir}\" \
             && rm -rf {staging}",
            dir = self.remote_dir,
            root = self.archive_root,
        )
    }

    /// Builds the gzip'd tar of the benchmark tree in memory.
    pub fn package(&self) -> Result<Vec<u8>, DeployError> {
        package_dir(&self.local_dir, &self.archive_root).map_err(|err| DeployError::Packaging {
            path: self.local_dir.display().to_string(),
            message: format!("{err:#}"),
        })
    }

    /// Packages, streams and extracts the tree. Safe to repeat against the same machine.
    pub async fn deploy(
        &self,
        shell: &Arc<dyn RemoteShell>,
        machine: &Machine,
        timeouts: &PhaseTimeouts,
        cancel: &CancellationToken,
        on_output: &mut (dyn FnMut(&str) + Send),
    ) -> Result<DeployStrategy, DeployError> {
        let deployer = self.clone();
        let archive = tokio::task::spawn_blocking(move || deployer.package())
            .await
            .map_err(|err| DeployError::Packaging {
                path: self.local_dir.display().to_string(),
                message: format!("packaging task failed: {err}"),
            })??;
        on_output(&format!(
            "Packaged {} ({} KiB)\n",
            self.local_dir.display(),
            archive.len().div_ceil(1024)
        ));

        let primary = self.transform_command();
        match self
            .extract(shell, machine, &primary, &archive, timeouts, cancel, on_output)
            .await
        {
            Ok(()) => return Ok(DeployStrategy::Transform),
            Err(SessionError::Remote { exit_code }) => {
                on_output(&format!(
                    "Extraction with --transform failed (exit {exit_code}); retrying with plain extraction\n"
                ));
            }
            Err(err) => return Err(DeployError::Transfer(err)),
        }

        let fallback = self.extract_and_rename_command();
        self.extract(shell, machine, &fallback, &archive, timeouts, cancel, on_output)
            .await
            .map_err(DeployError::Transfer)?;
        Ok(DeployStrategy::ExtractAndRename)
    }

    async fn extract(
        &self,
        shell: &Arc<dyn RemoteShell>,
        machine: &Machine,
        command: &str,
        archive: &[u8],
        timeouts: &PhaseTimeouts,
        cancel: &CancellationToken,
        on_output: &mut (dyn FnMut(&str) + Send),
    ) -> Result<(), SessionError> {
        let session = session::connect(shell, machine, timeouts.connect, cancel).await?;
        session
            .exec(command, Some(archive.to_vec()), timeouts.deploy, cancel, on_output)
            .await?;
        Ok(())
    }
}

fn package_dir(source: &Path, archive_root: &str) -> anyhow::Result<Vec<u8>> {
    use anyhow::{bail, Context};

    if !source.is_dir() {
        bail!("benchmark directory not found");
    }
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    let walker = WalkDir::new(source)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
        });
    for entry in walker {
        let entry = entry.context("failed to walk benchmark directory")?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("walked outside the benchmark directory")?;
        let archive_path = Path::new(archive_root).join(relative);
        if entry.file_type().is_dir() {
            builder
                .append_dir(&archive_path, entry.path())
                .with_context(|| format!("failed to add {}", entry.path().display()))?;
        } else {
            builder
                .append_path_with_name(entry.path(), &archive_path)
                .with_context(|| format!("failed to add {}", entry.path().display()))?;
        }
    }

    let encoder = builder.into_inner().context("failed to finish tar stream")?;
    let bytes = encoder.finish().context("failed to finish gzip stream")?;
    Ok(bytes)
}
