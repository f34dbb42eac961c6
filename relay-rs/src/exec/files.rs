//! Privileged file operations
//!
//! In elevated mode every mutation of a system file is performed by a
//! root-owned command (`install`, `cp`, `rm`, `chmod`, `chown`). In direct
//! mode the process is assumed to own the files already and `tokio::fs` is
//! used.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info};

use super::{CommandRunner, CommandSpec};
use crate::error::{RelayError, Result};

#[derive(Clone)]
pub struct SystemFiles {
    runner: Arc<dyn CommandRunner>,
    elevated: bool,
}

fn mode_arg(mode: u32) -> String {
    format!("{:o}", mode)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl SystemFiles {
    pub fn new(runner: Arc<dyn CommandRunner>, elevated: bool) -> Self {
        SystemFiles { runner, elevated }
    }

    pub fn is_elevated(&self) -> bool {
        self.elevated
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Replace `path` with `contents` and set its mode
    pub async fn write(&self, path: &Path, contents: &[u8], mode: u32) -> Result<()> {
        if self.elevated {
            // staged copy lives until install(1) has read it
            let mut staged = tempfile::NamedTempFile::new()?;
            staged.write_all(contents)?;
            staged.flush()?;

            self.runner
                .run_checked(
                    &CommandSpec::root("install")
                        .args(["-D", "-m", mode_arg(mode).as_str()])
                        .arg(path_arg(staged.path()))
                        .arg(path_arg(path)),
                )
                .await?;
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, contents).await?;
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        }

        info!("Wrote {} (mode {:o})", path.display(), mode);
        Ok(())
    }

    /// Copy `src` to `dst`, preserving mode and timestamps
    pub async fn copy(&self, src: &Path, dst: &Path) -> Result<()> {
        if self.elevated {
            if let Some(parent) = dst.parent() {
                self.create_dir_all(parent).await?;
            }
            self.runner
                .run_checked(
                    &CommandSpec::root("cp")
                        .arg("-p")
                        .arg(path_arg(src))
                        .arg(path_arg(dst)),
                )
                .await?;
        } else {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(src, dst).await?;
        }

        debug!("Copied {} -> {}", src.display(), dst.display());
        Ok(())
    }

    /// Remove a file; a missing file is not an error
    pub async fn remove(&self, path: &Path) -> Result<()> {
        if self.elevated {
            self.runner
                .run_checked(&CommandSpec::root("rm").arg("-f").arg(path_arg(path)))
                .await?;
        } else {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Removed {}", path.display());
        Ok(())
    }

    /// Remove a directory tree; a missing directory is not an error
    pub async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        if self.elevated {
            self.runner
                .run_checked(&CommandSpec::root("rm").arg("-rf").arg(path_arg(path)))
                .await?;
        } else {
            match fs::remove_dir_all(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("Removed {}", path.display());
        Ok(())
    }

    pub async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        if self.elevated {
            self.runner
                .run_checked(
                    &CommandSpec::root("chmod")
                        .arg(mode_arg(mode))
                        .arg(path_arg(path)),
                )
                .await?;
        } else {
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        }
        Ok(())
    }

    /// Hand a restored file back to root. No-op in direct mode.
    pub async fn chown_root(&self, path: &Path) -> Result<()> {
        if self.elevated {
            self.runner
                .run_checked(
                    &CommandSpec::root("chown")
                        .arg("root:root")
                        .arg(path_arg(path)),
                )
                .await?;
        } else {
            debug!("Skipping chown of {} in direct mode", path.display());
        }
        Ok(())
    }

    pub async fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.elevated {
            self.runner
                .run_checked(&CommandSpec::root("mkdir").arg("-p").arg(path_arg(path)))
                .await?;
        } else {
            fs::create_dir_all(path).await?;
        }
        Ok(())
    }

    /// Numeric `uid:gid` this process runs as
    async fn process_owner(&self) -> Result<String> {
        let mut ids = Vec::with_capacity(2);
        for flag in ["-u", "-g"] {
            let spec = CommandSpec::new("id").arg(flag);
            let output = self.runner.run_checked(&spec).await?;
            let id = output.stdout.trim();
            if id.parse::<u32>().is_err() {
                return Err(RelayError::CommandFailed {
                    command: spec.display(),
                    code: output.code,
                    stderr: format!("unexpected output {:?}", id),
                });
            }
            ids.push(id.to_string());
        }
        Ok(ids.join(":"))
    }

    /// Create a directory this process can read without escalating.
    ///
    /// In elevated mode the directory is made by root and then handed to
    /// the invoking user, so later unprivileged reads still see it.
    pub async fn create_owned_dir(&self, path: &Path, mode: u32) -> Result<()> {
        if self.elevated {
            let owner = self.process_owner().await?;
            self.create_dir_all(path).await?;
            self.runner
                .run_checked(&CommandSpec::root("chown").arg(&owner).arg(path_arg(path)))
                .await?;
            debug!("{} now owned by {}", path.display(), owner);
        } else {
            fs::create_dir_all(path).await?;
        }
        self.chmod(path, mode).await
    }
}
