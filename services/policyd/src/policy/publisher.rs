//! Write the compiled policy where the engine factory can read it.
//!
//! # Key invariants
//! - An empty policy is never written; the current file and generation stay.
//! - The active file is replaced by rename from a fully written, fsynced temp
//!   file in the same directory, so it is never observed half written.
//! - The previous file is kept as `<name>.bak` on a best-effort basis.
//! - Published files are read-only.
use super::PolicyError;
use super::compiler::CompiledPolicy;
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PolicyFilePublisher {
    policy_path: PathBuf,
}

impl PolicyFilePublisher {
    pub fn new(policy_path: impl Into<PathBuf>) -> Self {
        Self {
            policy_path: policy_path.into(),
        }
    }

    pub fn policy_path(&self) -> &Path {
        &self.policy_path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .policy_path
            .file_name()
            .map(OsString::from)
            .unwrap_or_default();
        name.push(".bak");
        self.policy_path.with_file_name(name)
    }

    pub async fn publish(&self, policy: &CompiledPolicy) -> Result<(), PolicyError> {
        if policy.is_empty() {
            return Err(PolicyError::EmptyPolicy);
        }
        let contents = policy.render();
        let publisher = self.clone();
        tokio::task::spawn_blocking(move || publisher.publish_blocking(&contents))
            .await
            .map_err(|err| PolicyError::Worker(err.to_string()))?
    }

    fn publish_blocking(&self, contents: &str) -> Result<(), PolicyError> {
        let dir = match self.policy_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|err| PolicyError::io(&dir, err))?;

        let mut staged =
            tempfile::NamedTempFile::new_in(&dir).map_err(|err| PolicyError::io(&dir, err))?;
        staged
            .write_all(contents.as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|err| PolicyError::io(staged.path(), err))?;
        let mut permissions = staged
            .as_file()
            .metadata()
            .map_err(|err| PolicyError::io(staged.path(), err))?
            .permissions();
        permissions.set_readonly(true);
        staged
            .as_file()
            .set_permissions(permissions)
            .map_err(|err| PolicyError::io(staged.path(), err))?;

        self.rotate_backup();
        staged
            .persist(&self.policy_path)
            .map_err(|err| PolicyError::io(&self.policy_path, err.error))?;
        sync_dir(&dir);
        tracing::debug!(
            path = %self.policy_path.display(),
            bytes = contents.len(),
            "policy file published"
        );
        Ok(())
    }

    fn rotate_backup(&self) {
        let backup = self.backup_path();
        if let Err(err) = std::fs::remove_file(&backup) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(path = %backup.display(), error = %err, "failed to remove policy backup");
                return;
            }
        }
        match std::fs::copy(&self.policy_path, &backup) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %backup.display(), error = %err, "failed to back up policy file");
            }
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Write the embedded model to `path` unless a file already exists there.
///
/// Returns whether the file was created.
pub async fn ensure_model_file(path: &Path) -> Result<bool, PolicyError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => return Ok(false),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(PolicyError::io(path, err)),
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| PolicyError::io(parent, err))?;
    }
    tokio::fs::write(path, gatehouse_authz::casbin_model_string())
        .await
        .map_err(|err| PolicyError::io(path, err))?;
    tracing::info!(path = %path.display(), "wrote default casbin model");
    Ok(true)
}
