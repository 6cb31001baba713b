//! Per-execution scratch directories
//!
//! Every engine owns `<root>/engine-<pid>-<uuid>/`, and each admitted
//! execution gets `<engine dir>/<execution id>/` holding `main<ext>` and,
//! for compiled languages, the artifact. The execution directory is
//! removed when the [`Workspace`] guard is closed or dropped, whichever
//! comes first. The engine directory goes away with its manager.

use crate::config::WorkspaceConfig;
use crate::error::ServiceError;
use crate::execution::ExecutionId;
use crate::language::LanguageProfile;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const SOURCE_STEM: &str = "main";
const ENGINE_PREFIX: &str = "engine-";

/// Owns one engine's directory under the shared workspace root
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    dir: PathBuf,
}

impl WorkspaceManager {
    /// Create the root if needed, clear directories left by dead
    /// processes when configured to, then claim a fresh engine directory
    pub fn new(config: &WorkspaceConfig) -> Result<Self, ServiceError> {
        let root = config.root.clone();
        create_private_dir(&root, true).map_err(|source| ServiceError::WorkspaceRoot {
            path: root.clone(),
            source,
        })?;

        if config.sweep_on_start {
            let removed = sweep_abandoned(&root);
            if removed > 0 {
                tracing::info!(root = %root.display(), removed, "Removed abandoned workspaces");
            }
        }

        let dir = root.join(engine_dir_name(std::process::id(), &uuid::Uuid::new_v4()));
        create_private_dir(&dir, false).map_err(|source| ServiceError::WorkspaceRoot {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { root, dir })
    }

    /// Shared root, possibly used by other engines
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// This engine's directory; every workspace it creates lives here
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory for `id` and write the source into it
    pub async fn create(
        &self,
        id: &ExecutionId,
        profile: &LanguageProfile,
        source: &str,
    ) -> io::Result<Workspace> {
        let dir = self.dir.join(id.simple());
        create_private_dir(&dir, false)?;

        // From here on the guard owns the directory, so a failed write
        // still cleans up.
        let workspace = Workspace {
            id: *id,
            created_at: Utc::now(),
            source: dir.join(format!("{SOURCE_STEM}{}", profile.extension)),
            artifact: dir.join(profile.artifact),
            dir,
            removed: false,
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&workspace.source).await?;
        file.write_all(source.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(execution_id = %id, dir = %workspace.dir.display(), "Workspace created");
        Ok(workspace)
    }
}

impl Drop for WorkspaceManager {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to remove engine directory");
            }
        }
    }
}

fn engine_dir_name(pid: u32, engine: &uuid::Uuid) -> String {
    format!("{ENGINE_PREFIX}{pid}-{}", engine.simple())
}

/// Owning pid of an engine directory name, `None` for anything else
fn engine_dir_owner(name: &str) -> Option<u32> {
    let (pid, engine) = name.strip_prefix(ENGINE_PREFIX)?.split_once('-')?;
    let pid: u32 = pid.parse().ok()?;
    let is_uuid = engine.len() == 32 && engine.bytes().all(|b| b.is_ascii_hexdigit());
    (pid > 0 && is_uuid).then_some(pid)
}

/// Remove engine directories whose owning process has exited. Directories
/// of live processes, including other engines in this one, are kept.
fn sweep_abandoned(root: &Path) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "Cannot read workspace root");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let owner = engine_dir_owner(&entry.file_name().to_string_lossy());
        let Some(pid) = owner.filter(|_| is_dir) else {
            continue;
        };
        if process_alive(pid) {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(
                path = %entry.path().display(),
                error = %e,
                "Failed to remove abandoned workspace"
            ),
        }
    }
    removed
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// A live execution directory. Removal happens exactly once.
#[derive(Debug)]
pub struct Workspace {
    id: ExecutionId,
    created_at: DateTime<Utc>,
    dir: PathBuf,
    source: PathBuf,
    artifact: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Execution owning this directory
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    /// Remove the workspace now instead of at drop
    pub fn close(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    let result = if is_dir {
                        std::fs::remove_dir_all(&path)
                    } else {
                        std::fs::remove_file(&path)
                    };
                    if let Err(e) = result {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to remove workspace entry");
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list workspace");
            }
        }

        match std::fs::remove_dir(&self.dir) {
            Ok(()) => tracing::debug!(
                execution_id = %self.id,
                lived_ms = (Utc::now() - self.created_at).num_milliseconds(),
                "Workspace removed"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}


fn create_private_dir(path: &Path, recursive: bool) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
