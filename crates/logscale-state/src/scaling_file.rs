//! ScalingStateFile: the versioned, human-readable scaling state.
//!
//! The document lives in a single pretty-printed JSON file so operators can
//! inspect or hand-edit it between runs:
//!
//! ```json
//! {
//!   "version": 4,
//!   "services": {
//!     "database": { "instances": 2, "max_instances": 3 }
//!   }
//! }
//! ```
//!
//! Writers follow load → mutate → [`ScalingStateFile::commit`]. A commit
//! names the version it was derived from; if the file moved on in the
//! meantime (another writer, a manual edit that bumped the version, a
//! reset) the commit fails with [`StateError::Conflict`] and nothing is
//! written. The version check and the write run under an exclusive
//! advisory lock on a sidecar `<file>.lock`, so independent handles and
//! other processes serialize on it. Each write goes through its own temp
//! file in the same directory and is renamed into place.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::types::{ScalingState, ServiceScalingState};

/// Handle to the scaling state document on disk.
#[derive(Clone)]
pub struct ScalingStateFile {
    path: PathBuf,
    /// Sidecar file holding the advisory write lock.
    lock_path: PathBuf,
    defaults: ScalingState,
}

impl ScalingStateFile {
    /// Open the document at `path`, creating it from `defaults` if absent.
    ///
    /// An existing file is reconciled against the defaults: configured
    /// services missing from the file are added, and entries breaking
    /// `1 <= instances <= max_instances` are clamped. A reconciled file is
    /// written back as a new version.
    pub fn open(path: &Path, defaults: ScalingState) -> StateResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "scaling_state".into());
        lock_name.push(".lock");

        let file = Self {
            path: path.to_path_buf(),
            lock_path: path.with_file_name(lock_name),
            defaults,
        };

        file.locked(|| {
            if !file.path.exists() {
                file.write(&file.defaults)?;
                info!(?path, services = file.defaults.services.len(), "scaling state initialized");
                return Ok(());
            }

            let (mut state, mut changed) = file.read_reconciled()?;
            for (name, svc) in &file.defaults.services {
                if !state.services.contains_key(name) {
                    state
                        .services
                        .insert(name.clone(), ServiceScalingState::initial(svc.max_instances));
                    changed = true;
                }
            }
            if changed {
                state.version += 1;
                file.write(&state)?;
                info!(?path, version = state.version, "scaling state reconciled");
            }
            debug!(?path, version = state.version, "scaling state opened");
            Ok(())
        })?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The document `reset` restores.
    pub fn defaults(&self) -> &ScalingState {
        &self.defaults
    }

    /// Read the current document.
    pub fn load(&self) -> StateResult<ScalingState> {
        Ok(self.read_reconciled()?.0)
    }

    /// Write `state` as the successor of `expected_version`.
    ///
    /// Returns the new version. Fails with `Conflict` if the document on
    /// disk is no longer at `expected_version`.
    pub fn commit(&self, expected_version: u64, state: &ScalingState) -> StateResult<u64> {
        self.locked(|| {
            let found = self.read_raw()?.version;
            if found != expected_version {
                warn!(expected = expected_version, found, "scaling state write conflict");
                return Err(StateError::Conflict {
                    expected: expected_version,
                    found,
                });
            }

            let mut next = state.clone();
            next.version = expected_version + 1;
            for (name, svc) in next.services.iter_mut() {
                if svc.clamp() {
                    warn!(service = %name, "refusing to persist out-of-bounds instance count; clamped");
                }
            }
            self.write(&next)?;
            debug!(version = next.version, "scaling state committed");
            Ok(next.version)
        })
    }

    /// Restore every service to its configured default.
    ///
    /// The version keeps increasing so that in-flight writers derived from
    /// the pre-reset document conflict instead of overwriting the reset.
    pub fn reset(&self) -> StateResult<ScalingState> {
        self.locked(|| {
            let current = match self.read_raw() {
                Ok(state) => state.version,
                Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e),
            };
            let mut state = self.defaults.clone();
            state.version = current + 1;
            self.write(&state)?;
            info!(version = state.version, "scaling state reset to defaults");
            Ok(state)
        })
    }

    /// Run `f` holding the exclusive lock on the sidecar file.
    fn locked<T>(&self, f: impl FnOnce() -> StateResult<T>) -> StateResult<T> {
        let lock_file: File = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;
        f()
    }

    fn read_raw(&self) -> StateResult<ScalingState> {
        let content = std::fs::read(&self.path)?;
        serde_json::from_slice(&content).map_err(|e| StateError::Deserialize(e.to_string()))
    }

    /// Read and clamp. The boolean reports whether clamping changed anything.
    fn read_reconciled(&self) -> StateResult<(ScalingState, bool)> {
        let mut state = self.read_raw()?;
        let mut changed = false;
        for (name, svc) in state.services.iter_mut() {
            let before = *svc;
            if svc.clamp() {
                warn!(
                    service = %name,
                    instances = before.instances,
                    max_instances = before.max_instances,
                    "scaling state entry out of bounds; clamped"
                );
                changed = true;
            }
        }
        Ok((state, changed))
    }

    fn write(&self, state: &ScalingState) -> StateResult<()> {
        let content =
            serde_json::to_vec_pretty(state).map_err(|e| StateError::Serialize(e.to_string()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        Ok(())
    }
}
