//! Persisted role hint
//!
//! The last role this node successfully reached, stored as a single line of
//! text. Live firewall state stays the source of truth; this file only
//! disambiguates cases the rules alone cannot (no rules at all means either
//! Promoted or not started).
//!
//! Writes go through a [`tempfile::NamedTempFile`] in the same directory that
//! is renamed over the target, so a reader sees either the old value or the
//! new one. If anything fails before the rename the temp file is removed when
//! the handle drops.

use crate::core::role::Role;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("State file {0} has no parent directory")]
    NoParent(PathBuf),

    #[error("Failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on state file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StateError> for crate::core::error::Error {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Io(e) | StateError::Write { source: e, .. } => Self::Io(e),
            StateError::NoParent(path) => {
                Self::configuration("state", format!("{} has no parent directory", path.display()))
            }
        }
    }
}

/// Handle to the state file at a fixed location.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored role.
    ///
    /// Returns `Ok(None)` when the file is missing. Content that is not a role
    /// name is treated the same way, since the value is only a hint.
    pub fn read(&self) -> Result<Option<Role>, StateError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(e)),
        };

        match content.trim().parse::<Role>() {
            Ok(role) => Ok(Some(role)),
            Err(_) => {
                warn!(
                    "Ignoring unrecognised state file content in {:?}: {:?}",
                    self.path,
                    content.trim()
                );
                Ok(None)
            }
        }
    }

    /// Atomically replaces the stored role.
    pub fn write(&self, role: Role) -> Result<(), StateError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| StateError::NoParent(self.path.clone()))?;

        std::fs::create_dir_all(dir)?;

        let wrap = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".roleguard-state")
            .tempfile_in(dir)
            .map_err(wrap)?;

        writeln!(tmp, "{role}").map_err(wrap)?;
        tmp.as_file().sync_all().map_err(wrap)?;

        tmp.persist(&self.path).map_err(|e| wrap(e.error))?;

        debug!("Persisted role {role} to {:?}", self.path);
        Ok(())
    }

    /// Removes the state file. A missing file is not an error.
    pub fn remove(&self) -> Result<(), StateError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Io(e)),
        }
    }
}
