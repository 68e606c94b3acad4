//! Scratch directory holding a session's uploaded and generated images

use crate::error::{Result, SegifyError};
use std::fs;
use std::path::{Path, PathBuf};

/// Session scratch directory
///
/// Created idempotently under a base directory (the working directory by default).
/// [`TempWorkspace::destroy`] consumes the handle and removes the directory with
/// everything in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempWorkspace {
    path: PathBuf,
}

impl TempWorkspace {
    /// Create (or reuse) `name` under the current working directory
    ///
    /// # Errors
    /// - The working directory cannot be determined
    /// - The directory cannot be created
    pub fn create(name: &str) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| SegifyError::file_io_error("resolve working directory", ".", &e))?;
        Self::create_in(&cwd, name)
    }

    /// Create (or reuse) `name` under `base`
    ///
    /// # Errors
    /// - The directory cannot be created
    pub fn create_in(base: &Path, name: &str) -> Result<Self> {
        let path = base.join(name);
        if !path.exists() {
            fs::create_dir_all(&path)
                .map_err(|e| SegifyError::file_io_error("create workspace", &path, &e))?;
            log::debug!("Created workspace {}", path.display());
        }
        let path = if path.is_absolute() {
            path
        } else {
            fs::canonicalize(&path)
                .map_err(|e| SegifyError::file_io_error("resolve workspace", &path, &e))?
        };
        Ok(Self { path })
    }

    /// Absolute path of the workspace directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `file_name` inside the workspace
    #[must_use]
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    /// Recursively delete the workspace
    ///
    /// # Errors
    /// - The directory no longer exists
    /// - The directory or its contents cannot be removed
    pub fn destroy(self) -> Result<()> {
        fs::remove_dir_all(&self.path)
            .map_err(|e| SegifyError::file_io_error("remove workspace", &self.path, &e))?;
        log::debug!("Removed workspace {}", self.path.display());
        Ok(())
    }
}
