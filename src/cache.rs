//! Model cache directory management
//!
//! Downloaded graphs live as flat files in a single directory: `./models` by
//! default, `SEGIFY_MODELS_DIR` when set, or the directory named in the
//! configuration. Partially downloaded files carry a `.part` suffix and are
//! never reported as cached.

use crate::config::SegifyConfig;
use crate::error::{Result, SegifyError};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the model cache directory
pub const MODELS_DIR_ENV_VAR: &str = "SEGIFY_MODELS_DIR";

/// Suffix of files still being downloaded
pub const PARTIAL_SUFFIX: &str = ".part";

/// Information about a cached model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelInfo {
    /// File name inside the cache directory
    pub file_name: String,
    /// Full path to the file
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Resolve the cache directory from configuration and environment
    ///
    /// # Errors
    /// - Failed to determine the working directory
    /// - Failed to create the cache directory
    pub fn new(config: &SegifyConfig) -> Result<Self> {
        let cache_dir = Self::resolve_cache_dir(config)?;
        Self::with_dir(&cache_dir)
    }

    /// Use `cache_dir` directly, creating it if needed
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_dir(cache_dir: &Path) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(cache_dir).map_err(|e| {
                SegifyError::file_io_error("create cache directory", cache_dir, &e)
            })?;
        }
        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
        })
    }

    fn resolve_cache_dir(config: &SegifyConfig) -> Result<PathBuf> {
        if let Some(dir) = &config.models_dir {
            return Ok(dir.clone());
        }

        if let Ok(dir_override) = std::env::var(MODELS_DIR_ENV_VAR) {
            if !dir_override.is_empty() {
                return Ok(PathBuf::from(dir_override));
            }
        }

        let cwd = std::env::current_dir()
            .map_err(|e| SegifyError::file_io_error("resolve working directory", ".", &e))?;
        Ok(cwd.join("models"))
    }

    /// Check whether a completed model file is present
    #[must_use]
    pub fn is_cached(&self, file_name: &str) -> bool {
        self.model_path(file_name).is_file()
    }

    /// Path of a model file in the cache (may not exist)
    #[must_use]
    pub fn model_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir.join(file_name)
    }

    /// Path used while `file_name` is being downloaded
    #[must_use]
    pub fn partial_path(&self, file_name: &str) -> PathBuf {
        self.cache_dir.join(format!("{file_name}{PARTIAL_SUFFIX}"))
    }

    /// Scan the cache directory for completed model files
    ///
    /// Used by `--list-models`. Entries are sorted by file name.
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            SegifyError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                SegifyError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                log::debug!("Skipping non UTF-8 cache entry: {}", path.display());
                continue;
            };
            if file_name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }

            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            models.push(CachedModelInfo {
                file_name: file_name.to_string(),
                path: path.clone(),
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(models)
    }

    /// Remove every file in the cache, including partial downloads
    ///
    /// # Returns
    /// Names of the removed files
    ///
    /// # Errors
    /// - Failed to read the cache directory
    /// - Failed to remove a file
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(removed);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            SegifyError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                SegifyError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if path.is_file() {
                let name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .unwrap_or("unknown")
                    .to_string();
                log::info!("Removing cached model: {}", name);
                fs::remove_file(&path).map_err(|e| {
                    SegifyError::file_io_error("remove cached model", &path, &e)
                })?;
                removed.push(name);
            }
        }

        removed.sort();
        Ok(removed)
    }

    /// Get the cache directory path
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.first().unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
