//! Uploaded file storage on the local filesystem.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Replace anything outside `[A-Za-z0-9._-]` with `_` and trim leading and
/// trailing dots and underscores. Names left empty get a random one.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(filename, "_");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Directory holding uploaded originals. Stored names carry a unique prefix
/// so two uploads of the same name never collide.
#[derive(Debug, Clone)]
pub struct UploadStorage {
    base_dir: PathBuf,
}

impl UploadStorage {
    pub fn new(base_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(base_dir).map_err(|source| StorageError::Io {
            path: base_dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `bytes` under a sanitized, uniquely prefixed name.
    pub fn save(&self, original_name: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let stored_name = format!(
            "{}_{}",
            Uuid::new_v4().simple(),
            sanitize_filename(original_name)
        );
        let destination = self.base_dir.join(stored_name);
        std::fs::write(&destination, bytes).map_err(|source| StorageError::Io {
            path: destination.clone(),
            source,
        })?;
        tracing::debug!(path = %destination.display(), size = bytes.len(), "Upload stored");
        Ok(destination)
    }

    pub fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        std::fs::read(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
