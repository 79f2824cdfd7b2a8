//! # State Directory Persistence
//!
//! Small JSON documents kept across restarts: calibration data and the
//! connection `headerId` floor. Writes go to a temporary sibling and are
//! renamed into place so a crash never leaves a truncated document behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt document {path}: {message}")]
    Corrupt { path: String, message: String },
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Directory of named JSON documents
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open `root`, creating it if needed
    pub fn open(root: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PersistenceError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Read document `name`; `Ok(None)` if it was never written
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> PersistenceResult<Option<T>> {
        let path = self.path_of(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Replace document `name` atomically
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> PersistenceResult<()> {
        let path = self.path_of(name);
        let tmp_path = self.root.join(format!("{name}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| PersistenceError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        fs::write(&tmp_path, &bytes).map_err(|e| PersistenceError::io(&tmp_path, e))?;
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(PersistenceError::io(&path, e));
        }
        tracing::debug!(path = %path.display(), "Persisted document");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> PersistenceResult<()> {
        let path = self.path_of(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(&path, e)),
        }
    }
}
