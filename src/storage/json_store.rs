use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Atomic JSON document store rooted at the engine's data directory.
///
/// Readers always see either the previous or the new content of a file,
/// never a torn write; the previous content is kept as `<name>.bak`.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates the data directory if needed.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::Io {
                path: self.dir.clone(),
                source,
            })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Reads a document, falling back to its `.bak` sibling and finally to
    /// `T::default()`. Never fails: a corrupt store degrades, it does not
    /// take the engine down.
    pub async fn read<T>(&self, name: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(name);
        match read_document(&path).await {
            Some(value) => value,
            None => {
                let backup = backup_path(&path);
                match read_document(&backup).await {
                    Some(value) => {
                        warn!(path = %path.display(), "restored document from backup");
                        value
                    }
                    None => T::default(),
                }
            }
        }
    }

    /// Serializes `value` and swaps it in atomically: sibling temp file,
    /// fsync, rotate the current file to `.bak`, rename the temp over the
    /// target.
    pub async fn write_atomic<T>(&self, name: &str, value: &T) -> Result<(), StorageError>
    where
        T: Serialize + ?Sized,
    {
        let path = self.path(name);
        let payload =
            serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialize {
                path: path.clone(),
                source,
            })?;

        let tmp = temp_path(&path);
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|source| StorageError::Io {
                path: tmp.clone(),
                source,
            })?;
        file.write_all(&payload)
            .await
            .map_err(|source| StorageError::Io {
                path: tmp.clone(),
                source,
            })?;
        file.sync_all().await.map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        drop(file);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Err(source) = tokio::fs::rename(&path, backup_path(&path)).await {
                warn!(path = %path.display(), error = %source, "backup rotation failed");
            }
        }

        match tokio::fs::rename(&tmp, &path).await {
            Ok(()) => {
                debug!(path = %path.display(), bytes = payload.len(), "document written");
                Ok(())
            }
            Err(source) => {
                // The previous file (now `.bak`) still holds valid content.
                warn!(path = %path.display(), error = %source, "atomic rename failed");
                Err(StorageError::Io { path, source })
            }
        }
    }
}

async fn read_document<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(_) => return None,
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(path = %path.display(), error = %error, "corrupt document");
            None
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".bak");
    PathBuf::from(os)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
